/*
 * Copyright (c) 2024. Govcraft
 *
 * Licensed under either of
 *   * Apache License, Version 2.0 (the "License");
 *     you may not use this file except in compliance with the License.
 *     You may obtain a copy of the License at http://www.apache.org/licenses/LICENSE-2.0
 *   * MIT license: http://opensource.org/licenses/MIT
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the applicable License for the specific language governing permissions and
 * limitations under that License.
 */

#![forbid(unsafe_code)]

//! Kestrel Macro Library
//!
//! Procedural macros for the Kestrel component runtime.
//!
//! # Event Macro
//!
//! [`kestrel_event`] turns a struct into an event that can travel over channels:
//!
//! ```ignore
//! #[kestrel_event]
//! pub struct Ping {
//!     pub round: u32,
//! }
//!
//! // A variant of `Timeout`: subscribers of `Timeout` receive it too.
//! #[kestrel_event(extends = base)]
//! pub struct RetryDue {
//!     pub base: Timeout,
//!     pub attempt: u32,
//! }
//! ```
//!
//! # Component Macro
//!
//! [`kestrel_component`] prepares a component state type:
//!
//! ```ignore
//! #[kestrel_component]
//! pub struct Counter {
//!     count: u64,
//! }
//! ```
//!
//! # Main Entry Point
//!
//! ```ignore
//! use kestrel::prelude::*;
//!
//! #[kestrel_main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = KestrelApp::launch_async().await;
//!     // ... build and start components
//!     runtime.run_until_shutdown().await?;
//!     Ok(())
//! }
//! ```

use proc_macro::TokenStream;

use quote::quote;
use syn::{parse_macro_input, Data, DeriveInput, Fields, Ident, ItemFn};

fn has_derive(input: &DeriveInput, trait_name: &str) -> bool {
    input.attrs.iter().any(|attr| {
        if attr.path().is_ident("derive") {
            let mut found = false;
            let _ = attr.parse_nested_meta(|meta| {
                if meta.path.is_ident(trait_name) {
                    found = true;
                }
                Ok(())
            });
            found
        } else {
            false
        }
    })
}

fn has_field(input: &DeriveInput, field: &Ident) -> bool {
    match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(named) => named
                .named
                .iter()
                .any(|f| f.ident.as_ref() == Some(field)),
            _ => false,
        },
        _ => false,
    }
}

/// Options parsed from `#[kestrel_event(...)]`.
#[derive(Default)]
struct EventConfig {
    /// Field holding the embedded base event, if this event is a variant.
    extends: Option<String>,
}

impl EventConfig {
    fn parse(attr: &TokenStream) -> Self {
        let mut config = Self::default();
        let attr_string = attr.to_string();
        for part in attr_string.split(',') {
            let mut pair = part.splitn(2, '=');
            let key = pair.next().map(str::trim).unwrap_or_default();
            if key == "extends" {
                config.extends = pair.next().map(|v| v.trim().to_string());
            }
        }
        config
    }
}

/// Options parsed from `#[kestrel_component(...)]`.
#[derive(Default)]
struct ComponentConfig {
    /// Skip deriving Default.
    no_default: bool,
}

impl ComponentConfig {
    fn parse(attr: &TokenStream) -> Self {
        let mut config = Self::default();
        let attr_string = attr.to_string();
        for part in attr_string.split(',') {
            if part.trim() == "no_default" {
                config.no_default = true;
            }
        }
        config
    }
}

/// Makes a struct usable as a Kestrel event.
///
/// Expands to:
/// - `#[derive(Clone, Debug)]` for whichever of the two is not already derived
/// - an `impl kestrel::prelude::Event`
/// - a compile-time assertion that the type is `Send + Sync + 'static`
///
/// With `extends = field`, the event is also visible as the event stored in
/// `field`, and transitively as whatever that event extends. A subscription for
/// the base kind therefore receives the variant, and the handler sees the
/// embedded base value.
#[proc_macro_attribute]
pub fn kestrel_event(attr: TokenStream, item: TokenStream) -> TokenStream {
    let config = EventConfig::parse(&attr);
    let input = parse_macro_input!(item as DeriveInput);

    let name = &input.ident;
    let generics = &input.generics;
    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();

    let derives = {
        let mut traits = Vec::new();
        if !has_derive(&input, "Clone") {
            traits.push(quote!(Clone));
        }
        if !has_derive(&input, "Debug") {
            traits.push(quote!(Debug));
        }
        if traits.is_empty() {
            quote!()
        } else {
            quote!(#[derive(#(#traits),*)])
        }
    };

    let view = match &config.extends {
        None => quote!(),
        Some(field) => {
            let Ok(field) = syn::parse_str::<Ident>(field) else {
                return syn::Error::new_spanned(name, "extends expects a field name")
                    .to_compile_error()
                    .into();
            };
            if !has_field(&input, &field) {
                return syn::Error::new_spanned(
                    name,
                    format!("extends names `{field}`, which is not a named field of this struct"),
                )
                .to_compile_error()
                .into();
            }
            quote! {
                fn view(&self, kind: ::std::any::TypeId) -> ::std::option::Option<&dyn ::std::any::Any> {
                    if kind == ::std::any::TypeId::of::<Self>() {
                        return ::std::option::Option::Some(self as &dyn ::std::any::Any);
                    }
                    ::kestrel::prelude::Event::view(&self.#field, kind)
                }
            }
        }
    };

    let assert_ident = quote::format_ident!("_AssertKestrelEvent_{}", name);

    let expanded = quote! {
        #derives
        #input

        impl #impl_generics ::kestrel::prelude::Event for #name #ty_generics #where_clause {
            fn as_any(&self) -> &dyn ::std::any::Any {
                self
            }

            fn event_name(&self) -> &'static str {
                ::std::any::type_name::<Self>()
            }

            #view
        }

        #[doc(hidden)]
        #[allow(dead_code, non_camel_case_types, non_snake_case, clippy::needless_lifetimes)]
        const _: () = {
            fn #assert_ident #impl_generics () #where_clause {
                fn assert_bounds<T: Send + Sync + 'static>() {}
                assert_bounds::<#name #ty_generics>();
            }
        };
    };

    TokenStream::from(expanded)
}

/// Prepares a struct for use as component state.
///
/// Derives `Default` and `Debug` when absent and asserts `Send + 'static`.
/// Pass `no_default` to supply a hand-written `Default`.
#[proc_macro_attribute]
pub fn kestrel_component(attr: TokenStream, item: TokenStream) -> TokenStream {
    let config = ComponentConfig::parse(&attr);
    let input = parse_macro_input!(item as DeriveInput);

    let name = &input.ident;
    let generics = &input.generics;
    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();

    let derives = {
        let mut traits = Vec::new();
        if !config.no_default && !has_derive(&input, "Default") {
            traits.push(quote!(Default));
        }
        if !has_derive(&input, "Debug") {
            traits.push(quote!(Debug));
        }
        if traits.is_empty() {
            quote!()
        } else {
            quote!(#[derive(#(#traits),*)])
        }
    };

    let assert_ident = quote::format_ident!("_AssertKestrelComponent_{}", name);

    let expanded = quote! {
        #derives
        #input

        #[doc(hidden)]
        #[allow(dead_code, non_camel_case_types, non_snake_case, clippy::needless_lifetimes)]
        const _: () = {
            fn #assert_ident #impl_generics () #where_clause {
                fn assert_bounds<T: Send + 'static>() {}
                assert_bounds::<#name #ty_generics>();
            }
        };
    };

    TokenStream::from(expanded)
}

/// Entry point for Kestrel applications.
///
/// Wraps `async fn main` in a tokio runtime. Accepts `flavor = "current_thread"`
/// or `worker_threads = N`; the default is a multi-threaded runtime.
#[proc_macro_attribute]
pub fn kestrel_main(attr: TokenStream, item: TokenStream) -> TokenStream {
    let input = parse_macro_input!(item as ItemFn);

    let attrs = &input.attrs;
    let vis = &input.vis;
    let sig = &input.sig;
    let body = &input.block;

    if sig.asyncness.is_none() {
        return syn::Error::new_spanned(
            sig.fn_token,
            "the async keyword is missing from the function declaration",
        )
        .to_compile_error()
        .into();
    }

    if sig.ident != "main" {
        return syn::Error::new_spanned(
            &sig.ident,
            "kestrel_main can only be applied to the main function",
        )
        .to_compile_error()
        .into();
    }

    let attr_string = attr.to_string();
    let use_current_thread = attr_string.contains("current_thread");
    let worker_threads: Option<usize> = attr_string
        .split(',')
        .find(|s| s.contains("worker_threads"))
        .and_then(|s| s.split('=').nth(1).and_then(|v| v.trim().parse().ok()));

    let runtime_builder = if use_current_thread {
        quote! {
            ::kestrel::prelude::tokio::runtime::Builder::new_current_thread()
        }
    } else if let Some(threads) = worker_threads {
        quote! {
            ::kestrel::prelude::tokio::runtime::Builder::new_multi_thread()
                .worker_threads(#threads)
        }
    } else {
        quote! {
            ::kestrel::prelude::tokio::runtime::Builder::new_multi_thread()
        }
    };

    let fn_name = &sig.ident;
    let fn_inputs = &sig.inputs;
    let fn_output = &sig.output;

    let expanded = quote! {
        #(#attrs)*
        #vis fn #fn_name(#fn_inputs) #fn_output {
            #runtime_builder
                .enable_all()
                .build()
                .expect("failed to build the Kestrel runtime")
                .block_on(async #body)
        }
    };

    TokenStream::from(expanded)
}
