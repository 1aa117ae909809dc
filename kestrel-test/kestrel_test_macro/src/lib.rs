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

use proc_macro::TokenStream;

use quote::quote;
use syn::{parse_macro_input, ItemFn};

/// Runs an `async fn` test on a fresh multi-threaded tokio runtime.
///
/// Any panic observed while the test runs, including one on a component
/// worker, fails the test with the panic message and location.
#[proc_macro_attribute]
pub fn kestrel_test(_attr: TokenStream, item: TokenStream) -> TokenStream {
    let input = parse_macro_input!(item as ItemFn);
    let vis = &input.vis;
    let sig = &input.sig;
    let body = &input.block;
    let attrs = &input.attrs;
    let name = &sig.ident;
    let inputs = &sig.inputs;
    let output = &sig.output;

    if sig.asyncness.is_none() {
        return syn::Error::new_spanned(sig.fn_token, "kestrel_test requires an async fn")
            .to_compile_error()
            .into();
    }

    let async_name = syn::Ident::new(&format!("__{name}_async"), name.span());

    let expanded = quote! {
        #[test]
        #(#attrs)*
        #vis fn #name() {
            use ::std::sync::atomic::{AtomicBool, Ordering};
            use ::std::sync::Arc;
            use ::std::panic;

            #[derive(Clone, Default)]
            struct PanicRecord {
                occurred: Arc<AtomicBool>,
                message: Arc<::kestrel_test::parking_lot::Mutex<Option<String>>>,
                location: Arc<::kestrel_test::parking_lot::Mutex<Option<String>>>,
            }

            let record = PanicRecord::default();
            let hook_record = record.clone();

            let orig_hook = panic::take_hook();
            panic::set_hook(Box::new(move |info| {
                hook_record.occurred.store(true, Ordering::SeqCst);
                let message = info
                    .payload()
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| info.payload().downcast_ref::<String>().cloned());
                ::kestrel_test::tracing::error!(
                    "panic: {}",
                    message.as_deref().unwrap_or("no message").trim().replace('\n', " ")
                );
                *hook_record.message.lock() = message;
                *hook_record.location.lock() = info
                    .location()
                    .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()));
                orig_hook(info);
            }));

            let runtime = ::kestrel_test::tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .unwrap();

            let result = runtime.block_on(async {
                let test_span = ::kestrel_test::tracing::info_span!("kestrel_test", name = stringify!(#name));
                let _enter = test_span.enter();
                #async_name().await
            });
            drop(runtime);

            if record.occurred.load(Ordering::SeqCst) {
                let message = record
                    .message
                    .lock()
                    .clone()
                    .unwrap_or_else(|| "no message".to_string());
                let location = record
                    .location
                    .lock()
                    .clone()
                    .unwrap_or_else(|| "unknown location".to_string());
                panic!("panic at {}: {}", location, message.trim().replace('\n', " "));
            }

            result.unwrap()
        }

        async fn #async_name(#inputs) #output #body
    };

    expanded.into()
}
