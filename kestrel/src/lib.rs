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
#![warn(missing_docs)]

//! # Kestrel
//!
//! A component runtime built on Tokio. Components are isolated units of state
//! and behavior that communicate only by triggering typed events on channels.
//!
//! ## Key Concepts
//!
//! - **Events** ([`prelude::Event`]): immutable payloads, declared with
//!   `#[kestrel_event]`. Variants embed their base event
//!   (`#[kestrel_event(extends = base)]`) and are delivered to base-kind
//!   subscribers.
//! - **Channels** ([`prelude::Channel`]): routing tables holding an ordered
//!   list of subscriptions. A channel is not a queue.
//! - **Components** ([`prelude::ComponentBuilder`], [`prelude::ComponentHandle`]):
//!   private state plus statically registered handlers, arranged in a tree where
//!   parents own the lifetime of their children.
//! - **Dispatcher**: every component drains its own priority-ordered queue one
//!   invocation at a time; components run in parallel.
//! - **Membranes** ([`prelude::Membrane`]): sealed contracts that expose one
//!   component as a shared service under a process-wide name.
//! - **Timer** ([`prelude::TimerService`]): one-shot and periodic timeouts with
//!   cancellation, built on the same channels as everything else.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use kestrel::prelude::*;
//!
//! #[kestrel_event]
//! struct Ping;
//!
//! #[kestrel_component]
//! struct Counter {
//!     pings: u64,
//! }
//!
//! let runtime = KestrelApp::launch_async().await;
//! let pings = runtime.create_channel(ChannelSpec::new("pings").carries::<Ping>());
//! let mut counter = runtime.new_component::<Counter>("counter")?;
//! counter.subscribe::<Ping, _>(&pings, Priority::Normal, |state, _ping, _ctx| {
//!     state.pings += 1;
//!     Ok(())
//! })?;
//! let counter = counter.create()?;
//! counter.start()?;
//! pings.trigger(Ping)?;
//! ```

extern crate self as kestrel;

/// Runtime entry point, configuration, errors and shared types.
pub(crate) mod common;

/// The event trait.
pub(crate) mod traits;

/// Channels and subscriptions.
pub(crate) mod channel;

/// Per-component queues and the worker that drains them.
pub(crate) mod dispatcher;

/// Component construction, lifecycle and handles.
pub(crate) mod component;

/// Shared-service contracts.
pub(crate) mod membrane;

/// The timer service.
pub(crate) mod timer;

/// Components standing at the edge of the runtime: network and remote execution.
pub mod boundary;

/// Commonly used items.
///
/// ## Macros (from `kestrel-macro`)
/// *   `kestrel_event`: declares an event type.
/// *   `kestrel_component`: declares a component state type.
/// *   `kestrel_main`: async entry point.
///
/// ## External Crates
/// *   [`acton_ern::Ern`]: hierarchical component names.
/// *   [`tokio`]: re-exported for `kestrel_main`.
pub mod prelude {
    pub use kestrel_macro::*;

    pub use acton_ern::Ern;
    pub use tokio;

    pub use crate::channel::{Channel, ChannelSpec, EventKind, Priority};
    pub use crate::common::{
        ChannelId, ComponentId, ComponentInfo, KestrelApp, KestrelConfig, KestrelError,
        KestrelRuntime, SubscriptionId, Traversal,
    };
    pub use crate::component::{
        ComponentBuilder, ComponentHandle, Context, DestroyOrder, FaultDecision, FaultPolicy,
        Lifecycle,
    };
    pub use crate::membrane::{Membrane, MembraneBuilder};
    pub use crate::timer::{
        CancelPeriodicTimeout, CancelTimeout, SchedulePeriodicTimeout, ScheduleTimeout, TimerId,
        TimerRejected, TimerService, Timeout,
    };
    pub use crate::traits::{view_as, Event};
}
