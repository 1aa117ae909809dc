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

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::component::{ComponentControl, Lifecycle};
use crate::traits::Event;

static NEXT_COMPONENT: AtomicU64 = AtomicU64::new(1);
static NEXT_CHANNEL: AtomicU64 = AtomicU64::new(1);
static NEXT_SUBSCRIPTION: AtomicU64 = AtomicU64::new(1);

/// Opaque, process-unique identifier of a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentId(u64);

impl ComponentId {
    pub(crate) fn next() -> Self {
        Self(NEXT_COMPONENT.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value, for logs and keys.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}", self.0)
    }
}

/// Identifier of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(u64);

impl ChannelId {
    pub(crate) fn next() -> Self {
        Self(NEXT_CHANNEL.fetch_add(1, Ordering::Relaxed))
    }
}

/// Identifier of one subscription on one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub(crate) fn next() -> Self {
        Self(NEXT_SUBSCRIPTION.fetch_add(1, Ordering::Relaxed))
    }
}

/// Order in which [`KestrelRuntime::walk`](crate::prelude::KestrelRuntime::walk)
/// visits the component tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Traversal {
    /// Parent, then each child subtree in creation order.
    #[default]
    DepthFirst,
    /// Level by level.
    BreadthFirst,
}

/// Snapshot of one component, produced by a tree walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentInfo {
    /// Component id.
    pub id: ComponentId,
    /// The name given at construction.
    pub name: String,
    /// Parent id, `None` for roots.
    pub parent: Option<ComponentId>,
    /// Distance from the root, roots are at depth 0.
    pub depth: usize,
    /// Lifecycle state when the snapshot was taken.
    pub lifecycle: Lifecycle,
    /// Names of the channels the component created.
    pub channels: Vec<String>,
}

/// A type-erased handler: it receives the component state, the event as
/// triggered and the component's context.
pub(crate) type HandlerFn<S> = Box<
    dyn Fn(&mut S, &dyn Event, &crate::component::Context) -> anyhow::Result<()> + Send + 'static,
>;

/// A lifecycle hook, run at most once.
pub(crate) type HookFn<S> =
    Box<dyn FnOnce(&mut S, &crate::component::Context) -> anyhow::Result<()> + Send + 'static>;

/// Arena entry for a live component.
pub(crate) type ControlRef = std::sync::Arc<ComponentControl>;
