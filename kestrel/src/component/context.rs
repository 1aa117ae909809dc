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

use acton_ern::Ern;
use static_assertions::assert_impl_all;
use tracing::trace;

use crate::channel::{Channel, Priority};
use crate::common::{ComponentId, KestrelError, KestrelRuntime};
use crate::membrane::Membrane;
use crate::traits::Event;

/// What a handler may touch besides its own state.
///
/// Side effects leave a handler only as triggered events, plus the two
/// lifecycle requests [`destroy_self`](Self::destroy_self) and
/// [`request_shutdown`](Self::request_shutdown).
#[derive(Clone)]
pub struct Context {
    id: ComponentId,
    ern: Ern,
    runtime: KestrelRuntime,
}

assert_impl_all!(Context: Send, Sync);

impl Context {
    pub(crate) const fn new(id: ComponentId, ern: Ern, runtime: KestrelRuntime) -> Self {
        Self { id, ern, runtime }
    }

    /// Id of the component running the handler.
    #[must_use]
    pub const fn id(&self) -> ComponentId {
        self.id
    }

    /// Hierarchical name of the component running the handler.
    #[must_use]
    pub const fn ern(&self) -> &Ern {
        &self.ern
    }

    /// The runtime the component lives in.
    #[must_use]
    pub const fn runtime(&self) -> &KestrelRuntime {
        &self.runtime
    }

    /// Triggers `event` on `channel`.
    ///
    /// # Errors
    ///
    /// See [`Channel::trigger`].
    pub fn trigger<E: Event>(&self, event: E, channel: &Channel) -> Result<(), KestrelError> {
        trace!(from = %self.ern, channel = channel.name(), "trigger");
        channel.trigger(event)
    }

    /// Triggers `event` on `channel` at `priority`.
    ///
    /// # Errors
    ///
    /// See [`Channel::trigger`].
    pub fn trigger_with_priority<E: Event>(
        &self,
        event: E,
        channel: &Channel,
        priority: Priority,
    ) -> Result<(), KestrelError> {
        trace!(from = %self.ern, channel = channel.name(), %priority, "trigger");
        channel.trigger_with_priority(event, priority)
    }

    /// Triggers `event` through a shared membrane.
    ///
    /// # Errors
    ///
    /// See [`Membrane::trigger`].
    pub fn trigger_shared<E: Event>(&self, event: E, membrane: &Membrane) -> Result<(), KestrelError> {
        trace!(from = %self.ern, membrane = membrane.name(), "trigger through membrane");
        membrane.trigger(event)
    }

    /// Destroys this component once the running handler returns.
    pub fn destroy_self(&self) {
        if let Some(handle) = self.runtime.component(self.id) {
            tokio::spawn(handle.destroy());
        }
    }

    /// Asks the runtime to shut the whole tree down.
    pub fn request_shutdown(&self) {
        trace!(from = %self.ern, "shutdown requested");
        self.runtime.request_shutdown();
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.id)
            .field("ern", &self.ern)
            .finish_non_exhaustive()
    }
}
