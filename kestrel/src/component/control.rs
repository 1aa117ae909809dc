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

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use acton_ern::Ern;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::channel::Channel;
use crate::common::{ComponentId, SubscriptionId};
use crate::component::Lifecycle;
use crate::dispatcher::Mailbox;

/// The runtime's record of a live component.
///
/// Parent and child links are ids, resolved through the runtime's arena.
pub(crate) struct ComponentControl {
    pub(crate) id: ComponentId,
    pub(crate) name: String,
    pub(crate) ern: Ern,
    pub(crate) parent: Option<ComponentId>,
    pub(crate) mailbox: Arc<Mailbox>,
    pub(crate) lifecycle: watch::Sender<Lifecycle>,
    pub(crate) cancel: CancellationToken,
    pub(crate) tracker: TaskTracker,
    pub(crate) destroying: AtomicBool,
    pub(crate) subscriptions: Mutex<Vec<(Channel, SubscriptionId)>>,
    pub(crate) channels: Mutex<Vec<Channel>>,
    pub(crate) membranes: Mutex<Vec<String>>,
    pub(crate) children: Mutex<Vec<ComponentId>>,
}

impl ComponentControl {
    pub(crate) fn lifecycle(&self) -> Lifecycle {
        *self.lifecycle.borrow()
    }

    pub(crate) fn is_destroying(&self) -> bool {
        self.destroying.load(Ordering::SeqCst)
    }

    /// Removes every subscription this component holds, on every channel.
    pub(crate) fn detach_subscriptions(&self) -> usize {
        let subscriptions = std::mem::take(&mut *self.subscriptions.lock());
        subscriptions
            .iter()
            .filter(|(channel, id)| channel.unsubscribe(*id))
            .count()
    }
}

impl std::fmt::Debug for ComponentControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentControl")
            .field("id", &self.id)
            .field("ern", &self.ern)
            .field("lifecycle", &self.lifecycle())
            .finish_non_exhaustive()
    }
}
