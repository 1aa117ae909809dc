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
use std::sync::Arc;

use parking_lot::RwLock;
use static_assertions::assert_impl_all;
use tracing::trace;

use crate::channel::{ChannelSpec, EventKind, Priority};
use crate::common::{ChannelId, ComponentId, KestrelError, SubscriptionId};
use crate::dispatcher::{Invocation, Mailbox};
use crate::traits::Event;

/// A typed event bus: an ordered routing table of subscriptions.
///
/// Triggering an event enqueues one invocation for every subscription whose
/// kind the event can be viewed as, in registration order. A channel with no
/// subscribers accepts the event and does nothing with it.
///
/// Cloning a `Channel` clones the handle; both refer to the same bus.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<ChannelInner>,
}

struct ChannelInner {
    id: ChannelId,
    name: String,
    owner: Option<ComponentId>,
    carries: Vec<EventKind>,
    routing: RwLock<Routing>,
}

#[derive(Default)]
struct Routing {
    closed: bool,
    subscriptions: Vec<Subscription>,
}

/// Binds a kind on one channel to one handler of one component.
pub(crate) struct Subscription {
    pub(crate) id: SubscriptionId,
    pub(crate) kind: EventKind,
    pub(crate) owner: ComponentId,
    pub(crate) handler: usize,
    pub(crate) priority: Priority,
    pub(crate) mailbox: Arc<Mailbox>,
}

impl Channel {
    pub(crate) fn new(spec: ChannelSpec, owner: Option<ComponentId>) -> Self {
        Self {
            inner: Arc::new(ChannelInner {
                id: ChannelId::next(),
                name: spec.name,
                owner,
                carries: spec.carries,
                routing: RwLock::new(Routing::default()),
            }),
        }
    }

    /// Channel id.
    #[must_use]
    pub fn id(&self) -> ChannelId {
        self.inner.id
    }

    /// Channel name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The component that created the channel; `None` for runtime channels.
    #[must_use]
    pub fn owner(&self) -> Option<ComponentId> {
        self.inner.owner
    }

    /// The declared kinds.
    #[must_use]
    pub fn carries(&self) -> &[EventKind] {
        &self.inner.carries
    }

    /// Whether `kind` is one of the declared kinds.
    #[must_use]
    pub fn carries_kind(&self, kind: &EventKind) -> bool {
        self.inner.carries.contains(kind)
    }

    /// Whether `event` is one of the declared kinds or a variant of one.
    #[must_use]
    pub fn accepts(&self, event: &dyn Event) -> bool {
        self.inner.carries.iter().any(|kind| kind.matches(event))
    }

    /// Whether the owning component has been destroyed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.routing.read().closed
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.inner.routing.read().subscriptions.len()
    }

    /// Triggers `event`; each subscription receives it at its own priority.
    ///
    /// # Errors
    ///
    /// [`KestrelError::UndeclaredEvent`] when the channel does not carry the
    /// event, [`KestrelError::ChannelClosed`] once the owner is destroyed.
    pub fn trigger<E: Event>(&self, event: E) -> Result<(), KestrelError> {
        self.publish(Arc::new(event), None).map(|_| ())
    }

    /// Triggers `event` at `priority`, overriding the subscriptions' priorities.
    ///
    /// # Errors
    ///
    /// As for [`trigger`](Self::trigger).
    pub fn trigger_with_priority<E: Event>(
        &self,
        event: E,
        priority: Priority,
    ) -> Result<(), KestrelError> {
        self.publish(Arc::new(event), Some(priority)).map(|_| ())
    }

    /// Routes an already shared event, returning how many invocations were queued.
    pub(crate) fn publish(
        &self,
        event: Arc<dyn Event>,
        priority: Option<Priority>,
    ) -> Result<usize, KestrelError> {
        if !self.accepts(event.as_ref()) {
            return Err(KestrelError::UndeclaredEvent {
                channel: self.inner.name.clone(),
                event: event.event_name(),
            });
        }
        let routing = self.inner.routing.read();
        if routing.closed {
            return Err(KestrelError::ChannelClosed(self.inner.name.clone()));
        }
        let mut queued = 0;
        for subscription in routing
            .subscriptions
            .iter()
            .filter(|s| s.kind.matches(event.as_ref()))
        {
            let invocation = Invocation {
                handler: subscription.handler,
                priority: priority.unwrap_or(subscription.priority),
                event: Arc::clone(&event),
            };
            if subscription.mailbox.enqueue(invocation) {
                queued += 1;
            }
        }
        trace!(
            channel = %self.inner.name,
            event = event.event_name(),
            queued,
            "triggered"
        );
        Ok(queued)
    }

    pub(crate) fn subscribe(&self, subscription: Subscription) -> Result<SubscriptionId, KestrelError> {
        let mut routing = self.inner.routing.write();
        if routing.closed {
            return Err(KestrelError::ChannelClosed(self.inner.name.clone()));
        }
        let id = subscription.id;
        trace!(
            channel = %self.inner.name,
            kind = subscription.kind.name(),
            owner = %subscription.owner,
            priority = %subscription.priority,
            "subscribed"
        );
        routing.subscriptions.push(subscription);
        Ok(id)
    }

    pub(crate) fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut routing = self.inner.routing.write();
        let before = routing.subscriptions.len();
        routing.subscriptions.retain(|s| s.id != id);
        routing.subscriptions.len() != before
    }

    /// Removes every subscription matching `owner` and `kind`.
    pub(crate) fn unsubscribe_kind(&self, owner: ComponentId, kind: &EventKind) -> Vec<SubscriptionId> {
        let mut routing = self.inner.routing.write();
        let mut removed = Vec::new();
        routing.subscriptions.retain(|s| {
            let hit = s.owner == owner && s.kind == *kind;
            if hit {
                removed.push(s.id);
            }
            !hit
        });
        removed
    }

    /// Closes the channel and drops every subscription on it.
    pub(crate) fn close(&self) {
        let mut routing = self.inner.routing.write();
        routing.closed = true;
        routing.subscriptions.clear();
    }

    pub(crate) fn same_channel(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl PartialEq for Channel {
    fn eq(&self, other: &Self) -> bool {
        self.same_channel(other)
    }
}

impl Eq for Channel {}

assert_impl_all!(Channel: Send, Sync, Clone);

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("carries", &self.inner.carries)
            .finish()
    }
}
