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
use std::hash::{Hash, Hasher};
use std::sync::atomic::Ordering;

use acton_ern::Ern;
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use static_assertions::assert_impl_all;
use tracing::{debug, error, trace};

use crate::channel::{Channel, EventKind};
use crate::common::{ComponentId, ControlRef, KestrelError, KestrelRuntime};
use crate::component::{DestroyOrder, Lifecycle};
use crate::membrane::MembraneBuilder;
use crate::traits::Event;

/// A cheap, cloneable reference to a created component.
#[derive(Clone)]
pub struct ComponentHandle {
    control: ControlRef,
    runtime: KestrelRuntime,
}

impl ComponentHandle {
    pub(crate) const fn new(control: ControlRef, runtime: KestrelRuntime) -> Self {
        Self { control, runtime }
    }

    pub(crate) const fn control(&self) -> &ControlRef {
        &self.control
    }

    /// Component id.
    #[must_use]
    pub fn id(&self) -> ComponentId {
        self.control.id
    }

    /// The name given at construction.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.control.name
    }

    /// Hierarchical name.
    #[must_use]
    pub fn ern(&self) -> &Ern {
        &self.control.ern
    }

    /// Parent id, `None` for roots.
    #[must_use]
    pub fn parent(&self) -> Option<ComponentId> {
        self.control.parent
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn lifecycle(&self) -> Lifecycle {
        self.control.lifecycle()
    }

    /// Live children, in creation order.
    #[must_use]
    pub fn children(&self) -> Vec<Self> {
        let ids = self.control.children.lock().clone();
        ids.into_iter()
            .filter_map(|id| self.runtime.component(id))
            .collect()
    }

    /// Channels this component created.
    #[must_use]
    pub fn channels(&self) -> Vec<Channel> {
        self.control.channels.lock().clone()
    }

    /// Invocations waiting in the component's queue.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.control.mailbox.len()
    }

    /// Starts the component and then its descendants, top-down.
    ///
    /// Events queued while the component was `Created` are delivered from now
    /// on. Starting a started component does nothing.
    ///
    /// # Errors
    ///
    /// [`KestrelError::ComponentDestroyed`] if this component or a descendant
    /// is being destroyed.
    pub fn start(&self) -> Result<(), KestrelError> {
        if self.control.is_destroying() {
            return Err(KestrelError::ComponentDestroyed(self.control.name.clone()));
        }
        let started = self.control.lifecycle.send_if_modified(|state| {
            if *state == Lifecycle::Created {
                *state = Lifecycle::Started;
                true
            } else {
                false
            }
        });
        if started {
            debug!(component = %self.control.ern, "started");
        }
        for child in self.children() {
            child.start()?;
        }
        Ok(())
    }

    /// Removes this component's subscriptions for kind `E` on `channel`,
    /// returning how many were removed.
    pub fn unsubscribe<E: Event>(&self, channel: &Channel) -> usize {
        let removed = channel.unsubscribe_kind(self.control.id, &EventKind::of::<E>());
        self.control
            .subscriptions
            .lock()
            .retain(|(c, id)| !(c.same_channel(channel) && removed.contains(id)));
        removed.len()
    }

    /// Starts declaring a membrane that shares this component under `name`.
    #[must_use]
    pub fn share(&self, name: impl Into<String>) -> MembraneBuilder {
        MembraneBuilder::new(self.runtime.clone(), self.control.clone(), name.into())
    }

    /// Destroys the component, children first. See [`destroy_with`](Self::destroy_with).
    pub fn destroy(&self) -> BoxFuture<'static, ()> {
        self.destroy_with(DestroyOrder::BottomUp)
    }

    /// Destroys the component and its subtree.
    ///
    /// Its subscriptions are removed from every channel before anything else,
    /// and queued invocations are dropped, so no event reaches it afterwards.
    /// The running handler, if any, finishes; then the destroy hook runs, owned
    /// channels close and owned membranes are deregistered. Calling it again is
    /// harmless.
    ///
    /// Do not await this from one of the component's own handlers; use
    /// [`Context::destroy_self`](crate::prelude::Context::destroy_self).
    pub fn destroy_with(&self, order: DestroyOrder) -> BoxFuture<'static, ()> {
        let this = self.clone();
        async move {
            if this.control.destroying.swap(true, Ordering::SeqCst) {
                this.control.tracker.wait().await;
                return;
            }
            let detached = this.control.detach_subscriptions();
            let dropped = this.control.mailbox.close();
            trace!(component = %this.control.ern, detached, dropped, ?order, "destroying");

            match order {
                DestroyOrder::BottomUp => {
                    this.destroy_children(order).await;
                    this.stop_worker().await;
                }
                DestroyOrder::TopDown => {
                    this.stop_worker().await;
                    this.destroy_children(order).await;
                }
            }
            this.release();
            debug!(component = %this.control.ern, "destroyed");
        }
        .boxed()
    }

    async fn destroy_children(&self, order: DestroyOrder) {
        let children = self.children();
        if children.is_empty() {
            return;
        }
        trace!(component = %self.control.ern, count = children.len(), "destroying children");
        join_all(children.iter().map(|child| child.destroy_with(order))).await;
    }

    async fn stop_worker(&self) {
        self.control.cancel.cancel();
        let timeout = self.runtime.config().component_shutdown_timeout();
        if tokio::time::timeout(timeout, self.control.tracker.wait())
            .await
            .is_err()
        {
            error!(component = %self.control.ern, ?timeout, "worker did not stop in time");
        }
    }

    fn release(&self) {
        let channels = std::mem::take(&mut *self.control.channels.lock());
        for channel in channels {
            channel.close();
            self.runtime.forget_channel(&channel);
        }
        let membranes = std::mem::take(&mut *self.control.membranes.lock());
        for name in membranes {
            self.runtime.forget_membrane(&name, self.control.id);
        }
        self.runtime.forget_component(&self.control);
        self.control.lifecycle.send_replace(Lifecycle::Destroyed);
    }
}

impl PartialEq for ComponentHandle {
    fn eq(&self, other: &Self) -> bool {
        self.control.id == other.control.id
    }
}

impl Eq for ComponentHandle {}

assert_impl_all!(ComponentHandle: Send, Sync, Clone);

impl Hash for ComponentHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.control.id.hash(state);
    }
}

impl fmt::Debug for ComponentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentHandle")
            .field("id", &self.control.id)
            .field("ern", &self.control.ern)
            .field("lifecycle", &self.lifecycle())
            .finish()
    }
}
