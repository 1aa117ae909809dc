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

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace};

use crate::channel::{Channel, ChannelSpec};
use crate::common::{
    ChannelId, ComponentId, ComponentInfo, ControlRef, KestrelConfig, KestrelError, Traversal,
};
use crate::component::{ComponentBuilder, ComponentHandle};
use crate::membrane::Membrane;

/// Handle to a running Kestrel system.
///
/// Owns the component arena, the channel registry and the membrane table.
/// Cloning is cheap; all clones refer to the same runtime.
#[derive(Clone)]
pub struct KestrelRuntime(pub(crate) Arc<RuntimeInner>);

pub(crate) struct RuntimeInner {
    components: DashMap<ComponentId, ControlRef>,
    roots: Mutex<Vec<ComponentId>>,
    channels: DashMap<ChannelId, Channel>,
    membranes: DashMap<String, Membrane>,
    shutdown_signal: CancellationToken,
    config: KestrelConfig,
}

impl KestrelRuntime {
    pub(crate) fn new(config: KestrelConfig) -> Self {
        Self(Arc::new(RuntimeInner {
            components: DashMap::new(),
            roots: Mutex::new(Vec::new()),
            channels: DashMap::new(),
            membranes: DashMap::new(),
            shutdown_signal: CancellationToken::new(),
            config,
        }))
    }

    /// The configuration this runtime was launched with.
    #[must_use]
    pub fn config(&self) -> &KestrelConfig {
        &self.0.config
    }

    /// Starts building a root component with default state.
    ///
    /// # Errors
    ///
    /// [`KestrelError::InvalidName`] if `name` cannot form an identifier.
    pub fn new_component<S: Default + Send + 'static>(
        &self,
        name: &str,
    ) -> Result<ComponentBuilder<S>, KestrelError> {
        self.new_component_with_state(name, S::default())
    }

    /// Starts building a root component with the given state.
    ///
    /// # Errors
    ///
    /// [`KestrelError::InvalidName`] if `name` cannot form an identifier.
    pub fn new_component_with_state<S: Send + 'static>(
        &self,
        name: &str,
        state: S,
    ) -> Result<ComponentBuilder<S>, KestrelError> {
        ComponentBuilder::new(self.clone(), name, None, state)
    }

    /// Starts building a child of `parent` with default state.
    ///
    /// # Errors
    ///
    /// [`KestrelError::ComponentDestroyed`] if the parent is being destroyed,
    /// [`KestrelError::InvalidName`] for a bad name.
    pub fn new_child<S: Default + Send + 'static>(
        &self,
        parent: &ComponentHandle,
        name: &str,
    ) -> Result<ComponentBuilder<S>, KestrelError> {
        self.new_child_with_state(parent, name, S::default())
    }

    /// Starts building a child of `parent` with the given state.
    ///
    /// # Errors
    ///
    /// As for [`new_child`](Self::new_child).
    pub fn new_child_with_state<S: Send + 'static>(
        &self,
        parent: &ComponentHandle,
        name: &str,
        state: S,
    ) -> Result<ComponentBuilder<S>, KestrelError> {
        ComponentBuilder::new(self.clone(), name, Some(Arc::clone(parent.control())), state)
    }

    /// Creates a channel owned by the runtime rather than by a component.
    ///
    /// Such channels stay open until [`shutdown_all`](Self::shutdown_all).
    pub fn create_channel(&self, spec: ChannelSpec) -> Channel {
        self.register_channel(Channel::new(spec, None))
    }

    /// Looks up a live component.
    #[must_use]
    pub fn component(&self, id: ComponentId) -> Option<ComponentHandle> {
        self.0
            .components
            .get(&id)
            .map(|control| ComponentHandle::new(Arc::clone(control.value()), self.clone()))
    }

    /// Root components, in creation order.
    #[must_use]
    pub fn roots(&self) -> Vec<ComponentHandle> {
        let ids = self.0.roots.lock().clone();
        ids.into_iter().filter_map(|id| self.component(id)).collect()
    }

    /// Number of live components.
    #[must_use]
    pub fn component_count(&self) -> usize {
        self.0.components.len()
    }

    /// Starts every root and, through them, the whole tree.
    ///
    /// # Errors
    ///
    /// See [`ComponentHandle::start`].
    pub fn start_all(&self) -> Result<(), KestrelError> {
        for root in self.roots() {
            root.start()?;
        }
        Ok(())
    }

    /// Finds the membrane registered under `name`.
    ///
    /// # Errors
    ///
    /// [`KestrelError::UnknownMembrane`] if there is none.
    pub fn shared_membrane(&self, name: &str) -> Result<Membrane, KestrelError> {
        self.0
            .membranes
            .get(name)
            .map(|membrane| membrane.value().clone())
            .ok_or_else(|| KestrelError::UnknownMembrane(name.to_string()))
    }

    /// Snapshots the component tree and logs every node.
    #[must_use]
    pub fn walk(&self, traversal: Traversal) -> Vec<ComponentInfo> {
        let mut visited = Vec::new();
        match traversal {
            Traversal::DepthFirst => {
                let mut stack: Vec<(ComponentHandle, usize)> =
                    self.roots().into_iter().rev().map(|root| (root, 0)).collect();
                while let Some((handle, depth)) = stack.pop() {
                    stack.extend(handle.children().into_iter().rev().map(|c| (c, depth + 1)));
                    visited.push(Self::describe(&handle, depth));
                }
            }
            Traversal::BreadthFirst => {
                let mut queue: VecDeque<(ComponentHandle, usize)> =
                    self.roots().into_iter().map(|root| (root, 0)).collect();
                while let Some((handle, depth)) = queue.pop_front() {
                    queue.extend(handle.children().into_iter().map(|c| (c, depth + 1)));
                    visited.push(Self::describe(&handle, depth));
                }
            }
        }
        for info in &visited {
            info!(
                depth = info.depth,
                id = %info.id,
                name = %info.name,
                lifecycle = %info.lifecycle,
                channels = ?info.channels,
                "component"
            );
        }
        visited
    }

    fn describe(handle: &ComponentHandle, depth: usize) -> ComponentInfo {
        ComponentInfo {
            id: handle.id(),
            name: handle.name().to_string(),
            parent: handle.parent(),
            depth,
            lifecycle: handle.lifecycle(),
            channels: handle
                .channels()
                .iter()
                .map(|channel| channel.name().to_string())
                .collect(),
        }
    }

    /// Signals [`run_until_shutdown`](Self::run_until_shutdown) to tear the tree down.
    pub fn request_shutdown(&self) {
        self.0.shutdown_signal.cancel();
    }

    /// Whether a shutdown has been requested.
    #[must_use]
    pub fn shutdown_requested(&self) -> bool {
        self.0.shutdown_signal.is_cancelled()
    }

    /// Waits for a shutdown request, then shuts everything down.
    ///
    /// # Errors
    ///
    /// See [`shutdown_all`](Self::shutdown_all).
    pub async fn run_until_shutdown(&self) -> Result<(), KestrelError> {
        self.0.shutdown_signal.cancelled().await;
        self.shutdown_all().await
    }

    /// Destroys every root, each subtree bottom-up, then closes the runtime's channels.
    ///
    /// # Errors
    ///
    /// [`KestrelError::ShutdownTimeout`] if the components do not finish within
    /// the configured system shutdown timeout.
    #[instrument(skip(self))]
    pub async fn shutdown_all(&self) -> Result<(), KestrelError> {
        self.0.shutdown_signal.cancel();
        let roots = self.roots();
        let timeout = self.0.config.system_shutdown_timeout();
        trace!(roots = roots.len(), "shutting down");

        let outcome =
            tokio::time::timeout(timeout, join_all(roots.iter().map(ComponentHandle::destroy)))
                .await;

        for entry in &self.0.channels {
            entry.value().close();
        }
        self.0.channels.clear();

        if outcome.is_err() {
            error!(?timeout, "shutdown timed out");
            return Err(KestrelError::ShutdownTimeout(timeout));
        }
        debug!("shutdown complete");
        Ok(())
    }

    pub(crate) fn register_channel(&self, channel: Channel) -> Channel {
        self.0.channels.insert(channel.id(), channel.clone());
        channel
    }

    pub(crate) fn knows_channel(&self, channel: &Channel) -> bool {
        self.0
            .channels
            .get(&channel.id())
            .is_some_and(|known| known.same_channel(channel) && !known.is_closed())
    }

    pub(crate) fn forget_channel(&self, channel: &Channel) {
        self.0.channels.remove(&channel.id());
    }

    pub(crate) fn register_component(&self, control: &ControlRef) -> Result<(), KestrelError> {
        match control.parent {
            Some(parent_id) => {
                let parent = self
                    .0
                    .components
                    .get(&parent_id)
                    .map(|p| Arc::clone(p.value()))
                    .ok_or_else(|| KestrelError::ComponentDestroyed(parent_id.to_string()))?;
                let mut children = parent.children.lock();
                if parent.is_destroying() {
                    return Err(KestrelError::ComponentDestroyed(parent.name.clone()));
                }
                children.push(control.id);
                self.0.components.insert(control.id, Arc::clone(control));
            }
            None => {
                self.0.roots.lock().push(control.id);
                self.0.components.insert(control.id, Arc::clone(control));
            }
        }
        Ok(())
    }

    pub(crate) fn forget_component(&self, control: &ControlRef) {
        self.0.components.remove(&control.id);
        match control.parent {
            Some(parent_id) => {
                let parent = self.0.components.get(&parent_id).map(|p| Arc::clone(p.value()));
                if let Some(parent) = parent {
                    parent.children.lock().retain(|id| *id != control.id);
                }
            }
            None => self.0.roots.lock().retain(|id| *id != control.id),
        }
    }

    pub(crate) fn register_membrane(&self, membrane: &Membrane) -> Result<(), KestrelError> {
        match self.0.membranes.entry(membrane.name().to_string()) {
            Entry::Occupied(_) => Err(KestrelError::MembraneExists(membrane.name().to_string())),
            Entry::Vacant(slot) => {
                slot.insert(membrane.clone());
                Ok(())
            }
        }
    }

    pub(crate) fn forget_membrane(&self, name: &str, owner: ComponentId) {
        self.0
            .membranes
            .remove_if(name, |_, membrane| membrane.owner() == owner);
    }
}

impl fmt::Debug for KestrelRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KestrelRuntime")
            .field("components", &self.0.components.len())
            .field("channels", &self.0.channels.len())
            .field("membranes", &self.0.membranes.len())
            .finish_non_exhaustive()
    }
}
