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

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use acton_ern::Ern;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, instrument};

use crate::channel::{Channel, ChannelSpec, EventKind, Priority, Subscription};
use crate::common::{
    ComponentId, ControlRef, HandlerFn, KestrelError, KestrelRuntime, SubscriptionId,
};
use crate::component::{ComponentControl, ComponentHandle, Context, FaultPolicy, FaultTracker, Lifecycle};
use crate::dispatcher::{Hooks, Mailbox, Worker};
use crate::membrane::Membrane;
use crate::traits::{view_as, Event};

struct PendingSubscription {
    channel: Channel,
    kind: EventKind,
    priority: Priority,
    handler: usize,
}

/// A component being wired, in the `Uninitialized` state.
///
/// Handlers are registered as typed closures, one per (channel, event kind)
/// pair. Nothing runs until [`create`](Self::create), which registers the
/// subscriptions and spawns the component's worker.
///
/// ```rust,ignore
/// let mut counter = runtime.new_component::<Counter>("counter")?;
/// let ticks = counter.create_channel(ChannelSpec::new("ticks").carries::<Tick>());
/// counter
///     .subscribe::<Tick, _>(&ticks, Priority::Normal, |state, tick, _ctx| {
///         state.total += tick.amount;
///         Ok(())
///     })?
///     .on_destroy(|state, _ctx| {
///         tracing::info!(total = state.total, "counter done");
///         Ok(())
///     });
/// let counter = counter.create()?;
/// ```
pub struct ComponentBuilder<S: Send + 'static> {
    runtime: KestrelRuntime,
    id: ComponentId,
    name: String,
    ern: Ern,
    parent: Option<ControlRef>,
    state: S,
    mailbox: Arc<Mailbox>,
    handlers: Vec<HandlerFn<S>>,
    pending: Vec<PendingSubscription>,
    channels: Vec<Channel>,
    hooks: Hooks<S>,
    fault_policy: FaultPolicy,
}

impl<S: Send + 'static> ComponentBuilder<S> {
    pub(crate) fn new(
        runtime: KestrelRuntime,
        name: &str,
        parent: Option<ControlRef>,
        state: S,
    ) -> Result<Self, KestrelError> {
        if name.is_empty() || name.chars().any(|c| c.is_whitespace() || c == '/' || c == ':') {
            return Err(KestrelError::InvalidName {
                name: name.to_string(),
                reason: "names are non-empty and contain no whitespace, `/` or `:`".to_string(),
            });
        }
        let own = Ern::with_root(name).map_err(|e| KestrelError::InvalidName {
            name: name.to_string(),
            reason: e.to_string(),
        })?;
        let ern = match &parent {
            Some(parent) if parent.is_destroying() => {
                return Err(KestrelError::ComponentDestroyed(parent.name.clone()));
            }
            Some(parent) => parent.ern.clone() + own,
            None => own,
        };
        let burst = runtime.config().limits.priority_burst;
        Ok(Self {
            runtime,
            id: ComponentId::next(),
            name: name.to_string(),
            ern,
            parent,
            state,
            mailbox: Arc::new(Mailbox::new(burst)),
            handlers: Vec::new(),
            pending: Vec::new(),
            channels: Vec::new(),
            hooks: Hooks::default(),
            fault_policy: FaultPolicy::default(),
        })
    }

    /// Id the component will have once created.
    #[must_use]
    pub const fn id(&self) -> ComponentId {
        self.id
    }

    /// The name given at construction.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Hierarchical name, including the parent's.
    #[must_use]
    pub const fn ern(&self) -> &Ern {
        &self.ern
    }

    /// The initial state.
    #[must_use]
    pub const fn state(&self) -> &S {
        &self.state
    }

    /// Mutable access to the initial state, for wiring that needs the component's channels.
    pub fn state_mut(&mut self) -> &mut S {
        &mut self.state
    }

    /// Creates a channel owned by this component.
    ///
    /// The channel is usable immediately, by this component and by others, and
    /// is closed when this component is destroyed.
    pub fn create_channel(&mut self, spec: ChannelSpec) -> Channel {
        let channel = self.runtime.register_channel(Channel::new(spec, Some(self.id)));
        self.channels.push(channel.clone());
        channel
    }

    /// Subscribes `handler` to events of kind `E`, including variants of `E`,
    /// triggered on `channel`.
    ///
    /// # Errors
    ///
    /// [`KestrelError::UnknownChannel`] if the channel is closed or belongs to
    /// another runtime.
    pub fn subscribe<E, F>(
        &mut self,
        channel: &Channel,
        priority: Priority,
        handler: F,
    ) -> Result<&mut Self, KestrelError>
    where
        E: Event,
        F: Fn(&mut S, &E, &Context) -> anyhow::Result<()> + Send + 'static,
    {
        if !self.runtime.knows_channel(channel) {
            return Err(KestrelError::UnknownChannel(channel.name().to_string()));
        }
        let erased: HandlerFn<S> = Box::new(move |state, event, context| {
            match view_as::<E>(event) {
                Some(event) => handler(state, event, context),
                None => {
                    error!(
                        expected = std::any::type_name::<E>(),
                        got = event.event_name(),
                        "event routed to a handler of another kind"
                    );
                    Ok(())
                }
            }
        });
        self.pending.push(PendingSubscription {
            channel: channel.clone(),
            kind: EventKind::of::<E>(),
            priority,
            handler: self.handlers.len(),
        });
        self.handlers.push(erased);
        Ok(self)
    }

    /// Subscribes `handler` to an out kind of a shared membrane.
    ///
    /// # Errors
    ///
    /// [`KestrelError::ContractViolation`] if `E` is not a declared out kind,
    /// [`KestrelError::MembraneTornDown`] once the sharing component is gone.
    pub fn subscribe_shared<E, F>(
        &mut self,
        membrane: &Membrane,
        priority: Priority,
        handler: F,
    ) -> Result<&mut Self, KestrelError>
    where
        E: Event,
        F: Fn(&mut S, &E, &Context) -> anyhow::Result<()> + Send + 'static,
    {
        let channel = membrane.out_channel(&EventKind::of::<E>())?;
        self.subscribe::<E, F>(&channel, priority, handler)
    }

    /// Runs once after creation, before start.
    pub fn on_initialize<F>(&mut self, hook: F) -> &mut Self
    where
        F: FnOnce(&mut S, &Context) -> anyhow::Result<()> + Send + 'static,
    {
        self.hooks.initialize = Some(Box::new(hook));
        self
    }

    /// Runs once when the component starts, before any queued event.
    pub fn on_start<F>(&mut self, hook: F) -> &mut Self
    where
        F: FnOnce(&mut S, &Context) -> anyhow::Result<()> + Send + 'static,
    {
        self.hooks.start = Some(Box::new(hook));
        self
    }

    /// Runs once at teardown, after the last handler.
    pub fn on_destroy<F>(&mut self, hook: F) -> &mut Self
    where
        F: FnOnce(&mut S, &Context) -> anyhow::Result<()> + Send + 'static,
    {
        self.hooks.destroy = Some(Box::new(hook));
        self
    }

    /// Sets what happens after a handler fault. Defaults to [`FaultPolicy::Continue`].
    pub fn with_fault_policy(&mut self, policy: FaultPolicy) -> &mut Self {
        self.fault_policy = policy;
        self
    }

    /// Registers the component and its subscriptions and spawns its worker.
    ///
    /// The component is `Created`: events reaching it are queued until
    /// [`ComponentHandle::start`].
    ///
    /// # Errors
    ///
    /// [`KestrelError::ComponentDestroyed`] if the parent is gone,
    /// [`KestrelError::UnknownChannel`] if a subscribed channel closed meanwhile.
    #[instrument(skip(self), fields(component = %self.ern))]
    pub fn create(self) -> Result<ComponentHandle, KestrelError> {
        if let Some(parent) = &self.parent {
            if parent.is_destroying() {
                return Err(KestrelError::ComponentDestroyed(parent.name.clone()));
            }
        }

        let (lifecycle, lifecycle_rx) = watch::channel(Lifecycle::Created);
        let control: ControlRef = Arc::new(ComponentControl {
            id: self.id,
            name: self.name,
            ern: self.ern,
            parent: self.parent.as_ref().map(|p| p.id),
            mailbox: self.mailbox,
            lifecycle,
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
            destroying: AtomicBool::new(false),
            subscriptions: Mutex::new(Vec::new()),
            channels: Mutex::new(self.channels),
            membranes: Mutex::new(Vec::new()),
            children: Mutex::new(Vec::new()),
        });

        let mut registered: Vec<(Channel, SubscriptionId)> = Vec::with_capacity(self.pending.len());
        for pending in self.pending {
            let subscription = Subscription {
                id: SubscriptionId::next(),
                kind: pending.kind,
                owner: control.id,
                handler: pending.handler,
                priority: pending.priority,
                mailbox: Arc::clone(&control.mailbox),
            };
            let known = self.runtime.knows_channel(&pending.channel);
            match pending.channel.subscribe(subscription) {
                Ok(id) if known => registered.push((pending.channel, id)),
                outcome => {
                    if let Ok(id) = outcome {
                        pending.channel.unsubscribe(id);
                    }
                    for (channel, id) in &registered {
                        channel.unsubscribe(*id);
                    }
                    for channel in control.channels.lock().drain(..) {
                        channel.close();
                        self.runtime.forget_channel(&channel);
                    }
                    return Err(KestrelError::UnknownChannel(pending.channel.name().to_string()));
                }
            }
        }
        *control.subscriptions.lock() = registered;

        if let Err(error) = self.runtime.register_component(&control) {
            control.detach_subscriptions();
            for channel in control.channels.lock().drain(..) {
                channel.close();
                self.runtime.forget_channel(&channel);
            }
            return Err(error);
        }

        let worker = Worker {
            state: self.state,
            handlers: self.handlers,
            hooks: self.hooks,
            faults: FaultTracker::new(self.fault_policy),
            control: Arc::clone(&control),
            context: Context::new(control.id, control.ern.clone(), self.runtime.clone()),
            batch: self.runtime.config().limits.dispatch_batch,
        };
        control.tracker.spawn(worker.run(lifecycle_rx));
        control.tracker.close();

        debug!(id = %control.id, "created");
        Ok(ComponentHandle::new(control, self.runtime))
    }
}
