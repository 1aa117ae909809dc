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

use tracing::{debug, trace};

use crate::channel::{Channel, EventKind, Priority};
use crate::common::{ComponentId, ControlRef, KestrelError, KestrelRuntime};
use crate::traits::Event;

#[derive(Clone)]
pub(crate) struct Port {
    pub(crate) kind: EventKind,
    pub(crate) channel: Channel,
}

impl fmt::Debug for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} -> {}", self.kind, self.channel.name())
    }
}

/// Declares the contract of a [`Membrane`] before it is sealed.
///
/// Obtained from [`ComponentHandle::share`](crate::prelude::ComponentHandle::share).
///
/// ```rust,ignore
/// let membrane = timer
///     .share("kestrel.timer")
///     .in_channel::<ScheduleTimeout>(&requests)?
///     .in_channel::<CancelTimeout>(&requests)?
///     .out_channel::<Timeout>(&signals)?
///     .seal()?;
/// ```
#[derive(Debug)]
pub struct MembraneBuilder {
    runtime: KestrelRuntime,
    owner: ControlRef,
    name: String,
    ins: Vec<Port>,
    outs: Vec<Port>,
}

impl MembraneBuilder {
    pub(crate) fn new(runtime: KestrelRuntime, owner: ControlRef, name: String) -> Self {
        Self {
            runtime,
            owner,
            name,
            ins: Vec::new(),
            outs: Vec::new(),
        }
    }

    /// Accepts `E` (and its variants) from consumers, routing it to `target`.
    ///
    /// # Errors
    ///
    /// [`KestrelError::UndeclaredEvent`] if `target` does not carry `E`,
    /// [`KestrelError::UnknownChannel`] if it is closed or foreign.
    pub fn in_channel<E: Event>(mut self, target: &Channel) -> Result<Self, KestrelError> {
        let port = self.port::<E>(target)?;
        self.ins.push(port);
        Ok(self)
    }

    /// Lets consumers subscribe to `E` as emitted on `source`.
    ///
    /// # Errors
    ///
    /// As for [`in_channel`](Self::in_channel).
    pub fn out_channel<E: Event>(mut self, source: &Channel) -> Result<Self, KestrelError> {
        let port = self.port::<E>(source)?;
        self.outs.push(port);
        Ok(self)
    }

    fn port<E: Event>(&self, channel: &Channel) -> Result<Port, KestrelError> {
        let kind = EventKind::of::<E>();
        if !self.runtime.knows_channel(channel) {
            return Err(KestrelError::UnknownChannel(channel.name().to_string()));
        }
        if !channel.carries_kind(&kind) {
            return Err(KestrelError::UndeclaredEvent {
                channel: channel.name().to_string(),
                event: kind.name(),
            });
        }
        Ok(Port {
            kind,
            channel: channel.clone(),
        })
    }

    /// Freezes the contract and registers it under its name.
    ///
    /// The registration lasts until the sharing component is destroyed.
    ///
    /// # Errors
    ///
    /// [`KestrelError::MembraneExists`] if the name is taken,
    /// [`KestrelError::ComponentDestroyed`] if the sharing component is gone.
    pub fn seal(self) -> Result<Membrane, KestrelError> {
        let membrane = Membrane(Arc::new(MembraneInner {
            name: self.name,
            owner: self.owner,
            ins: self.ins,
            outs: self.outs,
        }));
        let owner = &membrane.0.owner;
        let mut owned = owner.membranes.lock();
        if owner.is_destroying() {
            return Err(KestrelError::ComponentDestroyed(owner.name.clone()));
        }
        self.runtime.register_membrane(&membrane)?;
        owned.push(membrane.0.name.clone());
        debug!(
            membrane = %membrane.0.name,
            owner = %owner.ern,
            ins = ?membrane.0.ins,
            outs = ?membrane.0.outs,
            "membrane sealed"
        );
        drop(owned);
        Ok(membrane)
    }
}

/// A sealed contract exposing one component as a shared service.
///
/// Consumers may trigger only the declared in kinds and subscribe only to the
/// declared out kinds; the sharing component's other channels stay private.
/// Once the sharing component is destroyed every operation fails with
/// [`KestrelError::MembraneTornDown`].
#[derive(Clone)]
pub struct Membrane(Arc<MembraneInner>);

struct MembraneInner {
    name: String,
    owner: ControlRef,
    ins: Vec<Port>,
    outs: Vec<Port>,
}

impl Membrane {
    /// Registered name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// The sharing component.
    #[must_use]
    pub fn owner(&self) -> ComponentId {
        self.0.owner.id
    }

    /// Declared in kinds.
    #[must_use]
    pub fn in_kinds(&self) -> Vec<EventKind> {
        self.0.ins.iter().map(|port| port.kind).collect()
    }

    /// Declared out kinds.
    #[must_use]
    pub fn out_kinds(&self) -> Vec<EventKind> {
        self.0.outs.iter().map(|port| port.kind).collect()
    }

    /// Whether the sharing component is destroyed or being destroyed.
    #[must_use]
    pub fn is_torn_down(&self) -> bool {
        self.0.owner.is_destroying()
    }

    /// Whether `event` matches a declared in kind.
    #[must_use]
    pub fn accepts(&self, event: &dyn Event) -> bool {
        self.0.ins.iter().any(|port| port.kind.matches(event))
    }

    /// Triggers `event` on the sharing component's channel for its kind.
    ///
    /// # Errors
    ///
    /// [`KestrelError::ContractViolation`] for an undeclared kind; the event
    /// never reaches the component. [`KestrelError::MembraneTornDown`] once
    /// the component is gone.
    pub fn trigger<E: Event>(&self, event: E) -> Result<(), KestrelError> {
        self.publish(Arc::new(event), None).map(|_| ())
    }

    /// As [`trigger`](Self::trigger), at `priority`.
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

    pub(crate) fn publish(
        &self,
        event: Arc<dyn Event>,
        priority: Option<Priority>,
    ) -> Result<usize, KestrelError> {
        if self.is_torn_down() {
            return Err(KestrelError::MembraneTornDown(self.0.name.clone()));
        }
        let Some(port) = self.0.ins.iter().find(|port| port.kind.matches(event.as_ref())) else {
            trace!(membrane = %self.0.name, event = event.event_name(), "rejected undeclared event");
            return Err(KestrelError::ContractViolation {
                membrane: self.0.name.clone(),
                event: event.event_name(),
            });
        };
        port.channel
            .publish(event, priority)
            .map_err(|error| match error {
                KestrelError::ChannelClosed(_) => KestrelError::MembraneTornDown(self.0.name.clone()),
                other => other,
            })
    }

    /// The channel carrying the out kind `kind`.
    pub(crate) fn out_channel(&self, kind: &EventKind) -> Result<Channel, KestrelError> {
        if self.is_torn_down() {
            return Err(KestrelError::MembraneTornDown(self.0.name.clone()));
        }
        self.0
            .outs
            .iter()
            .find(|port| port.kind == *kind)
            .map(|port| port.channel.clone())
            .ok_or_else(|| KestrelError::ContractViolation {
                membrane: self.0.name.clone(),
                event: kind.name(),
            })
    }
}

impl fmt::Debug for Membrane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Membrane")
            .field("name", &self.0.name)
            .field("owner", &self.0.owner.id)
            .field("ins", &self.0.ins)
            .field("outs", &self.0.outs)
            .finish()
    }
}
