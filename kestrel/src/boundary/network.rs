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

//! An in-process network behind a membrane.
//!
//! Peers attach a channel that carries [`NetDeliver`]; a [`NetSend`] addressed
//! to a peer is delivered on that channel. Best-effort sends are subject to the
//! configured loss rate. A reliable send to a peer that is not attached yet is
//! retried up to `connect_retries` times before it is reported as
//! [`DeliveryFailed`]. Without a `retry_delay` each retry is queued behind the
//! requests already waiting; with one, retries are scheduled on the shared
//! timer, which must be running when the network is spawned.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use kestrel_macro::kestrel_event;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, trace, warn};

use crate::channel::{Channel, ChannelSpec, EventKind, Priority};
use crate::common::{KestrelError, KestrelRuntime};
use crate::component::{ComponentHandle, Context};
use crate::membrane::Membrane;
use crate::timer::{ScheduleTimeout, Timeout, TimerId};
use crate::traits::{view_as, Event};

/// Address of a network participant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(String);

impl PeerId {
    /// A peer named `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The peer's name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How hard the network tries to deliver a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryGuarantee {
    /// Delivered unless the destination never attaches.
    #[default]
    Reliable,
    /// May be dropped silently.
    BestEffort,
}

/// Asks the network to carry `payload` from one peer to another.
#[kestrel_event]
pub struct NetSend {
    /// Sending peer.
    pub from: PeerId,
    /// Destination peer.
    pub to: PeerId,
    /// Delivery guarantee requested.
    pub guarantee: DeliveryGuarantee,
    payload: Arc<dyn Event>,
    attempts: u32,
}

impl NetSend {
    /// A reliable send of `payload`.
    pub fn new<E: Event>(from: PeerId, to: PeerId, payload: E) -> Self {
        Self {
            from,
            to,
            guarantee: DeliveryGuarantee::Reliable,
            payload: Arc::new(payload),
            attempts: 0,
        }
    }

    /// Downgrades the send to best effort.
    #[must_use]
    pub const fn best_effort(mut self) -> Self {
        self.guarantee = DeliveryGuarantee::BestEffort;
        self
    }

    /// The carried event.
    #[must_use]
    pub fn payload(&self) -> &dyn Event {
        self.payload.as_ref()
    }
}

/// A message handed to the destination peer.
#[kestrel_event]
pub struct NetDeliver {
    /// Sending peer.
    pub from: PeerId,
    /// Destination peer.
    pub to: PeerId,
    payload: Arc<dyn Event>,
}

impl NetDeliver {
    /// The carried event.
    #[must_use]
    pub fn payload(&self) -> &dyn Event {
        self.payload.as_ref()
    }

    /// The carried event viewed as `E`, if it is an `E` or a variant of it.
    #[must_use]
    pub fn payload_as<E: Event>(&self) -> Option<&E> {
        view_as::<E>(self.payload.as_ref())
    }
}

/// Attaches `peer` to the network; its messages arrive on `inbox`.
///
/// Attaching an attached peer replaces its inbox.
#[kestrel_event]
pub struct Attach {
    /// The attaching peer.
    pub peer: PeerId,
    inbox: Channel,
}

impl Attach {
    /// Attaches `peer` with `inbox` as its delivery channel.
    ///
    /// # Errors
    ///
    /// [`KestrelError::UndeclaredEvent`] if `inbox` does not carry [`NetDeliver`].
    pub fn new(peer: PeerId, inbox: &Channel) -> Result<Self, KestrelError> {
        if !inbox.carries_kind(&EventKind::of::<NetDeliver>()) {
            return Err(KestrelError::UndeclaredEvent {
                channel: inbox.name().to_string(),
                event: std::any::type_name::<NetDeliver>(),
            });
        }
        Ok(Self {
            peer,
            inbox: inbox.clone(),
        })
    }
}

/// Detaches `peer`; later sends to it are retried or fail.
#[kestrel_event]
pub struct Detach {
    /// The detaching peer.
    pub peer: PeerId,
}

/// A reliable send that could not be delivered.
#[kestrel_event]
pub struct DeliveryFailed {
    /// Sending peer.
    pub from: PeerId,
    /// Destination peer.
    pub to: PeerId,
    /// Why delivery failed.
    pub reason: String,
}

/// Settings for a [`LoopbackNetwork`].
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkSettings {
    /// Probability in `[0, 1]` that a best-effort send is dropped.
    pub loss_rate: f64,
    /// Retries for a reliable send whose destination is not attached.
    pub connect_retries: u32,
    /// Seed for the loss generator; drawn from the OS when absent.
    pub seed: Option<u64>,
    /// Pause before each retry. Zero retries at once.
    pub retry_delay: Duration,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            loss_rate: 0.0,
            connect_retries: 0,
            seed: None,
            retry_delay: Duration::ZERO,
        }
    }
}

/// A reliable send waiting out its retry delay.
#[kestrel_event(extends = timeout)]
struct RetryDue {
    timeout: Timeout,
    send: NetSend,
}

struct DelayedRetries {
    timer: Membrane,
    due: Channel,
    delay: Duration,
    next: u64,
}

struct NetworkState {
    peers: HashMap<PeerId, Channel>,
    loss_rate: f64,
    connect_retries: u32,
    rng: StdRng,
    requests: Option<Channel>,
    signals: Option<Channel>,
    delayed: Option<DelayedRetries>,
}

impl NetworkState {
    fn new(settings: &NetworkSettings) -> Self {
        let rng = match settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            peers: HashMap::new(),
            loss_rate: loss_probability(settings.loss_rate),
            connect_retries: settings.connect_retries,
            rng,
            requests: None,
            signals: None,
            delayed: None,
        }
    }

    fn send(&mut self, send: &NetSend, ctx: &Context) -> anyhow::Result<()> {
        if send.guarantee == DeliveryGuarantee::BestEffort && self.rng.random_bool(self.loss_rate) {
            trace!(from = %send.from, to = %send.to, "best-effort message lost");
            return Ok(());
        }
        let Some(inbox) = self.peers.get(&send.to) else {
            return self.unreachable(send, ctx);
        };
        let deliver = NetDeliver {
            from: send.from.clone(),
            to: send.to.clone(),
            payload: Arc::clone(&send.payload),
        };
        if let Err(error) = inbox.trigger(deliver) {
            warn!(to = %send.to, %error, "peer inbox is gone, detaching");
            self.peers.remove(&send.to);
            return self.unreachable(send, ctx);
        }
        Ok(())
    }

    fn unreachable(&mut self, send: &NetSend, ctx: &Context) -> anyhow::Result<()> {
        if send.guarantee == DeliveryGuarantee::BestEffort {
            trace!(to = %send.to, "best-effort message to an unknown peer dropped");
            return Ok(());
        }
        if send.attempts < self.connect_retries {
            let mut retry = send.clone();
            retry.attempts += 1;
            debug!(to = %send.to, attempt = retry.attempts, "peer not attached, retrying");
            return self.retry(retry, ctx);
        }
        warn!(from = %send.from, to = %send.to, attempts = send.attempts, "message undeliverable");
        if let Some(signals) = &self.signals {
            signals.trigger(DeliveryFailed {
                from: send.from.clone(),
                to: send.to.clone(),
                reason: format!("peer not attached after {} retries", send.attempts),
            })?;
        }
        Ok(())
    }

    fn retry(&mut self, send: NetSend, ctx: &Context) -> anyhow::Result<()> {
        if let Some(delayed) = &mut self.delayed {
            delayed.next += 1;
            let due = RetryDue {
                timeout: Timeout::new(TimerId::new(ctx.id(), delayed.next)),
                send,
            };
            let schedule = ScheduleTimeout::with_event(delayed.delay, due)?.deliver_to(&delayed.due);
            ctx.trigger_shared(schedule, &delayed.timer)?;
            return Ok(());
        }
        let requests = self
            .requests
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("network requests channel is missing"))?;
        ctx.trigger_with_priority(send, requests, Priority::Low)?;
        Ok(())
    }
}

/// NaN would make every loss draw panic, so it counts as no loss.
fn loss_probability(rate: f64) -> f64 {
    if rate.is_nan() {
        0.0
    } else {
        rate.clamp(0.0, 1.0)
    }
}

/// An in-process network component shared under a membrane.
///
/// The membrane accepts [`NetSend`], [`Attach`] and [`Detach`] and emits
/// [`DeliveryFailed`].
#[derive(Debug, Clone)]
pub struct LoopbackNetwork {
    handle: ComponentHandle,
    membrane: Membrane,
}

impl LoopbackNetwork {
    /// Spawns and starts a network shared under the configured default name.
    ///
    /// # Errors
    ///
    /// [`KestrelError::MembraneExists`] if that name is already shared.
    pub async fn spawn(
        runtime: &KestrelRuntime,
        settings: NetworkSettings,
    ) -> Result<Self, KestrelError> {
        let name = runtime.config().defaults.network_membrane.clone();
        Self::spawn_named(runtime, &name, settings).await
    }

    /// Spawns and starts a network shared under `membrane_name`.
    ///
    /// # Errors
    ///
    /// [`KestrelError::MembraneExists`] if the name is taken, or
    /// [`KestrelError::UnknownMembrane`] if `retry_delay` is set and no timer
    /// is shared under the configured timer name.
    pub async fn spawn_named(
        runtime: &KestrelRuntime,
        membrane_name: &str,
        settings: NetworkSettings,
    ) -> Result<Self, KestrelError> {
        let timer = if settings.retry_delay.is_zero() {
            None
        } else {
            Some(runtime.shared_membrane(&runtime.config().defaults.timer_membrane)?)
        };
        let mut builder =
            runtime.new_component_with_state("network", NetworkState::new(&settings))?;
        let requests = builder.create_channel(
            ChannelSpec::new("network-requests")
                .carries::<NetSend>()
                .carries::<Attach>()
                .carries::<Detach>(),
        );
        let signals =
            builder.create_channel(ChannelSpec::new("network-signals").carries::<DeliveryFailed>());
        let due = timer.as_ref().map(|_| {
            builder.create_channel(ChannelSpec::new("network-retries").carries::<RetryDue>())
        });
        let state = builder.state_mut();
        state.requests = Some(requests.clone());
        state.signals = Some(signals.clone());
        if let (Some(timer), Some(due)) = (timer, &due) {
            state.delayed = Some(DelayedRetries {
                timer,
                due: due.clone(),
                delay: settings.retry_delay,
                next: 0,
            });
        }

        builder
            .subscribe::<Attach, _>(&requests, Priority::High, |state, attach, _| {
                debug!(peer = %attach.peer, inbox = attach.inbox.name(), "peer attached");
                state.peers.insert(attach.peer.clone(), attach.inbox.clone());
                Ok(())
            })?
            .subscribe::<Detach, _>(&requests, Priority::High, |state, detach, _| {
                if state.peers.remove(&detach.peer).is_some() {
                    debug!(peer = %detach.peer, "peer detached");
                }
                Ok(())
            })?
            .subscribe::<NetSend, _>(&requests, Priority::Normal, |state, send, ctx| {
                state.send(send, ctx)
            })?;
        if let Some(due) = &due {
            builder.subscribe::<RetryDue, _>(due, Priority::Normal, |state, retry, ctx| {
                state.send(&retry.send, ctx)
            })?;
        }
        builder.on_destroy(|state, _| {
            info!(peers = state.peers.len(), "network stopped");
            state.peers.clear();
            Ok(())
        });

        let handle = builder.create()?;
        let membrane = match handle
            .share(membrane_name)
            .in_channel::<NetSend>(&requests)
            .and_then(|m| m.in_channel::<Attach>(&requests))
            .and_then(|m| m.in_channel::<Detach>(&requests))
            .and_then(|m| m.out_channel::<DeliveryFailed>(&signals))
            .and_then(|m| m.seal())
        {
            Ok(membrane) => membrane,
            Err(error) => {
                handle.destroy().await;
                return Err(error);
            }
        };
        handle.start()?;
        info!(
            membrane = membrane_name,
            loss_rate = settings.loss_rate,
            connect_retries = settings.connect_retries,
            retry_delay_ms = settings.retry_delay.as_millis(),
            "network started"
        );
        Ok(Self { handle, membrane })
    }

    /// The membrane peers talk to the network through.
    #[must_use]
    pub fn membrane(&self) -> &Membrane {
        &self.membrane
    }

    /// The network component.
    #[must_use]
    pub fn handle(&self) -> &ComponentHandle {
        &self.handle
    }
}
