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

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::channel::{Channel, ChannelSpec, Priority};
use crate::common::{KestrelError, KestrelRuntime};
use crate::component::ComponentHandle;
use crate::membrane::Membrane;
use crate::timer::{
    CancelPeriodicTimeout, CancelTimeout, Expired, SchedulePeriodicTimeout, ScheduleTimeout,
    TimeSource, TimerId, TimerRejected, Timeout,
};
use crate::traits::Event;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerKind {
    OneShot,
    Periodic(Duration),
}

struct ActiveTimer {
    generation: u64,
    kind: TimerKind,
    timeout: Arc<dyn Event>,
    target: Channel,
}

struct TimerState {
    active: HashMap<TimerId, ActiveTimer>,
    next_generation: u64,
    source: Option<TimeSource>,
    signals: Option<Channel>,
    gauge: Arc<AtomicUsize>,
}

impl TimerState {
    fn new(gauge: Arc<AtomicUsize>) -> Self {
        Self {
            active: HashMap::new(),
            next_generation: 0,
            source: None,
            signals: None,
            gauge,
        }
    }

    fn publish_gauge(&self) {
        self.gauge.store(self.active.len(), Ordering::Release);
    }

    fn reject(&self, timer_id: TimerId, error: KestrelError) {
        warn!(%timer_id, %error, "timer request rejected");
        if let Some(signals) = &self.signals {
            if let Err(error) = signals.trigger(TimerRejected { timer_id, error }) {
                debug!(%timer_id, %error, "rejection could not be reported");
            }
        }
    }

    fn schedule(
        &mut self,
        timer_id: TimerId,
        kind: TimerKind,
        first: Duration,
        timeout: Arc<dyn Event>,
        target: Option<Channel>,
    ) {
        if self.active.contains_key(&timer_id) {
            self.reject(timer_id, KestrelError::DuplicateTimer(timer_id.to_string()));
            return;
        }
        if kind == TimerKind::Periodic(Duration::ZERO) {
            self.reject(timer_id, KestrelError::ZeroPeriod(timer_id.to_string()));
            return;
        }
        let Some(target) = target.or_else(|| self.signals.clone()) else {
            self.reject(timer_id, KestrelError::NoTimeoutTarget(timer_id.to_string()));
            return;
        };
        if !target.accepts(timeout.as_ref()) {
            self.reject(
                timer_id,
                KestrelError::UndeclaredEvent {
                    channel: target.name().to_string(),
                    event: timeout.event_name(),
                },
            );
            return;
        }

        let period = match kind {
            TimerKind::OneShot => None,
            TimerKind::Periodic(period) => Some(period),
        };
        // The first re-arm must be representable too.
        let deadline = Instant::now()
            .checked_add(first)
            .filter(|at| period.map_or(true, |period| at.checked_add(period).is_some()));
        let Some(deadline) = deadline else {
            self.reject(timer_id, KestrelError::DeadlineOutOfRange(timer_id.to_string()));
            return;
        };

        let generation = self.next_generation;
        self.next_generation += 1;
        let armed = self
            .source
            .as_ref()
            .ok_or(KestrelError::TimerSourceUnavailable)
            .and_then(|source| source.arm(timer_id, generation, deadline, period));
        if let Err(error) = armed {
            self.reject(timer_id, error);
            return;
        }

        debug!(%timer_id, ?kind, delay_ms = first.as_millis(), "timer scheduled");
        self.active.insert(
            timer_id,
            ActiveTimer {
                generation,
                kind,
                timeout,
                target,
            },
        );
        self.publish_gauge();
    }

    fn cancel(&mut self, timer_id: TimerId, periodic: bool) {
        let matches = self
            .active
            .get(&timer_id)
            .is_some_and(|entry| matches!(entry.kind, TimerKind::Periodic(_)) == periodic);
        if !matches {
            // Already fired, already cancelled, or never scheduled.
            trace!(%timer_id, "nothing to cancel");
            return;
        }
        self.active.remove(&timer_id);
        if let Some(source) = &self.source {
            source.disarm(timer_id);
        }
        debug!(%timer_id, "timer cancelled");
        self.publish_gauge();
    }

    fn expire(&mut self, expired: &Expired) {
        let Some(entry) = self.active.get(&expired.timer_id) else {
            trace!(timer_id = %expired.timer_id, "expiry for a cancelled timer");
            return;
        };
        if entry.generation != expired.generation {
            trace!(timer_id = %expired.timer_id, "expiry from an earlier schedule");
            return;
        }
        let (timeout, target) = (Arc::clone(&entry.timeout), entry.target.clone());
        if entry.kind == TimerKind::OneShot {
            self.active.remove(&expired.timer_id);
            self.publish_gauge();
        }
        if let Err(error) = target.publish(timeout, Some(Priority::High)) {
            warn!(timer_id = %expired.timer_id, %error, "timeout could not be delivered");
            if matches!(error, KestrelError::ChannelClosed(_)) {
                self.cancel(expired.timer_id, true);
            }
        }
    }

    fn shutdown(&mut self) {
        if let Some(source) = self.source.take() {
            source.shutdown();
        }
        if !self.active.is_empty() {
            info!(pending = self.active.len(), "timer destroyed with pending timers");
        }
        self.active.clear();
        self.publish_gauge();
    }
}

/// A running timer component, shared under a membrane.
///
/// Clients trigger [`ScheduleTimeout`], [`SchedulePeriodicTimeout`],
/// [`CancelTimeout`] and [`CancelPeriodicTimeout`] through the membrane and
/// receive [`Timeout`] events at high priority, either on the channel named by
/// the request or on the membrane's signal channel. Refused requests are
/// answered with [`TimerRejected`] on the signal channel.
///
/// Cancelling before the timeout has been handed to the dispatcher guarantees
/// it is never delivered. Cancelling afterwards is a no-op and the timeout is
/// delivered exactly once.
#[derive(Debug, Clone)]
pub struct TimerService {
    handle: ComponentHandle,
    membrane: Membrane,
    active: Arc<AtomicUsize>,
}

impl TimerService {
    /// Spawns and starts a timer shared under the configured default name.
    ///
    /// # Errors
    ///
    /// [`KestrelError::MembraneExists`] if that name is already shared.
    pub async fn spawn(runtime: &KestrelRuntime) -> Result<Self, KestrelError> {
        let name = runtime.config().defaults.timer_membrane.clone();
        Self::spawn_named(runtime, &name).await
    }

    /// Spawns and starts a timer shared under `membrane_name`.
    ///
    /// # Errors
    ///
    /// [`KestrelError::MembraneExists`] if the name is taken,
    /// [`KestrelError::InvalidName`] if it cannot form an identifier.
    pub async fn spawn_named(
        runtime: &KestrelRuntime,
        membrane_name: &str,
    ) -> Result<Self, KestrelError> {
        let active = Arc::new(AtomicUsize::new(0));
        let mut builder =
            runtime.new_component_with_state("timer", TimerState::new(Arc::clone(&active)))?;

        let requests = builder.create_channel(
            ChannelSpec::new("timer-requests")
                .carries::<ScheduleTimeout>()
                .carries::<SchedulePeriodicTimeout>()
                .carries::<CancelTimeout>()
                .carries::<CancelPeriodicTimeout>(),
        );
        let signals = builder.create_channel(
            ChannelSpec::new("timer-signals")
                .carries::<Timeout>()
                .carries::<TimerRejected>(),
        );
        let expiry = builder.create_channel(ChannelSpec::new("timer-expiry").carries::<Expired>());
        builder.state_mut().signals = Some(signals.clone());

        builder
            .subscribe::<ScheduleTimeout, _>(&requests, Priority::Normal, |state, request, _| {
                state.schedule(
                    request.timer_id(),
                    TimerKind::OneShot,
                    request.delay(),
                    request.timeout(),
                    request.target(),
                );
                Ok(())
            })?
            .subscribe::<SchedulePeriodicTimeout, _>(&requests, Priority::Normal, |state, request, _| {
                state.schedule(
                    request.timer_id(),
                    TimerKind::Periodic(request.period()),
                    request.initial_delay(),
                    request.timeout(),
                    request.target(),
                );
                Ok(())
            })?
            .subscribe::<CancelTimeout, _>(&requests, Priority::Normal, |state, cancel, _| {
                state.cancel(cancel.timer_id, false);
                Ok(())
            })?
            .subscribe::<CancelPeriodicTimeout, _>(&requests, Priority::Normal, |state, cancel, _| {
                state.cancel(cancel.timer_id, true);
                Ok(())
            })?
            .subscribe::<Expired, _>(&expiry, Priority::High, |state, expired, _| {
                state.expire(expired);
                Ok(())
            })?;
        builder
            .on_initialize(move |state, _| {
                state.source = Some(TimeSource::spawn(expiry));
                Ok(())
            })
            .on_destroy(|state, _| {
                state.shutdown();
                Ok(())
            });

        let handle = builder.create()?;
        let membrane = match handle
            .share(membrane_name)
            .in_channel::<ScheduleTimeout>(&requests)
            .and_then(|m| m.in_channel::<SchedulePeriodicTimeout>(&requests))
            .and_then(|m| m.in_channel::<CancelTimeout>(&requests))
            .and_then(|m| m.in_channel::<CancelPeriodicTimeout>(&requests))
            .and_then(|m| m.out_channel::<Timeout>(&signals))
            .and_then(|m| m.out_channel::<TimerRejected>(&signals))
            .and_then(|m| m.seal())
        {
            Ok(membrane) => membrane,
            Err(error) => {
                handle.destroy().await;
                return Err(error);
            }
        };
        handle.start()?;
        info!(membrane = membrane_name, "timer service started");

        Ok(Self {
            handle,
            membrane,
            active,
        })
    }

    /// The membrane clients trigger requests through.
    #[must_use]
    pub fn membrane(&self) -> &Membrane {
        &self.membrane
    }

    /// The timer component.
    #[must_use]
    pub fn handle(&self) -> &ComponentHandle {
        &self.handle
    }

    /// Timers scheduled and not yet fired (one-shot) or cancelled.
    #[must_use]
    pub fn active_timers(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }
}
