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
use std::time::Duration;

use derive_new::new;
use kestrel_macro::kestrel_event;

use crate::channel::Channel;
use crate::common::{ComponentId, KestrelError};
use crate::traits::{view_as, Event};

/// Identifies one scheduled timeout: the client component and an id it chose.
///
/// The owner namespaces the ids of different clients; it is not checked
/// against the component that sends a request. Requests carry no sender, so
/// any component holding a `TimerId` can cancel that timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, new)]
pub struct TimerId {
    /// The component the timer belongs to.
    pub owner: ComponentId,
    /// Client-chosen id, unique among the owner's active timers.
    pub local: u64,
}

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.local)
    }
}

/// Delivered when a timer fires, at high priority.
///
/// Clients wanting richer timeouts declare a variant:
///
/// ```rust,ignore
/// #[kestrel_event(extends = timeout)]
/// struct RetryDue {
///     timeout: Timeout,
///     attempt: u32,
/// }
/// ```
#[kestrel_event]
#[derive(PartialEq, Eq)]
pub struct Timeout {
    /// The timer that fired.
    pub timer_id: TimerId,
}

impl Timeout {
    /// A plain timeout for `timer_id`.
    #[must_use]
    pub const fn new(timer_id: TimerId) -> Self {
        Self { timer_id }
    }
}

fn timeout_payload<E: Event>(event: E) -> Result<(TimerId, Arc<dyn Event>), KestrelError> {
    let timer_id = view_as::<Timeout>(&event)
        .map(|timeout| timeout.timer_id)
        .ok_or(KestrelError::NotATimeout(std::any::type_name::<E>()))?;
    Ok((timer_id, Arc::new(event)))
}

/// Requests one timeout after `delay`.
///
/// Without a target the timeout is triggered on the timer's shared signal
/// channel; with [`deliver_to`](Self::deliver_to) it goes to the given channel,
/// which must carry the timeout's kind.
#[kestrel_event]
pub struct ScheduleTimeout {
    delay: Duration,
    timer_id: TimerId,
    timeout: Arc<dyn Event>,
    target: Option<Channel>,
}

impl ScheduleTimeout {
    /// Schedules a plain [`Timeout`].
    #[must_use]
    pub fn new(delay: Duration, timer_id: TimerId) -> Self {
        Self {
            delay,
            timer_id,
            timeout: Arc::new(Timeout::new(timer_id)),
            target: None,
        }
    }

    /// Schedules `event`, a variant of [`Timeout`].
    ///
    /// # Errors
    ///
    /// [`KestrelError::NotATimeout`] if `event` cannot be viewed as a [`Timeout`].
    pub fn with_event<E: Event>(delay: Duration, event: E) -> Result<Self, KestrelError> {
        let (timer_id, timeout) = timeout_payload(event)?;
        Ok(Self {
            delay,
            timer_id,
            timeout,
            target: None,
        })
    }

    /// Delivers the timeout on `channel` instead of the timer's signal channel.
    #[must_use]
    pub fn deliver_to(mut self, channel: &Channel) -> Self {
        self.target = Some(channel.clone());
        self
    }

    /// Delay before the timeout fires.
    #[must_use]
    pub const fn delay(&self) -> Duration {
        self.delay
    }

    /// The timer being scheduled.
    #[must_use]
    pub const fn timer_id(&self) -> TimerId {
        self.timer_id
    }

    pub(crate) fn timeout(&self) -> Arc<dyn Event> {
        Arc::clone(&self.timeout)
    }

    pub(crate) fn target(&self) -> Option<Channel> {
        self.target.clone()
    }
}

/// Requests a timeout after `initial_delay` and then every `period`, until cancelled.
#[kestrel_event]
pub struct SchedulePeriodicTimeout {
    initial_delay: Duration,
    period: Duration,
    timer_id: TimerId,
    timeout: Arc<dyn Event>,
    target: Option<Channel>,
}

impl SchedulePeriodicTimeout {
    /// Schedules a plain periodic [`Timeout`].
    #[must_use]
    pub fn new(initial_delay: Duration, period: Duration, timer_id: TimerId) -> Self {
        Self {
            initial_delay,
            period,
            timer_id,
            timeout: Arc::new(Timeout::new(timer_id)),
            target: None,
        }
    }

    /// Schedules `event`, a variant of [`Timeout`], periodically.
    ///
    /// # Errors
    ///
    /// [`KestrelError::NotATimeout`] if `event` cannot be viewed as a [`Timeout`].
    pub fn with_event<E: Event>(
        initial_delay: Duration,
        period: Duration,
        event: E,
    ) -> Result<Self, KestrelError> {
        let (timer_id, timeout) = timeout_payload(event)?;
        Ok(Self {
            initial_delay,
            period,
            timer_id,
            timeout,
            target: None,
        })
    }

    /// Delivers the timeouts on `channel` instead of the timer's signal channel.
    #[must_use]
    pub fn deliver_to(mut self, channel: &Channel) -> Self {
        self.target = Some(channel.clone());
        self
    }

    /// Delay before the first timeout.
    #[must_use]
    pub const fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    /// Interval between timeouts.
    #[must_use]
    pub const fn period(&self) -> Duration {
        self.period
    }

    /// The timer being scheduled.
    #[must_use]
    pub const fn timer_id(&self) -> TimerId {
        self.timer_id
    }

    pub(crate) fn timeout(&self) -> Arc<dyn Event> {
        Arc::clone(&self.timeout)
    }

    pub(crate) fn target(&self) -> Option<Channel> {
        self.target.clone()
    }
}

/// Cancels a one-shot timer that has not fired yet.
///
/// A timeout already handed to the dispatcher is still delivered.
#[kestrel_event]
#[derive(new)]
pub struct CancelTimeout {
    /// The timer to cancel.
    pub timer_id: TimerId,
}

/// Stops a periodic timer. A timeout already handed to the dispatcher is still delivered.
#[kestrel_event]
#[derive(new)]
pub struct CancelPeriodicTimeout {
    /// The timer to cancel.
    pub timer_id: TimerId,
}

/// Emitted on the timer's signal channel when a schedule request is refused.
#[kestrel_event]
pub struct TimerRejected {
    /// The refused timer.
    pub timer_id: TimerId,
    /// Why it was refused.
    pub error: KestrelError,
}

/// A deadline reached in the time source, handed back to the timer component.
#[kestrel_event]
pub(crate) struct Expired {
    pub(crate) timer_id: TimerId,
    pub(crate) generation: u64,
}
