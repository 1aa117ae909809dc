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

use std::time::Duration;

use thiserror::Error;

/// Failures reported by the runtime.
///
/// Contract violations are returned from the call that caused them. Resource
/// faults describe something that is gone or unavailable. Neither is ever
/// raised as a panic.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum KestrelError {
    /// An event was triggered through a membrane that does not declare its kind.
    #[error("membrane `{membrane}` does not accept `{event}`")]
    ContractViolation {
        /// Membrane name.
        membrane: String,
        /// Type name of the rejected event.
        event: &'static str,
    },
    /// An event was triggered on a channel that is not declared to carry it.
    #[error("channel `{channel}` does not carry `{event}`")]
    UndeclaredEvent {
        /// Channel name.
        channel: String,
        /// Type name of the rejected event.
        event: &'static str,
    },
    /// The channel is not registered with this runtime.
    #[error("channel `{0}` is not known to this runtime")]
    UnknownChannel(String),
    /// The channel was closed when its owner was destroyed.
    #[error("channel `{0}` is closed")]
    ChannelClosed(String),
    /// No membrane is registered under the name.
    #[error("no membrane is registered as `{0}`")]
    UnknownMembrane(String),
    /// A membrane with the name is already registered.
    #[error("a membrane is already registered as `{0}`")]
    MembraneExists(String),
    /// The component behind the membrane has been destroyed.
    #[error("membrane `{0}` has been torn down")]
    MembraneTornDown(String),
    /// The component is destroyed or being destroyed.
    #[error("component `{0}` is destroyed")]
    ComponentDestroyed(String),
    /// The component name cannot form an identifier.
    #[error("invalid component name `{name}`: {reason}")]
    InvalidName {
        /// The offending name.
        name: String,
        /// Why it was refused.
        reason: String,
    },
    /// A timer with the same id is already active.
    #[error("timer {0} is already active")]
    DuplicateTimer(String),
    /// A periodic timer was requested with a zero period.
    #[error("timer {0} has a zero period")]
    ZeroPeriod(String),
    /// The timer's deadline lies beyond what the clock can represent.
    #[error("timer {0} has a deadline out of range")]
    DeadlineOutOfRange(String),
    /// No channel is available to deliver the timeout on.
    #[error("timer {0} has no delivery channel")]
    NoTimeoutTarget(String),
    /// The timer's time source has stopped.
    #[error("the timer's time source is unavailable")]
    TimerSourceUnavailable,
    /// The event does not carry a timeout.
    #[error("`{0}` cannot be viewed as a Timeout")]
    NotATimeout(&'static str),
    /// Components did not finish stopping in time.
    #[error("shutdown did not finish within {0:?}")]
    ShutdownTimeout(Duration),
}
