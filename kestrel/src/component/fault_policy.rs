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

//! What happens to a component after one of its handlers fails.
//!
//! A fault is an `Err` returned by a handler or a panic escaping it. The
//! dispatcher catches it at the component boundary, logs it with the component
//! and event, then asks the component's [`FaultPolicy`] for a decision before
//! running anything else from that component's queue. Faults never reach
//! siblings, parents or the process.
//!
//! ```rust,ignore
//! // Keep going, unless more than 3 faults happen within 10 seconds.
//! builder.with_fault_policy(FaultPolicy::Tolerate {
//!     max_faults: 3,
//!     window: Duration::from_secs(10),
//! });
//! ```

use std::any::Any;
use std::fmt::{Display, Formatter};
use std::time::Duration;

use tokio::time::Instant;

/// How a component reacts to a handler fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FaultPolicy {
    /// Log the fault and keep processing the queue.
    #[default]
    Continue,
    /// Destroy the component (and its children) on the first fault.
    Destroy,
    /// Keep processing until more than `max_faults` faults happen within
    /// `window`, then destroy the component.
    Tolerate {
        /// Faults allowed inside one window.
        max_faults: u32,
        /// Length of the sliding window.
        window: Duration,
    },
}

/// Outcome of a [`FaultPolicy`] for one fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultDecision {
    /// Run the next queued invocation.
    Continue,
    /// Stop the queue and destroy the component.
    Destroy,
}

impl Display for FaultPolicy {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Continue => write!(f, "continue"),
            Self::Destroy => write!(f, "destroy"),
            Self::Tolerate { max_faults, window } => {
                write!(f, "tolerate({max_faults} per {window:?})")
            }
        }
    }
}

/// A failure inside a handler or lifecycle hook.
#[derive(Debug)]
pub(crate) enum HandlerFault {
    Error(anyhow::Error),
    Panic(String),
}

impl HandlerFault {
    pub(crate) fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        Self::Panic(message)
    }
}

impl Display for HandlerFault {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error(error) => write!(f, "error: {error:#}"),
            Self::Panic(message) => write!(f, "panic: {message}"),
        }
    }
}

/// Applies a [`FaultPolicy`], remembering recent faults.
#[derive(Debug)]
pub(crate) struct FaultTracker {
    policy: FaultPolicy,
    recent: Vec<Instant>,
}

impl FaultTracker {
    pub(crate) const fn new(policy: FaultPolicy) -> Self {
        Self {
            policy,
            recent: Vec::new(),
        }
    }

    pub(crate) const fn policy(&self) -> FaultPolicy {
        self.policy
    }

    /// Records one fault and decides what happens next.
    pub(crate) fn record(&mut self) -> FaultDecision {
        match self.policy {
            FaultPolicy::Continue => FaultDecision::Continue,
            FaultPolicy::Destroy => FaultDecision::Destroy,
            FaultPolicy::Tolerate { max_faults, window } => {
                let now = Instant::now();
                self.recent.retain(|&at| now.duration_since(at) < window);
                self.recent.push(now);
                if self.recent.len() > max_faults as usize {
                    FaultDecision::Destroy
                } else {
                    FaultDecision::Continue
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_continues() {
        let mut tracker = FaultTracker::new(FaultPolicy::default());
        for _ in 0..100 {
            assert_eq!(tracker.record(), FaultDecision::Continue);
        }
    }

    #[test]
    fn destroy_policy_stops_on_first_fault() {
        let mut tracker = FaultTracker::new(FaultPolicy::Destroy);
        assert_eq!(tracker.record(), FaultDecision::Destroy);
    }

    #[tokio::test(start_paused = true)]
    async fn tolerate_counts_faults_in_a_sliding_window() {
        let mut tracker = FaultTracker::new(FaultPolicy::Tolerate {
            max_faults: 2,
            window: Duration::from_secs(1),
        });
        assert_eq!(tracker.record(), FaultDecision::Continue);
        assert_eq!(tracker.record(), FaultDecision::Continue);

        tokio::time::advance(Duration::from_millis(1_500)).await;
        assert_eq!(tracker.record(), FaultDecision::Continue);
        assert_eq!(tracker.record(), FaultDecision::Continue);
        assert_eq!(tracker.record(), FaultDecision::Destroy);
    }

    #[test]
    fn panic_payloads_become_messages() {
        let fault = HandlerFault::from_panic(&"boom");
        assert_eq!(fault.to_string(), "panic: boom");
        let fault = HandlerFault::from_panic(&String::from("owned"));
        assert_eq!(fault.to_string(), "panic: owned");
    }

    #[test]
    fn policies_display() {
        assert_eq!(FaultPolicy::Continue.to_string(), "continue");
        let tolerate = FaultPolicy::Tolerate {
            max_faults: 3,
            window: Duration::from_secs(2),
        };
        assert_eq!(tolerate.to_string(), "tolerate(3 per 2s)");
    }
}
