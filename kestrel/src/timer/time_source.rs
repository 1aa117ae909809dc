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

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::channel::{Channel, Priority};
use crate::common::KestrelError;
use crate::timer::{Expired, TimerId};

enum Command {
    Arm {
        timer_id: TimerId,
        generation: u64,
        deadline: Instant,
        period: Option<Duration>,
    },
    Disarm {
        timer_id: TimerId,
    },
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Deadline {
    at: Instant,
    seq: u64,
}

struct Armed {
    generation: u64,
    seq: u64,
    period: Option<Duration>,
}

/// Background task that sleeps until the nearest deadline and reports each
/// expiry on the timer's expiry channel.
///
/// Only the timer component talks to it. Ownership of an expiry passes to the
/// timer component when [`Expired`] is queued, which is where the race between
/// cancel and fire is decided.
pub(crate) struct TimeSource {
    commands: mpsc::UnboundedSender<Command>,
    cancel: CancellationToken,
}

impl TimeSource {
    pub(crate) fn spawn(expiry: Channel) -> Self {
        let (commands, receiver) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        tokio::spawn(run(receiver, expiry, cancel.clone()));
        Self { commands, cancel }
    }

    pub(crate) fn arm(
        &self,
        timer_id: TimerId,
        generation: u64,
        deadline: Instant,
        period: Option<Duration>,
    ) -> Result<(), KestrelError> {
        self.commands
            .send(Command::Arm {
                timer_id,
                generation,
                deadline,
                period,
            })
            .map_err(|_| KestrelError::TimerSourceUnavailable)
    }

    pub(crate) fn disarm(&self, timer_id: TimerId) {
        let _ = self.commands.send(Command::Disarm { timer_id });
    }

    pub(crate) fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Drop for TimeSource {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[derive(Default)]
struct Schedule {
    heap: BinaryHeap<Reverse<(Deadline, TimerId)>>,
    armed: HashMap<TimerId, Armed>,
    seq: u64,
}

impl Schedule {
    fn arm(&mut self, timer_id: TimerId, generation: u64, at: Instant, period: Option<Duration>) {
        self.seq += 1;
        let seq = self.seq;
        self.armed.insert(timer_id, Armed { generation, seq, period });
        self.heap.push(Reverse((Deadline { at, seq }, timer_id)));
    }

    fn next_deadline(&mut self) -> Option<Instant> {
        // Entries superseded by a disarm or a re-arm are dropped lazily.
        while let Some(Reverse((deadline, timer_id))) = self.heap.peek().copied() {
            match self.armed.get(&timer_id) {
                Some(armed) if armed.seq == deadline.seq => return Some(deadline.at),
                _ => {
                    self.heap.pop();
                }
            }
        }
        None
    }

    fn pop_due(&mut self, now: Instant) -> Vec<Expired> {
        let mut due = Vec::new();
        while self.next_deadline().is_some_and(|at| at <= now) {
            let Some(Reverse((deadline, timer_id))) = self.heap.pop() else {
                break;
            };
            let Some(armed) = self.armed.remove(&timer_id) else {
                continue;
            };
            due.push(Expired {
                timer_id,
                generation: armed.generation,
            });
            if let Some(period) = armed.period {
                // Fixed rate: the next deadline follows the previous one, not the wakeup.
                match deadline.at.checked_add(period) {
                    Some(next) => self.arm(timer_id, armed.generation, next, Some(period)),
                    None => warn!(%timer_id, "next period is out of range, timer not re-armed"),
                }
            }
        }
        due
    }
}

async fn run(
    mut commands: mpsc::UnboundedReceiver<Command>,
    expiry: Channel,
    cancel: CancellationToken,
) {
    let mut schedule = Schedule::default();
    loop {
        let next = schedule.next_deadline();
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            command = commands.recv() => match command {
                Some(Command::Arm { timer_id, generation, deadline, period }) => {
                    trace!(%timer_id, generation, "armed");
                    schedule.arm(timer_id, generation, deadline, period);
                }
                Some(Command::Disarm { timer_id }) => {
                    schedule.armed.remove(&timer_id);
                }
                None => break,
            },
            () = sleep_until(next.unwrap_or_else(Instant::now)), if next.is_some() => {
                for expired in schedule.pop_due(Instant::now()) {
                    if expiry.publish(Arc::new(expired), Some(Priority::High)).is_err() {
                        debug!("expiry channel closed, time source stopping");
                        return;
                    }
                }
            }
        }
    }
    debug!(pending = schedule.armed.len(), "time source stopped");
}
