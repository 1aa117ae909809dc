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

use std::sync::Arc;

use parking_lot::Mutex;
use static_assertions::assert_impl_all;
use tokio::sync::futures::Notified;
use tokio::sync::Notify;

use crate::channel::Priority;
use crate::dispatcher::ReadyQueue;
use crate::traits::Event;

/// One pending handler call.
#[derive(Debug)]
pub(crate) struct Invocation {
    pub(crate) handler: usize,
    pub(crate) priority: Priority,
    pub(crate) event: Arc<dyn Event>,
}

/// The ready queue of one component.
///
/// Channels push into it from any thread; only the component's worker pops.
/// Once closed it refuses new invocations, which is how in-flight events for a
/// destroyed component are dropped instead of delivered.
#[derive(Debug)]
pub(crate) struct Mailbox {
    state: Mutex<MailboxState>,
    ready: Notify,
}

#[derive(Debug)]
struct MailboxState {
    open: bool,
    queue: ReadyQueue<Invocation>,
}

assert_impl_all!(Mailbox: Send, Sync);

impl Mailbox {
    pub(crate) fn new(burst: usize) -> Self {
        Self {
            state: Mutex::new(MailboxState {
                open: true,
                queue: ReadyQueue::new(burst),
            }),
            ready: Notify::new(),
        }
    }

    /// Queues `invocation`, returning `false` if the mailbox is closed.
    pub(crate) fn enqueue(&self, invocation: Invocation) -> bool {
        {
            let mut state = self.state.lock();
            if !state.open {
                return false;
            }
            state.queue.push(invocation.priority, invocation);
        }
        self.ready.notify_one();
        true
    }

    pub(crate) fn next(&self) -> Option<Invocation> {
        let mut state = self.state.lock();
        if state.open {
            state.queue.pop()
        } else {
            None
        }
    }

    /// Resolves after the next successful enqueue, or immediately if one
    /// happened since the last wait.
    pub(crate) fn notified(&self) -> Notified<'_> {
        self.ready.notified()
    }

    /// Closes the mailbox and returns the number of invocations dropped.
    pub(crate) fn close(&self) -> usize {
        let mut state = self.state.lock();
        state.open = false;
        state.queue.clear()
    }

    pub(crate) fn len(&self) -> usize {
        self.state.lock().queue.len()
    }
}
