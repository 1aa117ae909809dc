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

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, error, instrument, trace, warn};

use crate::common::{ControlRef, HandlerFn, HookFn};
use crate::component::{Context, FaultDecision, FaultTracker, HandlerFault, Lifecycle};
use crate::dispatcher::Invocation;

/// Lifecycle hooks of a component, each run at most once.
pub(crate) struct Hooks<S> {
    pub(crate) initialize: Option<HookFn<S>>,
    pub(crate) start: Option<HookFn<S>>,
    pub(crate) destroy: Option<HookFn<S>>,
}

impl<S> Default for Hooks<S> {
    fn default() -> Self {
        Self {
            initialize: None,
            start: None,
            destroy: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Hook {
    Initialize,
    Start,
    Destroy,
}

/// The task that owns a component's state and runs its handlers, one at a time.
pub(crate) struct Worker<S> {
    pub(crate) state: S,
    pub(crate) handlers: Vec<HandlerFn<S>>,
    pub(crate) hooks: Hooks<S>,
    pub(crate) faults: FaultTracker,
    pub(crate) control: ControlRef,
    pub(crate) context: Context,
    pub(crate) batch: usize,
}

/// Runs `f`, turning an error or a panic into a [`HandlerFault`].
pub(crate) fn guarded(f: impl FnOnce() -> anyhow::Result<()>) -> Result<(), HandlerFault> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(error)) => Err(HandlerFault::Error(error)),
        Err(payload) => Err(HandlerFault::from_panic(payload.as_ref())),
    }
}

impl<S: Send + 'static> Worker<S> {
    #[instrument(skip_all, fields(component = %self.control.ern))]
    pub(crate) async fn run(mut self, mut lifecycle: watch::Receiver<Lifecycle>) {
        self.run_hook(Hook::Initialize);
        let control = Arc::clone(&self.control);
        if Self::await_start(&control, &mut lifecycle).await {
            self.run_hook(Hook::Start);
            self.drain().await;
        }
        let dropped = self.control.mailbox.close();
        if dropped > 0 {
            debug!(dropped, "dropped in-flight invocations");
        }
        self.run_hook(Hook::Destroy);
        trace!("worker stopped");
    }

    async fn await_start(
        control: &ControlRef,
        lifecycle: &mut watch::Receiver<Lifecycle>,
    ) -> bool {
        loop {
            match *lifecycle.borrow_and_update() {
                Lifecycle::Started => return true,
                Lifecycle::Destroyed => return false,
                Lifecycle::Uninitialized | Lifecycle::Created => {}
            }
            tokio::select! {
                biased;
                () = control.cancel.cancelled() => return false,
                changed = lifecycle.changed() => {
                    if changed.is_err() {
                        return false;
                    }
                }
            }
        }
    }

    async fn drain(&mut self) {
        let control = Arc::clone(&self.control);
        let batch = self.batch.max(1);
        let mut handled = 0usize;
        loop {
            if control.cancel.is_cancelled() {
                break;
            }
            if let Some(invocation) = control.mailbox.next() {
                if !self.dispatch(invocation) {
                    break;
                }
                handled += 1;
                if handled % batch == 0 {
                    tokio::task::yield_now().await;
                }
                continue;
            }
            tokio::select! {
                biased;
                () = control.cancel.cancelled() => break,
                () = control.mailbox.notified() => {}
            }
        }
    }

    /// Runs one invocation. Returns `false` when the component must stop.
    fn dispatch(&mut self, invocation: Invocation) -> bool {
        let Some(handler) = self.handlers.get(invocation.handler) else {
            error!(handler = invocation.handler, "no handler registered at index");
            return true;
        };
        let state = &mut self.state;
        let context = &self.context;
        let event = invocation.event.as_ref();
        let Err(fault) = guarded(|| handler(state, event, context)) else {
            return true;
        };

        error!(
            id = %self.control.id,
            event = ?invocation.event,
            priority = %invocation.priority,
            %fault,
            "handler fault"
        );
        match self.faults.record() {
            FaultDecision::Continue => true,
            FaultDecision::Destroy => {
                warn!(policy = %self.faults.policy(), "fault policy tears the component down");
                self.context.destroy_self();
                false
            }
        }
    }

    fn run_hook(&mut self, hook: Hook) {
        let slot = match hook {
            Hook::Initialize => self.hooks.initialize.take(),
            Hook::Start => self.hooks.start.take(),
            Hook::Destroy => self.hooks.destroy.take(),
        };
        let Some(f) = slot else {
            return;
        };
        let state = &mut self.state;
        let context = &self.context;
        match guarded(|| f(state, context)) {
            Ok(()) => trace!(?hook, "hook finished"),
            Err(fault) => error!(?hook, %fault, "lifecycle hook fault"),
        }
    }
}
