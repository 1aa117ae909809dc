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

//! Remote execution behind a membrane.
//!
//! A client opens a session with [`ConnectRequest`], runs commands in it with
//! [`CommandRequest`] and closes it with [`HaltRequest`]. Every request is
//! answered with exactly one response on the membrane's out channel. Commands
//! run outside the dispatcher, one session task per session, in the order they
//! were requested.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use kestrel_macro::kestrel_event;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, warn};

use crate::channel::{Channel, ChannelSpec, Priority};
use crate::common::{KestrelError, KestrelRuntime};
use crate::component::ComponentHandle;
use crate::membrane::Membrane;

/// Identifies an open session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    /// Numeric value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// Opens a session whose commands run in `working_dir`.
#[kestrel_event]
pub struct ConnectRequest {
    /// Host the session is for. The local executor accepts any host and runs locally.
    pub host: String,
    /// Directory commands run in; the process's current directory when absent.
    pub working_dir: Option<PathBuf>,
}

impl ConnectRequest {
    /// A session for `host` in the current directory.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            working_dir: None,
        }
    }

    /// Runs the session's commands in `dir`.
    #[must_use]
    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

/// Answers a [`ConnectRequest`].
#[kestrel_event]
pub struct ConnectResponse {
    /// The request being answered.
    pub request: ConnectRequest,
    /// The new session.
    pub session: SessionId,
}

/// Runs `program` with `args` in a session.
#[kestrel_event]
pub struct CommandRequest {
    /// Target session.
    pub session: SessionId,
    /// Program to run.
    pub program: String,
    /// Its arguments.
    pub args: Vec<String>,
    /// Longest the command may run before it is killed.
    pub timeout: Duration,
    /// Halt the session if this command fails.
    pub stop_on_error: bool,
}

impl CommandRequest {
    /// Runs `program` in `session` with a 30 second timeout.
    pub fn new(session: SessionId, program: impl Into<String>) -> Self {
        Self {
            session,
            program: program.into(),
            args: Vec::new(),
            timeout: Duration::from_secs(30),
            stop_on_error: false,
        }
    }

    /// Appends an argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Sets the timeout.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Halts the session when this command fails.
    #[must_use]
    pub const fn stop_on_error(mut self) -> Self {
        self.stop_on_error = true;
        self
    }
}

/// How a command ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// The program ran to completion.
    Exited {
        /// Exit code, absent when killed by a signal.
        code: Option<i32>,
        /// Captured standard output.
        stdout: String,
        /// Captured standard error.
        stderr: String,
    },
    /// The program could not run or was stopped.
    Failed(String),
}

/// Answers a [`CommandRequest`].
#[kestrel_event]
pub struct CommandResponse {
    /// The request being answered.
    pub request: CommandRequest,
    /// What happened.
    pub outcome: CommandOutcome,
}

impl CommandResponse {
    /// True for a zero exit code.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, CommandOutcome::Exited { code: Some(0), .. })
    }
}

/// Closes a session, killing the command it is running.
#[kestrel_event]
pub struct HaltRequest {
    /// Session to close.
    pub session: SessionId,
}

/// Answers a [`HaltRequest`].
#[kestrel_event]
pub struct HaltResponse {
    /// The closed session.
    pub session: SessionId,
    /// False when the session was unknown or already closed.
    pub halted: bool,
}

struct Session {
    jobs: mpsc::UnboundedSender<CommandRequest>,
    cancel: CancellationToken,
}

struct ExecutorState {
    sessions: HashMap<SessionId, Session>,
    next_session: u64,
    tracker: TaskTracker,
}

impl Default for ExecutorState {
    fn default() -> Self {
        Self {
            sessions: HashMap::new(),
            next_session: 1,
            tracker: TaskTracker::new(),
        }
    }
}

fn respond(responses: &Channel, request: CommandRequest, outcome: CommandOutcome) {
    let session = request.session;
    if let Err(error) = responses.trigger(CommandResponse { request, outcome }) {
        debug!(%session, %error, "command response dropped");
    }
}

impl ExecutorState {
    fn connect(&mut self, request: &ConnectRequest, responses: &Channel) -> anyhow::Result<()> {
        let session = SessionId(self.next_session);
        self.next_session += 1;
        let (jobs, receiver) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        self.tracker.spawn(run_session(
            session,
            request.working_dir.clone(),
            receiver,
            cancel.clone(),
            responses.clone(),
        ));
        self.sessions.insert(session, Session { jobs, cancel });
        info!(%session, host = %request.host, "session opened");
        responses.trigger(ConnectResponse {
            request: request.clone(),
            session,
        })?;
        Ok(())
    }

    fn command(&mut self, request: &CommandRequest, responses: &Channel) {
        let Some(session) = self.sessions.get(&request.session) else {
            respond(
                responses,
                request.clone(),
                CommandOutcome::Failed(format!("unknown session {}", request.session)),
            );
            return;
        };
        if let Err(mpsc::error::SendError(request)) = session.jobs.send(request.clone()) {
            // The session stopped itself after a failed stop-on-error command.
            self.sessions.remove(&request.session);
            respond(
                responses,
                request,
                CommandOutcome::Failed("session halted".to_string()),
            );
        }
    }

    fn halt(&mut self, request: &HaltRequest, responses: &Channel) -> anyhow::Result<()> {
        let halted = match self.sessions.remove(&request.session) {
            Some(session) => {
                session.cancel.cancel();
                info!(session = %request.session, "session halted");
                true
            }
            None => false,
        };
        responses.trigger(HaltResponse {
            session: request.session,
            halted,
        })?;
        Ok(())
    }

    fn close_all(&mut self) {
        for (_, session) in self.sessions.drain() {
            session.cancel.cancel();
        }
        self.tracker.close();
    }
}

#[instrument(skip(working_dir, jobs, cancel, responses))]
async fn run_session(
    session: SessionId,
    working_dir: Option<PathBuf>,
    mut jobs: mpsc::UnboundedReceiver<CommandRequest>,
    cancel: CancellationToken,
    responses: Channel,
) {
    loop {
        let request = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            job = jobs.recv() => match job {
                Some(request) => request,
                None => break,
            },
        };
        let outcome = execute(&request, working_dir.as_ref(), &cancel).await;
        let failed = !matches!(outcome, CommandOutcome::Exited { code: Some(0), .. });
        let stop = failed && request.stop_on_error;
        respond(&responses, request, outcome);
        if stop {
            warn!("command failed, stopping session");
            break;
        }
    }
    jobs.close();
    while let Some(request) = jobs.recv().await {
        respond(
            &responses,
            request,
            CommandOutcome::Failed("session halted".to_string()),
        );
    }
    debug!("session task finished");
}

async fn execute(
    request: &CommandRequest,
    working_dir: Option<&PathBuf>,
    cancel: &CancellationToken,
) -> CommandOutcome {
    let mut command = Command::new(&request.program);
    command
        .args(&request.args)
        .stdin(Stdio::null())
        .kill_on_drop(true);
    if let Some(dir) = working_dir {
        command.current_dir(dir);
    }
    debug!(program = %request.program, args = ?request.args, "running command");
    tokio::select! {
        () = cancel.cancelled() => CommandOutcome::Failed("session halted".to_string()),
        result = tokio::time::timeout(request.timeout, command.output()) => match result {
            Err(_) => CommandOutcome::Failed(format!("timed out after {:?}", request.timeout)),
            Ok(Err(error)) => CommandOutcome::Failed(error.to_string()),
            Ok(Ok(output)) => CommandOutcome::Exited {
                code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            },
        },
    }
}

/// Runs commands on the local machine, shared under a membrane.
///
/// The membrane accepts [`ConnectRequest`], [`CommandRequest`] and
/// [`HaltRequest`] and emits the matching responses.
#[derive(Debug, Clone)]
pub struct LocalExecutor {
    handle: ComponentHandle,
    membrane: Membrane,
}

impl LocalExecutor {
    /// Spawns and starts an executor shared under the configured default name.
    ///
    /// # Errors
    ///
    /// [`KestrelError::MembraneExists`] if that name is already shared.
    pub async fn spawn(runtime: &KestrelRuntime) -> Result<Self, KestrelError> {
        let name = runtime.config().defaults.executor_membrane.clone();
        Self::spawn_named(runtime, &name).await
    }

    /// Spawns and starts an executor shared under `membrane_name`.
    ///
    /// # Errors
    ///
    /// [`KestrelError::MembraneExists`] if the name is taken.
    pub async fn spawn_named(
        runtime: &KestrelRuntime,
        membrane_name: &str,
    ) -> Result<Self, KestrelError> {
        let mut builder = runtime.new_component::<ExecutorState>("executor")?;
        let requests = builder.create_channel(
            ChannelSpec::new("exec-requests")
                .carries::<ConnectRequest>()
                .carries::<CommandRequest>()
                .carries::<HaltRequest>(),
        );
        let responses = builder.create_channel(
            ChannelSpec::new("exec-responses")
                .carries::<ConnectResponse>()
                .carries::<CommandResponse>()
                .carries::<HaltResponse>(),
        );
        let out = responses.clone();
        builder.subscribe::<ConnectRequest, _>(&requests, Priority::Normal, move |state, request, _| {
            state.connect(request, &out)
        })?;
        let out = responses.clone();
        builder.subscribe::<CommandRequest, _>(&requests, Priority::Normal, move |state, request, _| {
            state.command(request, &out);
            Ok(())
        })?;
        let out = responses.clone();
        builder
            .subscribe::<HaltRequest, _>(&requests, Priority::Normal, move |state, request, _| {
                state.halt(request, &out)
            })?
            .on_destroy(|state, _| {
                info!(sessions = state.sessions.len(), "executor stopped");
                state.close_all();
                Ok(())
            });

        let handle = builder.create()?;
        let membrane = match handle
            .share(membrane_name)
            .in_channel::<ConnectRequest>(&requests)
            .and_then(|m| m.in_channel::<CommandRequest>(&requests))
            .and_then(|m| m.in_channel::<HaltRequest>(&requests))
            .and_then(|m| m.out_channel::<ConnectResponse>(&responses))
            .and_then(|m| m.out_channel::<CommandResponse>(&responses))
            .and_then(|m| m.out_channel::<HaltResponse>(&responses))
            .and_then(|m| m.seal())
        {
            Ok(membrane) => membrane,
            Err(error) => {
                handle.destroy().await;
                return Err(error);
            }
        };
        handle.start()?;
        info!(membrane = membrane_name, "executor started");
        Ok(Self { handle, membrane })
    }

    /// The membrane clients talk to the executor through.
    #[must_use]
    pub fn membrane(&self) -> &Membrane {
        &self.membrane
    }

    /// The executor component.
    #[must_use]
    pub fn handle(&self) -> &ComponentHandle {
        &self.handle
    }
}
