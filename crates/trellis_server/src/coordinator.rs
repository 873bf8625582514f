//! The build coordinator.
//!
//! Owns the [`BuildSession`] and serializes everything that touches it.
//! Requests arrive as [`Trigger`]s on an mpsc channel; each pass runs on a
//! blocking thread. When a pass ends, the queue is drained: build requests
//! that arrived meanwhile get that pass's outcome, file changes collapse
//! into one debounced follow-up pass, and everything else runs next in
//! arrival order.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot};
use trellis_build::{BuildError, BuildOutcome, BuildSession, EventLog, EventPayload};
use trellis_common::InternalError;
use trellis_diagnostics::Severity;
use trellis_manifest::ModuleManifest;

use crate::error::ServerError;
use crate::protocol::{ErrorKind, Response, ServerInfo};
use crate::state::{ServerState, StateMachine};
use crate::watch::FileWatcher;

/// Work for the coordinator.
#[derive(Debug)]
pub enum Trigger {
    /// A client asked for a build.
    Build {
        /// Receives the pass outcome.
        reply: oneshot::Sender<Response>,
    },
    /// A client asked for watch mode.
    Watch {
        /// Receives an ack once watching.
        reply: oneshot::Sender<Response>,
    },
    /// Files changed on disk.
    FileChange {
        /// Changed paths.
        paths: Vec<PathBuf>,
    },
    /// Drop in-memory state.
    Restart {
        /// Receives an ack.
        reply: oneshot::Sender<Response>,
    },
    /// Shut down after the current pass.
    Stop {
        /// Receives an ack, if anyone is waiting.
        reply: Option<oneshot::Sender<Response>>,
    },
    /// Build, then resolve an exec target.
    Exec {
        /// Source file to run.
        file: PathBuf,
        /// Receives the target.
        reply: oneshot::Sender<Response>,
    },
    /// Write the manifest.
    Manifest {
        /// Strip for production.
        prod: bool,
        /// Destination override.
        output: Option<PathBuf>,
        /// Receives the written path.
        reply: oneshot::Sender<Response>,
    },
}

#[derive(Default)]
struct Summary {
    modules: usize,
    files: usize,
    builds: u64,
    last_error: Option<String>,
}

/// State readable by connection handlers without going through the
/// coordinator.
pub struct SharedState {
    machine: Mutex<StateMachine>,
    summary: Mutex<Summary>,
    events: Arc<EventLog>,
    started: Instant,
    url: String,
    workspace: String,
    main: String,
}

impl SharedState {
    /// Captures identity and manifest size from `session`.
    pub fn new(session: &BuildSession, url: String) -> Self {
        let ctx = session.context();
        let mut summary = Summary::default();
        if let Some(manifest) = session.manifest() {
            summary.modules = manifest.modules.len();
            summary.files = manifest.file_count();
        }
        Self {
            machine: Mutex::new(StateMachine::new()),
            summary: Mutex::new(summary),
            events: Arc::clone(session.events()),
            started: Instant::now(),
            url,
            workspace: ctx.workspace.name.clone(),
            main: ctx.main.name.clone(),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ServerState {
        lock(&self.machine).state()
    }

    /// The event log.
    pub fn events(&self) -> &Arc<EventLog> {
        &self.events
    }

    /// Moves the state machine and publishes the new state.
    pub fn transition(&self, to: ServerState) -> Result<(), ServerError> {
        let changed = {
            let mut machine = lock(&self.machine);
            let before = machine.state();
            machine.transition(to)?;
            before != to
        };
        if changed {
            self.events.publish(EventPayload::State {
                state: to.to_string(),
            });
        }
        Ok(())
    }

    /// Snapshot for `info`.
    pub fn info(&self) -> ServerInfo {
        let summary = lock(&self.summary);
        ServerInfo {
            state: self.state(),
            pid: std::process::id(),
            url: self.url.clone(),
            uptime_ms: self.started.elapsed().as_millis() as u64,
            workspace: self.workspace.clone(),
            main: self.main.clone(),
            modules: summary.modules,
            files: summary.files,
            builds: summary.builds,
            last_error: summary.last_error.clone(),
        }
    }

    fn enable_watch(&self) {
        lock(&self.machine).enable_watch();
    }

    fn resting_state(&self) -> ServerState {
        lock(&self.machine).resting_state()
    }

    /// Counts a finished pass. `error` replaces the last error, so a clean
    /// pass clears it.
    fn record_pass(&self, manifest: Option<&ModuleManifest>, error: Option<String>) {
        let mut summary = lock(&self.summary);
        summary.builds += 1;
        summary.last_error = error;
        if let Some(manifest) = manifest {
            summary.modules = manifest.modules.len();
            summary.files = manifest.file_count();
        }
    }

    fn record_error(&self, message: String) {
        lock(&self.summary).last_error = Some(message);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

enum Next {
    Trigger(Trigger),
    /// The debounce window after a file change elapsed.
    Settled,
}

/// Runs build passes one at a time.
pub struct Coordinator {
    session: Option<BuildSession>,
    shared: Arc<SharedState>,
    triggers: mpsc::Receiver<Trigger>,
    sender: mpsc::Sender<Trigger>,
    watcher: Option<FileWatcher>,
    deferred: VecDeque<Trigger>,
    pending_change: bool,
}

impl Coordinator {
    /// Creates a coordinator. `sender` feeds the same channel as
    /// `triggers` and is handed to the file watcher.
    pub fn new(
        session: BuildSession,
        shared: Arc<SharedState>,
        triggers: mpsc::Receiver<Trigger>,
        sender: mpsc::Sender<Trigger>,
    ) -> Self {
        Self {
            session: Some(session),
            shared,
            triggers,
            sender,
            watcher: None,
            deferred: VecDeque::new(),
            pending_change: false,
        }
    }

    /// Processes triggers until `Stop`. Returns `Err` only for internal
    /// errors, which end the server.
    pub async fn run(mut self) -> Result<(), ServerError> {
        let result = self.process().await;
        if let Err(e) = &result {
            tracing::error!("compiler server aborting: {e}");
            self.shared.record_error(e.to_string());
        }
        self.watcher = None;
        // Best effort: an aborted server may not be in a state that can stop.
        let _ = self.shared.transition(ServerState::Stopping);
        let _ = self.shared.transition(ServerState::Stopped);
        self.shared.events().close();
        tracing::info!("compiler server stopped");
        result
    }

    async fn process(&mut self) -> Result<(), ServerError> {
        while let Some(next) = self.next().await {
            let trigger = match next {
                Next::Settled => {
                    self.build(Vec::new()).await?;
                    continue;
                }
                Next::Trigger(trigger) => trigger,
            };
            match trigger {
                Trigger::FileChange { paths } => {
                    tracing::debug!(count = paths.len(), "files changed");
                    if lock(&self.shared.machine).is_watching() {
                        self.pending_change = true;
                    }
                }
                Trigger::Build { reply } => {
                    self.build(vec![reply]).await?;
                }
                Trigger::Watch { reply } => {
                    if let Err(e) = self.start_watching() {
                        let _ = reply.send(Response::Error {
                            kind: ErrorKind::Io,
                            message: e.to_string(),
                        });
                        continue;
                    }
                    let _ = reply.send(Response::Ack);
                    self.build(Vec::new()).await?;
                }
                Trigger::Restart { reply } => {
                    let response = self.restart().await?;
                    let _ = reply.send(response);
                }
                Trigger::Stop { reply } => {
                    self.shared.transition(ServerState::Stopping)?;
                    if let Some(reply) = reply {
                        let _ = reply.send(Response::Ack);
                    }
                    return Ok(());
                }
                Trigger::Exec { file, reply } => {
                    let response = match self.build(Vec::new()).await? {
                        Response::Build { outcome } if outcome.is_success() => {
                            let result = self.with_session(move |s| s.exec_target(&file)).await?;
                            match result {
                                Ok(target) => Response::Exec { target },
                                Err(e) => Response::from_build_error(&e),
                            }
                        }
                        Response::Build { outcome } => compile_failure(&outcome),
                        other => other,
                    };
                    let _ = reply.send(response);
                }
                Trigger::Manifest {
                    prod,
                    output,
                    reply,
                } => {
                    let response = match self.build(Vec::new()).await? {
                        Response::Build { .. } => {
                            let result = self
                                .with_session(move |s| s.write_manifest(prod, output.as_deref()))
                                .await?;
                            match result {
                                Ok(path) => Response::Manifest { path },
                                Err(e) => Response::from_build_error(&e),
                            }
                        }
                        other => other,
                    };
                    let _ = reply.send(response);
                }
            }
        }
        Ok(())
    }

    async fn next(&mut self) -> Option<Next> {
        if let Some(trigger) = self.deferred.pop_front() {
            return Some(Next::Trigger(trigger));
        }
        if self.pending_change {
            let debounce = self.debounce();
            return match tokio::time::timeout(debounce, self.triggers.recv()).await {
                Ok(trigger) => trigger.map(Next::Trigger),
                Err(_) => {
                    self.pending_change = false;
                    Some(Next::Settled)
                }
            };
        }
        self.triggers.recv().await.map(Next::Trigger)
    }

    fn debounce(&self) -> Duration {
        let ms = self
            .session
            .as_ref()
            .map_or(100, |s| s.settings().watch.debounce_ms);
        Duration::from_millis(ms)
    }

    fn start_watching(&mut self) -> Result<(), ServerError> {
        if self.watcher.is_none() {
            let session = self.session.as_ref().ok_or(ServerError::Stopped)?;
            self.watcher = Some(FileWatcher::start(
                session.context(),
                &session.settings().watch,
                self.sender.clone(),
            )?);
        }
        self.shared.enable_watch();
        Ok(())
    }

    /// Runs one pass, answers `waiters` and every build request queued
    /// during the pass, and returns the response they got.
    async fn build(
        &mut self,
        mut waiters: Vec<oneshot::Sender<Response>>,
    ) -> Result<Response, ServerError> {
        self.pending_change = false;
        self.shared.transition(ServerState::Building)?;
        let result = self.with_session(|s| s.run()).await?;

        let response = match result {
            Ok(outcome) => {
                let manifest = self.session.as_ref().and_then(BuildSession::manifest);
                let error = (!outcome.is_success()).then(|| failure_message(&outcome));
                self.shared.record_pass(manifest, error);
                Response::Build { outcome }
            }
            Err(BuildError::Internal(e)) => return Err(ServerError::Build(e.into())),
            Err(e) => {
                tracing::warn!("build failed: {e}");
                self.shared.record_error(e.to_string());
                self.shared
                    .events()
                    .publish(EventPayload::log(Severity::Error, e.to_string()));
                Response::from_build_error(&e)
            }
        };

        while let Ok(trigger) = self.triggers.try_recv() {
            match trigger {
                Trigger::Build { reply } => waiters.push(reply),
                Trigger::FileChange { .. } => {
                    self.pending_change = lock(&self.shared.machine).is_watching();
                }
                other => self.deferred.push_back(other),
            }
        }
        if waiters.len() > 1 {
            tracing::debug!(clients = waiters.len(), "coalesced build requests");
        }
        for waiter in waiters {
            let _ = waiter.send(response.clone());
        }
        self.shared.transition(self.shared.resting_state())?;
        Ok(response)
    }

    async fn restart(&mut self) -> Result<Response, ServerError> {
        let result = self.with_session(|s| s.restart()).await?;
        if self.watcher.take().is_some() {
            self.start_watching()?;
        }
        Ok(match result {
            Ok(()) => Response::Ack,
            Err(e) => {
                self.shared.record_error(e.to_string());
                Response::from_build_error(&e)
            }
        })
    }

    /// Runs `f` against the session on a blocking thread.
    async fn with_session<T, F>(&mut self, f: F) -> Result<T, ServerError>
    where
        T: Send + 'static,
        F: FnOnce(&mut BuildSession) -> T + Send + 'static,
    {
        let mut session = self.session.take().ok_or(ServerError::Stopped)?;
        let joined = tokio::task::spawn_blocking(move || {
            let value = f(&mut session);
            (session, value)
        })
        .await;
        match joined {
            Ok((session, value)) => {
                self.session = Some(session);
                Ok(value)
            }
            Err(e) => Err(ServerError::Build(
                InternalError::new(format!("build task failed: {e}")).into(),
            )),
        }
    }
}

fn compile_failure(outcome: &BuildOutcome) -> Response {
    Response::Error {
        kind: ErrorKind::Compile,
        message: failure_message(outcome),
    }
}

fn failure_message(outcome: &BuildOutcome) -> String {
    let files: Vec<String> = outcome
        .failed
        .iter()
        .map(|p| p.display().to_string())
        .collect();
    format!(
        "build failed: {} file(s) did not compile: {}",
        outcome.failed.len(),
        files.join(", ")
    )
}
