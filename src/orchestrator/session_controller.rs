//! Bootstrap session controller.
//!
//! Sequences one run: fetch the manifest, mount it, run the gating install,
//! start the dev server, then keep streaming server output and bind the
//! preview address from the first readiness notification. Every phase
//! change and log append is published as a [`BootstrapSession`] snapshot
//! on a `watch` channel for the presentation layer.
//!
//! Every suspension point races the run's cancellation token. A cancelled
//! or failed run ends in `Error` while the shared runtime stays usable for
//! the next run.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use super::mounter::mount;
use super::process::{run_gating, run_to_exit, spawn_process};
use super::readiness::{ReadinessOutcome, ReadinessWatcher};
use crate::manifest::ManifestSource;
use crate::models::{
    BootstrapSession, ChunkDecoder, CommandSpec, LogSource, ManagedProcess, SessionPhase,
};
use crate::runtime::lifecycle::RuntimeLifecycleManager;
use crate::runtime::SandboxRuntime;
use crate::{AppError, Result};

/// Commands and limits applied to every run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    /// Gating dependency install.
    pub install: CommandSpec,
    /// Long-running dev server.
    pub server: CommandSpec,
    /// Optional bound on the readiness wait; `None` waits indefinitely.
    pub readiness_timeout: Option<Duration>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            install: CommandSpec::new("npm", ["install"]),
            server: CommandSpec::new("npm", ["run", "dev"]),
            readiness_timeout: None,
        }
    }
}

/// Background work belonging to the current run.
#[derive(Debug)]
struct ActiveRun {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

/// Shared handle publishing session snapshots.
type SessionState = Arc<watch::Sender<BootstrapSession>>;

/// Top-level state machine for bootstrap runs.
pub struct SessionController {
    lifecycle: Arc<RuntimeLifecycleManager>,
    manifest: Arc<dyn ManifestSource>,
    settings: SessionSettings,
    state: SessionState,
    active: Mutex<Option<ActiveRun>>,
}

impl std::fmt::Debug for SessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController")
            .field("settings", &self.settings)
            .field("phase", &self.state.borrow().phase)
            .finish_non_exhaustive()
    }
}

impl SessionController {
    /// Create an idle controller.
    #[must_use]
    pub fn new(
        lifecycle: Arc<RuntimeLifecycleManager>,
        manifest: Arc<dyn ManifestSource>,
        settings: SessionSettings,
    ) -> Self {
        let (tx, _) = watch::channel(BootstrapSession::new());
        Self {
            lifecycle,
            manifest,
            settings,
            state: Arc::new(tx),
            active: Mutex::new(None),
        }
    }

    /// Subscribe to session snapshots.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<BootstrapSession> {
        self.state.subscribe()
    }

    /// Copy of the current session state.
    #[must_use]
    pub fn snapshot(&self) -> BootstrapSession {
        self.state.borrow().clone()
    }

    /// Settings applied to every run.
    #[must_use]
    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Run the bootstrap pipeline up to `Running`.
    ///
    /// Returns once the server has been spawned; its output and readiness
    /// keep updating the session in the background. Cancelling `cancel`
    /// at any point moves the run to `Error(Cancelled)`.
    ///
    /// # Errors
    ///
    /// - `AppError::SessionBusy` if the session is not `Idle` (state is left
    ///   untouched; call [`reset`](Self::reset) first).
    /// - `AppError::NotInitialized` if the runtime is not `Ready`.
    /// - Any phase error (`Fetch`, `Parse`, `Mount`, `Install`, `Spawn`,
    ///   `Cancelled`); the same error is recorded in the session.
    pub async fn start(&self, cancel: CancellationToken) -> Result<()> {
        let runtime = self.lifecycle.instance();

        let mut admitted: Result<String> = Err(AppError::SessionBusy(String::new()));
        self.state.send_if_modified(|session| {
            if session.phase != SessionPhase::Idle {
                admitted = Err(AppError::SessionBusy(format!(
                    "a run is already {}",
                    session.phase
                )));
                return false;
            }
            if runtime.is_none() {
                let err = AppError::NotInitialized("sandbox runtime is not initialized".into());
                session.fail(err.clone());
                admitted = Err(err);
                return true;
            }
            session.begin();
            admitted = Ok(session.run_id.clone());
            true
        });
        let run_id = admitted?;
        let Some(runtime) = runtime else {
            return Err(AppError::NotInitialized(
                "sandbox runtime is not initialized".into(),
            ));
        };

        let run_cancel = cancel.child_token();
        self.replace_active(ActiveRun {
            cancel: run_cancel.clone(),
            tasks: Vec::new(),
        });

        let run = RunContext {
            run_id: run_id.clone(),
            state: Arc::clone(&self.state),
            cancel: run_cancel,
        };

        let span = info_span!("bootstrap_run", run_id = %run_id);
        let result = self
            .run_pipeline(&run, runtime)
            .instrument(span.clone())
            .await;

        match result {
            Ok(tasks) => {
                self.track_tasks(&run_id, tasks);
                span.in_scope(|| info!("session running"));
                Ok(())
            }
            Err(err) => {
                span.in_scope(|| warn!(%err, "bootstrap run failed"));
                run.update(|session| session.fail(err.clone()));
                Err(err)
            }
        }
    }

    /// Abandon the current run and return to `Idle` with an empty log.
    ///
    /// Cancels the run's background streaming and readiness tasks (which
    /// stops the server process). The runtime itself is left intact.
    pub fn reset(&self) {
        self.state.send_modify(BootstrapSession::reset);
        let previous = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(run) = previous {
            run.cancel.cancel();
            for task in run.tasks {
                task.abort();
            }
        }
        info!("session reset");
    }

    async fn run_pipeline(
        &self,
        run: &RunContext,
        runtime: Arc<dyn SandboxRuntime>,
    ) -> Result<Vec<JoinHandle<()>>> {
        run.system("Fetching project files...");
        let tree = run
            .guard("fetching the manifest", self.manifest.fetch_manifest())
            .await?;

        run.advance(SessionPhase::Mounting)?;
        run.system("Mounting files...");
        run.guard("mounting files", mount(runtime.as_ref(), tree))
            .await?;

        run.advance(SessionPhase::Installing)?;
        run.system("Installing dependencies...");
        let mut install_log = run.output_log(LogSource::Install);
        let installed = run
            .guard(
                "installing dependencies",
                run_gating(
                    runtime.as_ref(),
                    self.settings.install.clone(),
                    |chunk| install_log.push(&chunk),
                ),
            )
            .await;
        install_log.finish();
        installed?;
        run.system("Dependencies installed successfully");

        run.advance(SessionPhase::Starting)?;
        run.system("Starting development server...");
        let watcher = ReadinessWatcher::subscribe(runtime.as_ref());
        let server = run
            .guard(
                "starting the server",
                spawn_process(runtime.as_ref(), self.settings.server.clone()),
            )
            .await?;

        run.advance(SessionPhase::Running { preview: None })?;
        Ok(vec![
            spawn_server_stream(run.clone(), server),
            spawn_readiness_binding(run.clone(), watcher, self.settings.readiness_timeout),
        ])
    }

    fn replace_active(&self, next: ActiveRun) {
        let previous = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(next);
        if let Some(run) = previous {
            run.cancel.cancel();
            for task in run.tasks {
                task.abort();
            }
        }
    }

    fn track_tasks(&self, run_id: &str, tasks: Vec<JoinHandle<()>>) {
        let mut guard = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.state.borrow().run_id == run_id;
        match guard.as_mut() {
            Some(run) if current => run.tasks.extend(tasks),
            _ => tasks.iter().for_each(JoinHandle::abort),
        }
    }
}

/// Per-run view of the session state; updates from a stale run are ignored.
#[derive(Debug, Clone)]
struct RunContext {
    run_id: String,
    state: SessionState,
    cancel: CancellationToken,
}

impl RunContext {
    /// Apply `change` if this run is still the current one.
    fn update(&self, change: impl FnOnce(&mut BootstrapSession) -> bool) -> bool {
        self.state.send_if_modified(|session| {
            if session.run_id != self.run_id {
                return false;
            }
            change(session)
        })
    }

    fn system(&self, text: &str) {
        self.update(|session| {
            session.push_log(LogSource::System, text);
            true
        });
    }

    fn advance(&self, next: SessionPhase) -> Result<()> {
        let label = next.label();
        if self.update(|session| session.advance(next)) {
            info!(phase = label, "session phase changed");
            Ok(())
        } else {
            Err(AppError::Cancelled(format!(
                "run was abandoned before reaching {label}"
            )))
        }
    }

    fn output_log(&self, source: LogSource) -> OutputLog {
        OutputLog {
            run: self.clone(),
            source,
            decoder: ChunkDecoder::new(),
        }
    }

    /// Await `fut` unless the run is cancelled first.
    async fn guard<T>(&self, activity: &str, fut: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(AppError::Cancelled(format!("cancelled while {activity}"))),
            outcome = fut => outcome,
        }
    }
}

/// Appends one process's output to the log, one entry per chunk in arrival
/// order. A character split across chunks lands in the entry that
/// completes it.
#[derive(Debug)]
struct OutputLog {
    run: RunContext,
    source: LogSource,
    decoder: ChunkDecoder,
}

impl OutputLog {
    fn push(&mut self, chunk: &[u8]) {
        let text = self.decoder.decode(chunk);
        self.append(text);
    }

    /// Flush a trailing incomplete character once the stream has ended.
    fn finish(mut self) {
        let text = self.decoder.finish();
        self.append(text);
    }

    fn append(&self, text: String) {
        if text.is_empty() {
            return;
        }
        self.run.update(|session| {
            session.push_log(self.source, text);
            true
        });
    }
}

/// Stream server output into the log until the process exits or the run is
/// cancelled. A server exit leaves the phase unchanged.
fn spawn_server_stream(run: RunContext, server: ManagedProcess) -> JoinHandle<()> {
    let span = info_span!("server_output", run_id = %run.run_id);
    tokio::spawn(
        async move {
            let mut log = run.output_log(LogSource::Server);
            let exit = tokio::select! {
                biased;
                () = run.cancel.cancelled() => None,
                exit = run_to_exit(server, |chunk| log.push(&chunk)) => Some(exit),
            };
            match exit {
                None => {
                    run.update(|session| {
                        session.fail(AppError::Cancelled("cancelled while running".into()))
                    });
                }
                Some(Ok(code)) => {
                    log.finish();
                    info!(exit_code = code, "server process exited");
                    run.system(&format!("Server process exited with code {code}"));
                }
                Some(Err(err)) => {
                    log.finish();
                    warn!(%err, "server process ended abnormally");
                    run.system(&format!("Server process ended abnormally: {err}"));
                }
            }
        }
        .instrument(span),
    )
}

/// Bind the preview address from the first readiness notification.
fn spawn_readiness_binding(
    run: RunContext,
    watcher: ReadinessWatcher,
    timeout: Option<Duration>,
) -> JoinHandle<()> {
    let span = info_span!("readiness", run_id = %run.run_id);
    tokio::spawn(
        async move {
            tokio::select! {
                biased;
                () = run.cancel.cancelled() => {
                    run.update(|session| {
                        session.fail(AppError::Cancelled("cancelled while running".into()))
                    });
                }
                outcome = watcher.wait(timeout) => match outcome {
                    ReadinessOutcome::Ready(event) => {
                        info!(url = %event.url, port = event.port, "preview bound");
                        let line = format!("Server ready at {}", event.url);
                        run.update(|session| {
                            if session.bind_preview(event) {
                                session.push_log(LogSource::System, line);
                                true
                            } else {
                                false
                            }
                        });
                    }
                    ReadinessOutcome::TimedOut => {
                        let secs = timeout.map_or(0, |limit| limit.as_secs());
                        warn!(timeout_seconds = secs, "no readiness notification before timeout");
                        run.system(&format!("No readiness notification within {secs}s"));
                    }
                    ReadinessOutcome::Closed => {
                        warn!("runtime closed its readiness broadcast");
                    }
                },
            }
        }
        .instrument(span),
    )
}
