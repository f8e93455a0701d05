//! Host-directory runtime.
//!
//! Backs the [`SandboxRuntime`] capability with a directory on the host:
//! mounts are written under that directory and processes run with it as
//! their working directory. Processes are started with:
//! - their own process group (unix), killed as a whole when the handle is
//!   dropped or the process exits, so wrapper scripts such as `npm run dev`
//!   cannot leave the real dev server behind; `kill_on_drop(true)` elsewhere.
//! - `env_clear()` plus an allowlist so host secrets stay out of the child.
//! - stdout and stderr merged into one chunk stream, scanned for readiness
//!   announcements that are broadcast to subscribers.

use std::env;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use futures_util::{stream, FutureExt, StreamExt};
use tempfile::TempDir;
use tokio::io::AsyncRead;
use tokio::process::Command;
use tokio::sync::{broadcast, mpsc};
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

use super::path_safety::resolve_in_root;
use super::ready_scan::ReadinessScanner;
use super::{BootError, BootFuture, RuntimeBooter, SandboxRuntime};
use crate::models::{CommandSpec, FileTree, FileTreeEntry, ManagedProcess, ReadinessEvent};
use crate::{AppError, Result};

/// Environment variables inherited by every spawned process.
pub const ALLOWED_ENV_VARS: &[&str] = &[
    "PATH",
    "HOME",
    "LANG",
    "TERM",
    // Windows-specific variables.
    "USERPROFILE",
    "SystemRoot",
    "TEMP",
    "TMP",
    "APPDATA",
    "LOCALAPPDATA",
    "COMSPEC",
];

/// Capacity of the per-process chunk channel.
const OUTPUT_BUFFER: usize = 256;

/// Capacity of the readiness broadcast.
const READY_BUFFER: usize = 16;

/// Options for creating a [`LocalRuntime`].
#[derive(Debug, Clone, Default)]
pub struct LocalRuntimeOptions {
    /// Mount root; a temporary directory is used when absent.
    pub root: Option<PathBuf>,
    /// Extra host variables passed to spawned processes.
    pub env_allowlist: Vec<String>,
}

/// Boot primitive that allows a single [`LocalRuntime`] per booter.
#[derive(Debug)]
pub struct LocalBooter {
    options: LocalRuntimeOptions,
    instance: Mutex<Option<Arc<LocalRuntime>>>,
}

impl LocalBooter {
    /// Create a booter; nothing is allocated until `boot`.
    #[must_use]
    pub fn new(options: LocalRuntimeOptions) -> Self {
        Self {
            options,
            instance: Mutex::new(None),
        }
    }
}

impl RuntimeBooter for LocalBooter {
    fn boot(&self) -> BootFuture<'_> {
        Box::pin(async move {
            let mut slot = self
                .instance
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if slot.is_some() {
                return Err(BootError::AlreadyBooted);
            }
            let runtime = Arc::new(
                LocalRuntime::create(&self.options)
                    .map_err(|err| BootError::Failed(err.to_string()))?,
            );
            *slot = Some(Arc::clone(&runtime));
            let runtime: Arc<dyn SandboxRuntime> = runtime;
            Ok(runtime)
        })
    }

    fn existing(&self) -> Option<Arc<dyn SandboxRuntime>> {
        let slot = self
            .instance
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        slot.as_ref()
            .map(|runtime| Arc::clone(runtime) as Arc<dyn SandboxRuntime>)
    }
}

/// A runtime rooted at a host directory.
#[derive(Debug)]
pub struct LocalRuntime {
    root: PathBuf,
    // Held so the temporary root lives as long as the runtime.
    _temp: Option<TempDir>,
    env_allowlist: Vec<String>,
    ready_tx: broadcast::Sender<ReadinessEvent>,
}

impl LocalRuntime {
    /// Create the mount root (or a temporary one) and the readiness channel.
    ///
    /// # Errors
    ///
    /// Returns `AppError::RuntimeInit` if the root cannot be created.
    pub fn create(options: &LocalRuntimeOptions) -> Result<Self> {
        let (root, temp) = match &options.root {
            Some(root) => {
                std::fs::create_dir_all(root).map_err(|err| {
                    AppError::RuntimeInit(format!("cannot create {}: {err}", root.display()))
                })?;
                let root = root.canonicalize().map_err(|err| {
                    AppError::RuntimeInit(format!("cannot resolve {}: {err}", root.display()))
                })?;
                (root, None)
            }
            None => {
                let temp = tempfile::Builder::new()
                    .prefix("sandbox-bootstrap-")
                    .tempdir()
                    .map_err(|err| AppError::RuntimeInit(format!("cannot create temp root: {err}")))?;
                let root = temp.path().canonicalize().map_err(|err| {
                    AppError::RuntimeInit(format!("cannot resolve temp root: {err}"))
                })?;
                (root, Some(temp))
            }
        };

        let (ready_tx, _) = broadcast::channel(READY_BUFFER);
        info!(root = %root.display(), "local runtime created");

        Ok(Self {
            root,
            _temp: temp,
            env_allowlist: options.env_allowlist.clone(),
            ready_tx,
        })
    }

    /// Absolute mount root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn write_tree(&self, tree: FileTree) -> Result<()> {
        for (relative, entry) in tree.entries() {
            let target = resolve_in_root(&self.root, &relative)?;
            match entry {
                FileTreeEntry::Directory => {
                    tokio::fs::create_dir_all(&target).await.map_err(|err| {
                        AppError::Mount(format!("cannot create {}: {err}", relative.display()))
                    })?;
                }
                FileTreeEntry::File(contents) => {
                    if let Some(parent) = target.parent() {
                        tokio::fs::create_dir_all(parent).await.map_err(|err| {
                            AppError::Mount(format!(
                                "cannot create parent of {}: {err}",
                                relative.display()
                            ))
                        })?;
                    }
                    tokio::fs::write(&target, contents.as_bytes())
                        .await
                        .map_err(|err| {
                            AppError::Mount(format!("cannot write {}: {err}", relative.display()))
                        })?;
                    debug!(path = %relative.display(), bytes = contents.len(), "file written");
                }
            }
        }
        Ok(())
    }

    fn start_process(&self, spec: CommandSpec) -> Result<ManagedProcess> {
        let mut cmd = Command::new(&spec.command);
        cmd.args(&spec.args)
            .current_dir(&self.root)
            .env_clear()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        for key in ALLOWED_ENV_VARS
            .iter()
            .copied()
            .chain(self.env_allowlist.iter().map(String::as_str))
        {
            if let Ok(value) = env::var(key) {
                cmd.env(key, value);
            }
        }

        let mut child = cmd
            .spawn()
            .map_err(|err| AppError::Spawn(format!("failed to spawn `{spec}`: {err}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::Spawn(format!("stdout of `{spec}` was not captured")))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| AppError::Spawn(format!("stderr of `{spec}` was not captured")))?;

        let pid = child.id().unwrap_or(0);
        info!(command = %spec, pid, "process spawned");
        let group = ProcessGroup::leader(pid);

        let (chunk_tx, chunk_rx) = mpsc::channel::<Bytes>(OUTPUT_BUFFER);
        tokio::spawn(pump_output(
            spec.to_string(),
            stdout,
            stderr,
            chunk_tx,
            self.ready_tx.clone(),
        ));

        let output = stream::unfold(chunk_rx, |mut rx| async move {
            rx.recv().await.map(|chunk| (chunk, rx))
        })
        .boxed();

        let label = spec.to_string();
        let exit = async move {
            // Dropping the future (or finishing it) takes the group down.
            let _group = group;
            let status = child
                .wait()
                .await
                .map_err(|err| AppError::Spawn(format!("failed to wait on `{label}`: {err}")))?;
            Ok(status.code().unwrap_or(-1))
        }
        .boxed();

        Ok(ManagedProcess::new(spec, output, exit))
    }
}

impl SandboxRuntime for LocalRuntime {
    fn mount(
        &self,
        tree: FileTree,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(self.write_tree(tree))
    }

    fn spawn(
        &self,
        spec: CommandSpec,
    ) -> Pin<Box<dyn Future<Output = Result<ManagedProcess>> + Send + '_>> {
        Box::pin(async move { self.start_process(spec) })
    }

    fn subscribe_ready(&self) -> broadcast::Receiver<ReadinessEvent> {
        self.ready_tx.subscribe()
    }
}

/// Process group led by a spawned command; every member is killed on drop.
#[derive(Debug)]
struct ProcessGroup {
    #[cfg_attr(not(unix), allow(dead_code))]
    pgid: i32,
}

impl ProcessGroup {
    fn leader(pid: u32) -> Option<Self> {
        i32::try_from(pid)
            .ok()
            .filter(|pgid| *pgid > 0)
            .map(|pgid| Self { pgid })
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            use nix::errno::Errno;
            use nix::sys::signal::{killpg, Signal};
            use nix::unistd::Pid;

            match killpg(Pid::from_raw(self.pgid), Signal::SIGKILL) {
                Ok(()) => debug!(pgid = self.pgid, "process group killed"),
                Err(Errno::ESRCH) => {}
                Err(err) => warn!(pgid = self.pgid, %err, "failed to kill process group"),
            }
        }
    }
}

/// Forward merged stdout/stderr chunks in arrival order and broadcast any
/// readiness announcement found in them.
///
/// Keeps draining the pipes after the consumer drops the stream so the
/// child never blocks on a full pipe and readiness is still detected.
async fn pump_output<O, E>(
    label: String,
    stdout: O,
    stderr: E,
    chunk_tx: mpsc::Sender<Bytes>,
    ready_tx: broadcast::Sender<ReadinessEvent>,
) where
    O: AsyncRead + Unpin + Send + 'static,
    E: AsyncRead + Unpin + Send + 'static,
{
    let mut merged = stream::select(ReaderStream::new(stdout), ReaderStream::new(stderr));
    let mut scanner = ReadinessScanner::new();
    let mut forwarding = true;

    while let Some(item) = merged.next().await {
        let chunk = match item {
            Ok(chunk) => chunk,
            Err(err) => {
                warn!(command = %label, %err, "output read failed, stopping");
                break;
            }
        };

        for event in scanner.feed(&chunk) {
            info!(command = %label, url = %event.url, "readiness announced");
            // No subscribers is not an error.
            let _ = ready_tx.send(event);
        }

        if forwarding && chunk_tx.send(chunk).await.is_err() {
            debug!(command = %label, "output consumer dropped; draining only");
            forwarding = false;
        }
    }

    for event in scanner.finish() {
        let _ = ready_tx.send(event);
    }
    debug!(command = %label, "output stream closed");
}
