//! Shared test helpers for session-level integration tests.
//!
//! Provides a scripted in-memory runtime, boot primitives, and manifest
//! sources so individual test modules can focus on behaviour rather than
//! plumbing.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures_util::{future, stream, FutureExt, StreamExt};
use tokio::sync::{broadcast, watch};

use sandbox_bootstrap::manifest::ManifestSource;
use sandbox_bootstrap::models::{
    BootstrapSession, CommandSpec, FileTree, FileTreeNode, ManagedProcess, ReadinessEvent,
};
use sandbox_bootstrap::orchestrator::{SessionController, SessionSettings};
use sandbox_bootstrap::runtime::lifecycle::RuntimeLifecycleManager;
use sandbox_bootstrap::runtime::{BootFuture, RuntimeBooter, SandboxRuntime};
use sandbox_bootstrap::{AppError, Result};

/// How long a test waits for an asynchronous state change.
pub const WAIT: Duration = Duration::from_secs(5);

/// Scripted behaviour of one command.
#[derive(Debug, Clone, Default)]
pub struct Script {
    /// Output chunks, delivered in order.
    pub chunks: Vec<&'static str>,
    /// Exit code; `None` keeps the process running until dropped.
    pub exit_code: Option<i32>,
    /// Readiness notifications broadcast when the process is spawned.
    pub ready: Vec<ReadinessEvent>,
}

impl Script {
    /// A process that prints `chunks` and exits with `code`.
    pub fn exits(chunks: &[&'static str], code: i32) -> Self {
        Self {
            chunks: chunks.to_vec(),
            exit_code: Some(code),
            ready: Vec::new(),
        }
    }

    /// A process that prints `chunks` and keeps running.
    pub fn runs(chunks: &[&'static str]) -> Self {
        Self {
            chunks: chunks.to_vec(),
            exit_code: None,
            ready: Vec::new(),
        }
    }

    /// Broadcast `event` when the process starts.
    pub fn announcing(mut self, event: ReadinessEvent) -> Self {
        self.ready.push(event);
        self
    }
}

/// In-memory runtime that records mounts and spawns and replays scripts.
pub struct FakeRuntime {
    scripts: Mutex<HashMap<String, Script>>,
    mounted: Mutex<Vec<FileTree>>,
    spawned: Mutex<Vec<CommandSpec>>,
    mount_error: Mutex<Option<AppError>>,
    ready_tx: broadcast::Sender<ReadinessEvent>,
}

impl FakeRuntime {
    /// A runtime where every unscripted command exits 0 silently.
    pub fn new() -> Arc<Self> {
        let (ready_tx, _) = broadcast::channel(16);
        Arc::new(Self {
            scripts: Mutex::new(HashMap::new()),
            mounted: Mutex::new(Vec::new()),
            spawned: Mutex::new(Vec::new()),
            mount_error: Mutex::new(None),
            ready_tx,
        })
    }

    /// Script the command whose display form is `command` (e.g. `npm install`).
    pub fn script(&self, command: &str, script: Script) {
        self.scripts
            .lock()
            .unwrap()
            .insert(command.to_owned(), script);
    }

    /// Make the next mount fail with `err`.
    pub fn fail_mount(&self, err: AppError) {
        *self.mount_error.lock().unwrap() = Some(err);
    }

    /// Broadcast a readiness event as if the runtime detected a server.
    pub fn announce(&self, event: ReadinessEvent) {
        let _ = self.ready_tx.send(event);
    }

    /// Trees mounted so far.
    pub fn mounted(&self) -> Vec<FileTree> {
        self.mounted.lock().unwrap().clone()
    }

    /// Commands spawned so far, in order.
    pub fn spawned(&self) -> Vec<String> {
        self.spawned
            .lock()
            .unwrap()
            .iter()
            .map(ToString::to_string)
            .collect()
    }
}

impl SandboxRuntime for FakeRuntime {
    fn mount(&self, tree: FileTree) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            if let Some(err) = self.mount_error.lock().unwrap().take() {
                return Err(err);
            }
            self.mounted.lock().unwrap().push(tree);
            Ok(())
        })
    }

    fn spawn(
        &self,
        spec: CommandSpec,
    ) -> Pin<Box<dyn Future<Output = Result<ManagedProcess>> + Send + '_>> {
        Box::pin(async move {
            let label = spec.to_string();
            self.spawned.lock().unwrap().push(spec.clone());
            let script = self
                .scripts
                .lock()
                .unwrap()
                .get(&label)
                .cloned()
                .unwrap_or_else(|| Script::exits(&[], 0));

            for event in script.ready {
                let _ = self.ready_tx.send(event);
            }

            let chunks = stream::iter(
                script
                    .chunks
                    .into_iter()
                    .map(|chunk| Bytes::from_static(chunk.as_bytes())),
            );
            let (output, exit) = match script.exit_code {
                Some(code) => (chunks.boxed(), future::ready(Ok(code)).boxed()),
                None => (
                    chunks.chain(stream::pending()).boxed(),
                    future::pending().boxed(),
                ),
            };
            Ok(ManagedProcess::new(spec, output, exit))
        })
    }

    fn subscribe_ready(&self) -> broadcast::Receiver<ReadinessEvent> {
        self.ready_tx.subscribe()
    }
}

/// Boot primitive handing out a prepared runtime.
pub struct FakeBooter {
    runtime: Arc<dyn SandboxRuntime>,
}

impl FakeBooter {
    /// Boots succeed with `runtime`.
    pub fn succeeding(runtime: Arc<dyn SandboxRuntime>) -> Self {
        Self { runtime }
    }
}

impl RuntimeBooter for FakeBooter {
    fn boot(&self) -> BootFuture<'_> {
        Box::pin(future::ready(Ok(Arc::clone(&self.runtime))))
    }

    fn existing(&self) -> Option<Arc<dyn SandboxRuntime>> {
        Some(Arc::clone(&self.runtime))
    }
}

/// Manifest source returning a fixed outcome, counting fetches.
pub struct StaticManifest {
    outcome: Result<FileTree>,
    fetches: AtomicUsize,
}

impl StaticManifest {
    /// Always returns `tree`.
    pub fn tree(tree: FileTree) -> Arc<Self> {
        Arc::new(Self {
            outcome: Ok(tree),
            fetches: AtomicUsize::new(0),
        })
    }

    /// Always fails with `err`.
    pub fn error(err: AppError) -> Arc<Self> {
        Arc::new(Self {
            outcome: Err(err),
            fetches: AtomicUsize::new(0),
        })
    }

    /// Number of fetches so far.
    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl ManifestSource for StaticManifest {
    fn fetch_manifest(&self) -> Pin<Box<dyn Future<Output = Result<FileTree>> + Send + '_>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Box::pin(future::ready(self.outcome.clone()))
    }
}

/// Manifest source that never answers.
pub struct HangingManifest;

impl ManifestSource for HangingManifest {
    fn fetch_manifest(&self) -> Pin<Box<dyn Future<Output = Result<FileTree>> + Send + '_>> {
        Box::pin(future::pending())
    }
}

/// The minimal project used across session tests.
pub fn sample_tree() -> FileTree {
    FileTree::new()
        .with("package.json", FileTreeNode::file("{}"))
        .with(
            "src",
            FileTreeNode::directory([("main.js", FileTreeNode::file("console.log(1)"))]),
        )
}

/// Readiness event for `port` on localhost.
pub fn ready_on(port: u16) -> ReadinessEvent {
    ReadinessEvent::new(port, format!("http://localhost:{port}"))
}

/// A lifecycle manager already `Ready` with `runtime`.
pub async fn ready_lifecycle(runtime: Arc<FakeRuntime>) -> Arc<RuntimeLifecycleManager> {
    let booter = Arc::new(FakeBooter::succeeding(runtime));
    let lifecycle = Arc::new(RuntimeLifecycleManager::new(booter));
    lifecycle.ensure_booted().await.expect("fake boot succeeds");
    lifecycle
}

/// A controller over a ready fake runtime with default commands.
pub async fn controller_for(
    runtime: Arc<FakeRuntime>,
    manifest: Arc<dyn ManifestSource>,
) -> Arc<SessionController> {
    let lifecycle = ready_lifecycle(runtime).await;
    Arc::new(SessionController::new(
        lifecycle,
        manifest,
        SessionSettings::default(),
    ))
}

/// Wait until a snapshot satisfies `done`, returning that snapshot.
pub async fn wait_until(
    rx: &mut watch::Receiver<BootstrapSession>,
    done: impl FnMut(&BootstrapSession) -> bool,
) -> BootstrapSession {
    tokio::time::timeout(WAIT, rx.wait_for(done))
        .await
        .expect("state change within timeout")
        .expect("controller alive")
        .clone()
}
