//! Runtime lifecycle: single boot, sticky outcome, benign double boot.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use sandbox_bootstrap::models::{CommandSpec, FileTree, ManagedProcess, ReadinessEvent};
use sandbox_bootstrap::runtime::lifecycle::{RuntimeLifecycleManager, RuntimeState};
use sandbox_bootstrap::runtime::{
    BootError, BootFuture, RuntimeBooter, SandboxRuntime, LEGACY_ALREADY_BOOTED_MESSAGE,
};
use sandbox_bootstrap::{AppError, Result};

struct NullRuntime {
    ready_tx: broadcast::Sender<ReadinessEvent>,
}

impl NullRuntime {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            ready_tx: broadcast::channel(1).0,
        })
    }
}

impl SandboxRuntime for NullRuntime {
    fn mount(&self, _tree: FileTree) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }

    fn spawn(
        &self,
        _spec: CommandSpec,
    ) -> Pin<Box<dyn Future<Output = Result<ManagedProcess>> + Send + '_>> {
        Box::pin(async { Err(AppError::Spawn("null runtime".into())) })
    }

    fn subscribe_ready(&self) -> broadcast::Receiver<ReadinessEvent> {
        self.ready_tx.subscribe()
    }
}

/// Booter that replays a textual outcome after a short delay.
struct TextBooter {
    runtime: Arc<NullRuntime>,
    failure: Option<&'static str>,
    exposes_existing: bool,
    boots: AtomicUsize,
}

impl TextBooter {
    fn new(failure: Option<&'static str>, exposes_existing: bool) -> Arc<Self> {
        Arc::new(Self {
            runtime: NullRuntime::new(),
            failure,
            exposes_existing,
            boots: AtomicUsize::new(0),
        })
    }

    fn boots(&self) -> usize {
        self.boots.load(Ordering::SeqCst)
    }
}

impl RuntimeBooter for TextBooter {
    fn boot(&self) -> BootFuture<'_> {
        Box::pin(async move {
            self.boots.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            match self.failure {
                None => {
                    let runtime: Arc<dyn SandboxRuntime> = self.runtime.clone();
                    Ok(runtime)
                }
                Some(message) => Err(BootError::from_message(message)),
            }
        })
    }

    fn existing(&self) -> Option<Arc<dyn SandboxRuntime>> {
        self.exposes_existing.then(|| {
            let runtime: Arc<dyn SandboxRuntime> = self.runtime.clone();
            runtime
        })
    }
}

#[tokio::test]
async fn nothing_boots_until_requested() {
    let booter = TextBooter::new(None, false);
    let manager = RuntimeLifecycleManager::new(booter.clone());

    assert_eq!(manager.state(), RuntimeState::Uninitialized);
    assert!(manager.instance().is_none());
    assert_eq!(booter.boots(), 0);
}

#[tokio::test]
async fn repeated_calls_boot_once_and_share_the_instance() {
    let booter = TextBooter::new(None, false);
    let manager = RuntimeLifecycleManager::new(booter.clone());

    let first = manager.ensure_booted().await.expect("boot");
    let second = manager.ensure_booted().await.expect("boot");

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(booter.boots(), 1);
    assert_eq!(manager.state(), RuntimeState::Ready);
    assert!(manager.instance().is_some());
}

#[tokio::test]
async fn concurrent_callers_share_one_boot() {
    let booter = TextBooter::new(None, false);
    let manager = Arc::new(RuntimeLifecycleManager::new(booter.clone()));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.ensure_booted().await })
        })
        .collect();

    let mut instances = Vec::new();
    for handle in handles {
        instances.push(handle.await.expect("join").expect("boot"));
    }

    assert_eq!(booter.boots(), 1);
    assert!(instances.windows(2).all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));
}

#[tokio::test]
async fn state_reports_booting_while_in_flight() {
    let booter = TextBooter::new(None, false);
    let manager = Arc::new(RuntimeLifecycleManager::new(booter));

    let task = tokio::spawn({
        let manager = Arc::clone(&manager);
        async move { manager.ensure_booted().await.map(|_| ()) }
    });
    tokio::time::sleep(Duration::from_millis(5)).await;

    assert_eq!(manager.state(), RuntimeState::Booting);
    assert!(manager.instance().is_none());
    task.await.expect("join").expect("boot");
    assert_eq!(manager.state(), RuntimeState::Ready);
}

#[tokio::test]
async fn abandoned_boot_does_not_stay_booting() {
    let booter = TextBooter::new(None, false);
    let manager = RuntimeLifecycleManager::new(booter.clone());

    let abandoned = tokio::time::timeout(Duration::from_millis(5), manager.ensure_booted()).await;
    assert!(abandoned.is_err());
    assert_eq!(manager.state(), RuntimeState::Uninitialized);

    manager.ensure_booted().await.expect("boot after abandon");
    assert_eq!(manager.state(), RuntimeState::Ready);
    assert_eq!(booter.boots(), 2);
}

#[tokio::test]
async fn legacy_already_booted_message_attaches_to_existing_instance() {
    let booter = TextBooter::new(Some(LEGACY_ALREADY_BOOTED_MESSAGE), true);
    let manager = RuntimeLifecycleManager::new(booter);

    manager.ensure_booted().await.expect("benign double boot");
    assert_eq!(manager.state(), RuntimeState::Ready);
}

#[tokio::test]
async fn already_booted_without_reachable_instance_fails() {
    let booter = TextBooter::new(Some(LEGACY_ALREADY_BOOTED_MESSAGE), false);
    let manager = RuntimeLifecycleManager::new(booter);

    let err = manager.ensure_booted().await.err().unwrap();
    assert!(matches!(err, AppError::RuntimeInit(_)));
}

#[tokio::test]
async fn boot_failure_is_sticky() {
    let booter = TextBooter::new(Some("SharedArrayBuffer is not defined"), false);
    let manager = RuntimeLifecycleManager::new(booter.clone());

    let first = manager.ensure_booted().await.err().unwrap();
    let second = manager.ensure_booted().await.err().unwrap();

    assert_eq!(first, second);
    assert!(first.to_string().contains("SharedArrayBuffer is not defined"));
    assert!(matches!(first, AppError::RuntimeInit(_)));
    assert_eq!(booter.boots(), 1);
    assert_eq!(manager.state(), RuntimeState::Failed);
    assert!(manager.instance().is_none());
}
