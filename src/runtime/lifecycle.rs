//! Process-wide runtime lifecycle.
//!
//! [`RuntimeLifecycleManager`] owns the single [`SandboxRuntime`] instance.
//! The first `ensure_booted` call drives the boot primitive; concurrent
//! callers wait on the same initialization and every caller observes the
//! same outcome afterwards. A boot that reports an already existing
//! instance is absorbed by attaching to that instance.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::{info, info_span, warn, Instrument};

use super::{BootError, RuntimeBooter, SandboxRuntime};
use crate::{AppError, Result};

/// Observable lifecycle state of the shared runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeState {
    /// No boot has been requested yet.
    Uninitialized,
    /// The boot primitive is running.
    Booting,
    /// The instance is usable.
    Ready,
    /// Boot failed; the failure is reported to every later caller.
    Failed,
}

/// Owner of the shared runtime instance.
pub struct RuntimeLifecycleManager {
    booter: Arc<dyn RuntimeBooter>,
    instance: OnceCell<Result<Arc<dyn SandboxRuntime>>>,
    booting: AtomicBool,
}

impl std::fmt::Debug for RuntimeLifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeLifecycleManager")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl RuntimeLifecycleManager {
    /// Create a manager around a boot primitive. Nothing boots until
    /// [`ensure_booted`](Self::ensure_booted) is called.
    #[must_use]
    pub fn new(booter: Arc<dyn RuntimeBooter>) -> Self {
        Self {
            booter,
            instance: OnceCell::new(),
            booting: AtomicBool::new(false),
        }
    }

    /// Return the shared runtime, booting it on first call.
    ///
    /// # Errors
    ///
    /// Returns `AppError::RuntimeInit` if the boot primitive failed for any
    /// reason other than an already existing instance. The failure is
    /// sticky: later calls return the same error without booting again.
    pub async fn ensure_booted(&self) -> Result<Arc<dyn SandboxRuntime>> {
        self.instance
            .get_or_init(|| async {
                let _booting = BootingFlag::raise(&self.booting);
                self.boot_once().await
            })
            .await
            .clone()
    }

    /// The runtime, if it has reached `Ready`. Never triggers a boot.
    #[must_use]
    pub fn instance(&self) -> Option<Arc<dyn SandboxRuntime>> {
        match self.instance.get() {
            Some(Ok(runtime)) => Some(Arc::clone(runtime)),
            _ => None,
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> RuntimeState {
        match self.instance.get() {
            Some(Ok(_)) => RuntimeState::Ready,
            Some(Err(_)) => RuntimeState::Failed,
            None if self.booting.load(Ordering::SeqCst) => RuntimeState::Booting,
            None => RuntimeState::Uninitialized,
        }
    }

    async fn boot_once(&self) -> Result<Arc<dyn SandboxRuntime>> {
        let span = info_span!("runtime_boot");
        async {
            match self.booter.boot().await {
                Ok(runtime) => {
                    info!("sandbox runtime booted");
                    Ok(runtime)
                }
                Err(BootError::AlreadyBooted) => {
                    info!("sandbox runtime already booted; attaching to existing instance");
                    self.booter.existing().ok_or_else(|| {
                        AppError::RuntimeInit(
                            "runtime reports an existing instance but none is reachable".into(),
                        )
                    })
                }
                Err(BootError::Failed(msg)) => {
                    warn!(error = %msg, "sandbox runtime boot failed");
                    Err(AppError::RuntimeInit(format!(
                        "failed to initialize runtime: {msg}"
                    )))
                }
            }
        }
        .instrument(span)
        .await
    }
}

/// Marks a boot in flight; lowered when the boot finishes or its caller
/// goes away.
struct BootingFlag<'a>(&'a AtomicBool);

impl<'a> BootingFlag<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for BootingFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}
