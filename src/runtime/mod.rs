//! Sandbox runtime capability.
//!
//! The orchestrator never implements isolation itself. It consumes a
//! [`SandboxRuntime`] through four operations (boot, mount, spawn, and a
//! readiness broadcast) and owns exactly one instance per process through
//! [`lifecycle::RuntimeLifecycleManager`].

pub mod lifecycle;
pub mod local;
pub mod path_safety;
pub mod ready_scan;

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::broadcast;

use crate::models::{CommandSpec, FileTree, ManagedProcess, ReadinessEvent};
use crate::Result;

/// Message the browser-hosted runtime reports when a second instance is
/// booted in the same page.
pub const LEGACY_ALREADY_BOOTED_MESSAGE: &str = "Only a single WebContainer instance can be booted";

/// Outcome of a failed boot attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootError {
    /// An instance already exists elsewhere in the process; it is usable.
    AlreadyBooted,
    /// Boot failed for any other reason.
    Failed(String),
}

impl BootError {
    /// Classify a textual boot failure from a primitive that does not
    /// report typed errors.
    #[must_use]
    pub fn from_message(message: &str) -> Self {
        if message.trim() == LEGACY_ALREADY_BOOTED_MESSAGE {
            Self::AlreadyBooted
        } else {
            Self::Failed(message.to_owned())
        }
    }
}

impl Display for BootError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlreadyBooted => f.write_str("runtime already booted"),
            Self::Failed(msg) => f.write_str(msg),
        }
    }
}

impl std::error::Error for BootError {}

/// An isolated execution environment with a filesystem, a process
/// namespace, and a readiness broadcast.
pub trait SandboxRuntime: Send + Sync {
    /// Write `tree` into the runtime filesystem under its mount root.
    ///
    /// Not transactional: a failure may leave earlier entries written.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Mount`](crate::AppError::Mount) when a write is
    /// rejected, or [`AppError::PathViolation`](crate::AppError::PathViolation)
    /// when an entry would land outside the mount root.
    fn mount(&self, tree: FileTree) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Start `spec` inside the runtime.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Spawn`](crate::AppError::Spawn) if the process
    /// cannot be started.
    fn spawn(
        &self,
        spec: CommandSpec,
    ) -> Pin<Box<dyn Future<Output = Result<ManagedProcess>> + Send + '_>>;

    /// Subscribe to readiness notifications emitted from now on.
    fn subscribe_ready(&self) -> broadcast::Receiver<ReadinessEvent>;
}

/// Future returned by [`RuntimeBooter::boot`].
pub type BootFuture<'a> =
    Pin<Box<dyn Future<Output = std::result::Result<Arc<dyn SandboxRuntime>, BootError>> + Send + 'a>>;

/// Boot primitive for a runtime implementation.
pub trait RuntimeBooter: Send + Sync {
    /// Boot a new runtime instance.
    ///
    /// # Errors
    ///
    /// Returns [`BootError::AlreadyBooted`] when an instance already exists,
    /// and [`BootError::Failed`] for every other failure.
    fn boot(&self) -> BootFuture<'_>;

    /// The instance booted earlier by this primitive, if one is reachable.
    fn existing(&self) -> Option<Arc<dyn SandboxRuntime>>;
}
