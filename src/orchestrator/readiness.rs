//! One-shot readiness watching.

use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::models::ReadinessEvent;
use crate::runtime::SandboxRuntime;

/// How a readiness wait ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadinessOutcome {
    /// The first readiness notification.
    Ready(ReadinessEvent),
    /// The caller's timeout elapsed first.
    TimedOut,
    /// The runtime stopped broadcasting before any notification.
    Closed,
}

/// Listener registered for exactly one readiness notification.
///
/// Subscribe before spawning the process whose readiness is awaited so an
/// early announcement cannot be missed.
#[derive(Debug)]
pub struct ReadinessWatcher {
    rx: broadcast::Receiver<ReadinessEvent>,
}

impl ReadinessWatcher {
    /// Register a listener on `runtime`'s readiness broadcast.
    #[must_use]
    pub fn subscribe(runtime: &dyn SandboxRuntime) -> Self {
        Self {
            rx: runtime.subscribe_ready(),
        }
    }

    /// Wait for the first notification, optionally bounded by `timeout`.
    ///
    /// Consumes the watcher; later notifications are never observed.
    pub async fn wait(mut self, timeout: Option<Duration>) -> ReadinessOutcome {
        match timeout {
            Some(limit) => tokio::time::timeout(limit, next_event(&mut self.rx))
                .await
                .unwrap_or(ReadinessOutcome::TimedOut),
            None => next_event(&mut self.rx).await,
        }
    }
}

/// Register on `runtime` and resolve with the first notification, without
/// a timeout. Returns `None` if the runtime closes its broadcast first.
pub async fn watch_once(runtime: &dyn SandboxRuntime) -> Option<ReadinessEvent> {
    match ReadinessWatcher::subscribe(runtime).wait(None).await {
        ReadinessOutcome::Ready(event) => Some(event),
        ReadinessOutcome::TimedOut | ReadinessOutcome::Closed => None,
    }
}

async fn next_event(rx: &mut broadcast::Receiver<ReadinessEvent>) -> ReadinessOutcome {
    loop {
        match rx.recv().await {
            Ok(event) => {
                debug!(port = event.port, url = %event.url, "readiness notification received");
                return ReadinessOutcome::Ready(event);
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "readiness listener lagged; taking the oldest retained event");
            }
            Err(broadcast::error::RecvError::Closed) => return ReadinessOutcome::Closed,
        }
    }
}
