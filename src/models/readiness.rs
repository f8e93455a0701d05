//! Readiness notification emitted when a sandboxed service accepts connections.

use serde::{Deserialize, Serialize};

/// Address reported by the runtime once a service inside it is reachable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReadinessEvent {
    /// Port the service listens on.
    pub port: u16,
    /// Preview URL for the service.
    pub url: String,
}

impl ReadinessEvent {
    /// Construct a readiness event.
    #[must_use]
    pub fn new(port: u16, url: impl Into<String>) -> Self {
        Self {
            port,
            url: url.into(),
        }
    }
}
