//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering every bootstrap failure mode.
///
/// Cloneable so a session can expose its single terminal error in every
/// published snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Runtime boot failed for a reason other than an existing instance.
    RuntimeInit(String),
    /// A session was started before the runtime reached `Ready`.
    NotInitialized(String),
    /// A session was started while another run was still in flight.
    SessionBusy(String),
    /// Manifest transport failure or non-success response status.
    Fetch(String),
    /// Manifest payload could not be decoded into a file tree.
    Parse(String),
    /// The runtime rejected a file-tree write.
    Mount(String),
    /// A manifest entry resolved outside the mount root.
    PathViolation(String),
    /// A gating command exited with a nonzero code.
    Install(String),
    /// A process could not be started inside the runtime.
    Spawn(String),
    /// The run was cancelled by an external signal.
    Cancelled(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::RuntimeInit(msg) => write!(f, "runtime init: {msg}"),
            Self::NotInitialized(msg) => write!(f, "not initialized: {msg}"),
            Self::SessionBusy(msg) => write!(f, "session busy: {msg}"),
            Self::Fetch(msg) => write!(f, "fetch: {msg}"),
            Self::Parse(msg) => write!(f, "parse: {msg}"),
            Self::Mount(msg) => write!(f, "mount: {msg}"),
            Self::PathViolation(msg) => write!(f, "path violation: {msg}"),
            Self::Install(msg) => write!(f, "install: {msg}"),
            Self::Spawn(msg) => write!(f, "spawn: {msg}"),
            Self::Cancelled(msg) => write!(f, "cancelled: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl AppError {
    /// Whether this error belongs to a spawned process and should be shown
    /// together with the log accumulated up to the failure.
    #[must_use]
    pub fn is_process_error(&self) -> bool {
        matches!(self, Self::Install(_) | Self::Spawn(_))
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Parse(err.to_string())
        } else {
            Self::Fetch(err.to_string())
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(format!("invalid file tree: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
