//! Bootstrap session model and lifecycle transitions.
//!
//! A session moves through
//! `Idle → FetchingManifest → Mounting → Installing → Starting → Running`,
//! with an absorbing `Error` reachable from every non-terminal phase. The
//! preview address lives inside `Running`, and the terminal error inside
//! `Error`, so neither can exist in any other phase.

use std::fmt::{Display, Formatter};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::readiness::ReadinessEvent;
use crate::AppError;

/// Current phase of a bootstrap run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionPhase {
    /// No run in flight.
    Idle,
    /// Retrieving the project manifest.
    FetchingManifest,
    /// Writing the file tree into the runtime.
    Mounting,
    /// Running the gating dependency install.
    Installing,
    /// Spawning the long-running server.
    Starting,
    /// Server spawned; output keeps streaming.
    Running {
        /// Address bound from the first readiness notification, if any.
        preview: Option<ReadinessEvent>,
    },
    /// The run failed; holds the first error raised.
    Error(AppError),
}

impl SessionPhase {
    /// Stable lowercase label for logs and presentation.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::FetchingManifest => "fetching_manifest",
            Self::Mounting => "mounting",
            Self::Installing => "installing",
            Self::Starting => "starting",
            Self::Running { .. } => "running",
            Self::Error(_) => "error",
        }
    }

    /// Whether a run is currently between `start` and `Running`.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        matches!(
            self,
            Self::FetchingManifest | Self::Mounting | Self::Installing | Self::Starting
        )
    }

    /// Determine whether a lifecycle transition is permitted.
    #[must_use]
    pub fn can_transition_to(&self, next: &SessionPhase) -> bool {
        if matches!(self, Self::Error(_)) {
            return false;
        }
        matches!(
            (self, next),
            (_, Self::Error(_))
                | (Self::Idle, Self::FetchingManifest)
                | (Self::FetchingManifest, Self::Mounting)
                | (Self::Mounting, Self::Installing)
                | (Self::Installing, Self::Starting)
                | (Self::Starting, Self::Running { preview: None })
        )
    }
}

impl Display for SessionPhase {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Producer of a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogSource {
    /// Progress line written by the controller itself.
    System,
    /// Output chunk from the dependency install.
    Install,
    /// Output chunk from the server process.
    Server,
}

/// One line (or chunk) of the session log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Time the entry was appended.
    pub at: DateTime<Utc>,
    /// Who produced the entry.
    pub source: LogSource,
    /// Entry text; process chunks are kept as delivered.
    pub text: String,
}

impl Display for LogEntry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.source {
            LogSource::System => f.write_str(&self.text),
            LogSource::Install => write!(f, "[Install] {}", self.text),
            LogSource::Server => write!(f, "[Server] {}", self.text),
        }
    }
}

/// Per-run state exposed to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapSession {
    /// Identifier of the current run; regenerated on every `begin`.
    pub run_id: String,
    /// Current phase.
    pub phase: SessionPhase,
    /// Ordered, append-only log of the current run.
    pub log: Vec<LogEntry>,
}

impl Default for BootstrapSession {
    fn default() -> Self {
        Self::new()
    }
}

impl BootstrapSession {
    /// A fresh idle session.
    #[must_use]
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            phase: SessionPhase::Idle,
            log: Vec::new(),
        }
    }

    /// Start a new run: `Idle → FetchingManifest`, clearing the log.
    ///
    /// Returns `false` (and changes nothing) unless the session is idle.
    pub fn begin(&mut self) -> bool {
        if self.phase != SessionPhase::Idle {
            return false;
        }
        self.run_id = Uuid::new_v4().to_string();
        self.log.clear();
        self.phase = SessionPhase::FetchingManifest;
        true
    }

    /// Move to `next` if the transition graph allows it.
    pub fn advance(&mut self, next: SessionPhase) -> bool {
        if !self.phase.can_transition_to(&next) {
            return false;
        }
        self.phase = next;
        true
    }

    /// Record a terminal error. The first error of a run wins; later calls
    /// return `false` and leave the session untouched.
    pub fn fail(&mut self, error: AppError) -> bool {
        if matches!(self.phase, SessionPhase::Error(_)) {
            return false;
        }
        self.phase = SessionPhase::Error(error);
        true
    }

    /// Bind the preview address from a readiness notification.
    ///
    /// Only the first notification of a `Running` session is bound.
    pub fn bind_preview(&mut self, event: ReadinessEvent) -> bool {
        match &mut self.phase {
            SessionPhase::Running { preview } if preview.is_none() => {
                *preview = Some(event);
                true
            }
            _ => false,
        }
    }

    /// Return to `Idle`, dropping the log and any error.
    ///
    /// The run identifier changes so late updates from the abandoned run
    /// can be told apart and ignored.
    pub fn reset(&mut self) {
        self.run_id = Uuid::new_v4().to_string();
        self.phase = SessionPhase::Idle;
        self.log.clear();
    }

    /// Append an entry to the log.
    pub fn push_log(&mut self, source: LogSource, text: impl Into<String>) {
        self.log.push(LogEntry {
            at: Utc::now(),
            source,
            text: text.into(),
        });
    }

    /// The terminal error, when the session is in `Error`.
    #[must_use]
    pub fn error(&self) -> Option<&AppError> {
        match &self.phase {
            SessionPhase::Error(err) => Some(err),
            _ => None,
        }
    }

    /// The bound preview URL, when running and ready.
    #[must_use]
    pub fn preview_url(&self) -> Option<&str> {
        match &self.phase {
            SessionPhase::Running {
                preview: Some(event),
            } => Some(event.url.as_str()),
            _ => None,
        }
    }

    /// Process output only, in arrival order, without progress lines.
    #[must_use]
    pub fn output_lines(&self) -> Vec<&str> {
        self.log
            .iter()
            .filter(|entry| entry.source != LogSource::System)
            .map(|entry| entry.text.as_str())
            .collect()
    }

    /// Every log entry rendered for display.
    #[must_use]
    pub fn rendered_log(&self) -> Vec<String> {
        self.log.iter().map(ToString::to_string).collect()
    }
}
