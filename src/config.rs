//! Bootstrap configuration parsing and validation.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::Url;
use serde::Deserialize;

use crate::models::CommandSpec;
use crate::orchestrator::SessionSettings;
use crate::runtime::local::LocalRuntimeOptions;
use crate::{AppError, Result};

/// Timeout values (seconds) for network and readiness waits.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TimeoutConfig {
    /// Manifest request timeout.
    #[serde(default = "default_fetch_seconds")]
    pub fetch_seconds: u64,
    /// Readiness wait after the server starts; 0 means no timeout.
    #[serde(default)]
    pub readiness_seconds: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            fetch_seconds: default_fetch_seconds(),
            readiness_seconds: 0,
        }
    }
}

fn default_fetch_seconds() -> u64 {
    30
}

fn default_install() -> CommandSpec {
    CommandSpec::new("npm", ["install"])
}

fn default_server() -> CommandSpec {
    CommandSpec::new("npm", ["run", "dev"])
}

/// Configuration parsed from `bootstrap.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct BootstrapConfig {
    /// Endpoint serving the project file tree.
    pub manifest_url: String,
    /// Directory the local runtime mounts into; a temporary one when absent.
    #[serde(default)]
    pub workspace_root: Option<PathBuf>,
    /// Gating dependency install command.
    #[serde(default = "default_install")]
    pub install: CommandSpec,
    /// Long-running dev server command.
    #[serde(default = "default_server")]
    pub server: CommandSpec,
    /// Timeout configuration.
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Extra host environment variables passed to spawned processes.
    #[serde(default)]
    pub env_allowlist: Vec<String>,
}

impl BootstrapConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply command-line overrides and validate the result again.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the overridden configuration is invalid.
    pub fn with_overrides(
        mut self,
        manifest_url: Option<String>,
        workspace_root: Option<PathBuf>,
    ) -> Result<Self> {
        if let Some(url) = manifest_url {
            self.manifest_url = url;
        }
        if workspace_root.is_some() {
            self.workspace_root = workspace_root;
        }
        self.validate()?;
        Ok(self)
    }

    /// Manifest request timeout.
    #[must_use]
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.fetch_seconds)
    }

    /// Readiness wait bound, `None` when disabled.
    #[must_use]
    pub fn readiness_timeout(&self) -> Option<Duration> {
        match self.timeouts.readiness_seconds {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// Commands and limits for the session controller.
    #[must_use]
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            install: self.install.clone(),
            server: self.server.clone(),
            readiness_timeout: self.readiness_timeout(),
        }
    }

    /// Options for the local runtime.
    #[must_use]
    pub fn runtime_options(&self) -> LocalRuntimeOptions {
        LocalRuntimeOptions {
            root: self.workspace_root.clone(),
            env_allowlist: self.env_allowlist.clone(),
        }
    }

    fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.manifest_url)
            .map_err(|err| AppError::Config(format!("manifest_url invalid: {err}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(AppError::Config(format!(
                "manifest_url must use http or https, got `{}`",
                url.scheme()
            )));
        }

        if self.timeouts.fetch_seconds == 0 {
            return Err(AppError::Config(
                "timeouts.fetch_seconds must be greater than zero".into(),
            ));
        }

        for (name, spec) in [("install", &self.install), ("server", &self.server)] {
            if spec.command.trim().is_empty() {
                return Err(AppError::Config(format!(
                    "{name}.command must not be empty"
                )));
            }
        }

        if let Some(key) = self
            .env_allowlist
            .iter()
            .find(|key| key.is_empty() || key.contains('='))
        {
            return Err(AppError::Config(format!(
                "env_allowlist entry `{key}` is not a variable name"
            )));
        }

        Ok(())
    }
}
