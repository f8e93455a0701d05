#![forbid(unsafe_code)]

//! `sandbox-bootstrap` — runs one bootstrap session against a local runtime.
//!
//! Boots the runtime, fetches the configured manifest, mounts it, installs
//! dependencies, starts the dev server, and renders progress to the
//! terminal until ctrl-c or SIGTERM cancels the session.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use sandbox_bootstrap::config::BootstrapConfig;
use sandbox_bootstrap::manifest::ManifestFetcher;
use sandbox_bootstrap::models::{BootstrapSession, SessionPhase};
use sandbox_bootstrap::orchestrator::SessionController;
use sandbox_bootstrap::runtime::lifecycle::RuntimeLifecycleManager;
use sandbox_bootstrap::runtime::local::LocalBooter;
use sandbox_bootstrap::telemetry::{init_tracing, shutdown_signal, LogFormat};
use sandbox_bootstrap::{AppError, Result};

/// How long to wait for background tasks to record a cancellation.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Parser)]
#[command(name = "sandbox-bootstrap", about = "Bootstrap a project dev server in a sandbox runtime", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the manifest endpoint from the configuration file.
    #[arg(long)]
    manifest_url: Option<String>,

    /// Override the directory the runtime mounts into.
    #[arg(long)]
    workspace: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("sandbox-bootstrap starting");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let config = BootstrapConfig::load_from_path(&args.config)?
        .with_overrides(args.manifest_url, args.workspace)?;
    info!(manifest_url = %config.manifest_url, "configuration loaded");

    // ── Boot the runtime ────────────────────────────────
    let booter = Arc::new(LocalBooter::new(config.runtime_options()));
    let lifecycle = Arc::new(RuntimeLifecycleManager::new(booter));
    lifecycle.ensure_booted().await?;

    // ── Build the session ───────────────────────────────
    let fetcher = ManifestFetcher::new(&config.manifest_url, config.fetch_timeout())?;
    let controller = Arc::new(SessionController::new(
        Arc::clone(&lifecycle),
        Arc::new(fetcher),
        config.session_settings(),
    ));

    let mut rx = controller.subscribe();
    let renderer = tokio::spawn(async move {
        let mut view = TerminalView::default();
        view.render(&rx.borrow_and_update());
        while rx.changed().await.is_ok() {
            let session = rx.borrow_and_update().clone();
            view.render(&session);
        }
    });

    let ct = CancellationToken::new();
    let signal_ct = ct.clone();
    let signal_handle = tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        signal_ct.cancel();
    });

    // ── Run until Running, then until shutdown ──────────
    let outcome = controller.start(ct.clone()).await;
    match &outcome {
        Ok(()) => {
            ct.cancelled().await;
            let mut rx = controller.subscribe();
            let settle = rx.wait_for(|session| !matches!(session.phase, SessionPhase::Running { .. }));
            if tokio::time::timeout(SHUTDOWN_GRACE, settle).await.is_err() {
                warn!("session did not settle before shutdown");
            }
        }
        Err(err) => error!(%err, "bootstrap failed"),
    }

    signal_handle.abort();
    renderer.abort();
    let _ = renderer.await;
    print_summary(&controller.snapshot());
    info!("sandbox-bootstrap shut down");

    match outcome {
        Err(AppError::Cancelled(_)) | Ok(()) => Ok(()),
        Err(err) => Err(err),
    }
}

/// Incremental terminal rendering of session snapshots.
#[derive(Debug, Default)]
struct TerminalView {
    printed: usize,
    phase: Option<&'static str>,
    preview: Option<String>,
}

impl TerminalView {
    fn render(&mut self, session: &BootstrapSession) {
        if session.log.len() < self.printed {
            self.printed = 0;
        }
        for entry in &session.log[self.printed..] {
            println!("{}", entry.to_string().trim_end());
        }
        self.printed = session.log.len();

        let label = session.phase.label();
        if self.phase != Some(label) {
            self.phase = Some(label);
            println!("── {}", session.phase);
        }

        let preview = session.preview_url().map(str::to_owned);
        if let Some(url) = preview.as_deref().filter(|_| preview != self.preview) {
            println!("── preview available at {url}");
        }
        self.preview = preview;
    }
}

fn print_summary(session: &BootstrapSession) {
    match session.error() {
        Some(err) if err.is_process_error() => {
            println!("── finished with error: {err} (process output above)");
        }
        Some(err) => println!("── finished with error: {err}"),
        None => println!("── finished in phase {}", session.phase),
    }
}
