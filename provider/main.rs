#![forbid(unsafe_code)]

//! `manifest-provider` — serves a project file tree over HTTP.
//!
//! Serves the built-in starter project, or a snapshot of `--project-dir`,
//! on `GET /api/project-files` with cross-origin isolation headers.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use sandbox_bootstrap::manifest::provider::{self, DEFAULT_PORT};
use sandbox_bootstrap::manifest::sample::starter_project;
use sandbox_bootstrap::telemetry::{init_tracing, shutdown_signal, LogFormat};
use sandbox_bootstrap::{AppError, Result};

#[derive(Debug, Parser)]
#[command(name = "manifest-provider", about = "Serve a project file tree for sandbox bootstrap", version, long_about = None)]
struct Cli {
    /// Port to listen on.
    #[arg(long, env = "PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Address to bind.
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
    bind: IpAddr,

    /// Serve a snapshot of this directory instead of the starter project.
    #[arg(long)]
    project_dir: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    let tree = match &args.project_dir {
        Some(dir) => {
            let tree = provider::snapshot_directory(dir)?;
            info!(dir = %dir.display(), files = tree.file_count(), "project snapshot loaded");
            tree
        }
        None => starter_project(),
    };

    let addr = SocketAddr::new(args.bind, args.port);
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|err| AppError::Io(format!("cannot bind {addr}: {err}")))?;

    let ct = CancellationToken::new();
    let signal_ct = ct.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        signal_ct.cancel();
    });

    provider::serve(listener, tree, ct).await
}
