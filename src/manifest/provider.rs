//! HTTP manifest provider.
//!
//! Serves a project file tree as JSON on [`MANIFEST_PATH`]. Every response
//! carries the cross-origin isolation headers the browser-hosted sandbox
//! runtime requires on its host page:
//!
//! | Header                         | Value          |
//! |--------------------------------|----------------|
//! | `Cross-Origin-Embedder-Policy` | `require-corp` |
//! | `Cross-Origin-Opener-Policy`   | `same-origin`  |

use std::path::Path;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderName, HeaderValue};
use axum::routing::get;
use axum::{Json, Router};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::set_header::SetResponseHeaderLayer;
use tracing::{debug, info};

use crate::models::{FileContents, FileTree, FileTreeNode};
use crate::{AppError, Result};

/// Route serving the file tree.
pub const MANIFEST_PATH: &str = "/api/project-files";

/// Port used when `PORT` is not set.
pub const DEFAULT_PORT: u16 = 4000;

/// Directory names never included in a project snapshot.
pub const SKIPPED_DIRS: &[&str] = &[".git", "node_modules"];

/// Handler for `GET /health`; returns 200 OK with a plain-text body.
async fn health() -> &'static str {
    "ok"
}

/// Handler for `GET /api/project-files`.
async fn project_files(State(tree): State<Arc<FileTree>>) -> Json<FileTree> {
    Json(tree.as_ref().clone())
}

/// Build the provider router for `tree`.
#[must_use]
pub fn router(tree: FileTree) -> Router {
    Router::new()
        .route(MANIFEST_PATH, get(project_files))
        .route("/health", get(health))
        .with_state(Arc::new(tree))
        .layer(CorsLayer::permissive())
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static("cross-origin-embedder-policy"),
            HeaderValue::from_static("require-corp"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static("cross-origin-opener-policy"),
            HeaderValue::from_static("same-origin"),
        ))
}

/// Serve `tree` on an already bound `listener` until `ct` is cancelled.
///
/// # Errors
///
/// Returns `AppError::Io` if the listener address cannot be read or the
/// server fails while running.
pub async fn serve(listener: TcpListener, tree: FileTree, ct: CancellationToken) -> Result<()> {
    let addr = listener.local_addr()?;
    info!(%addr, files = tree.file_count(), "manifest provider listening");

    axum::serve(listener, router(tree))
        .with_graceful_shutdown(async move { ct.cancelled().await })
        .await
        .map_err(|err| AppError::Io(format!("manifest provider error: {err}")))?;

    info!("manifest provider shut down");
    Ok(())
}

/// Read a project directory into a file tree.
///
/// Symlinks and the directories listed in [`SKIPPED_DIRS`] are left out.
/// Files that are not valid UTF-8 are kept as binary contents.
///
/// # Errors
///
/// Returns `AppError::Io` if any directory or file cannot be read.
pub fn snapshot_directory(root: &Path) -> Result<FileTree> {
    let mut tree = FileTree::new();
    for (name, node) in read_children(root)? {
        tree.insert(name, node);
    }
    Ok(tree)
}

fn read_children(dir: &Path) -> Result<Vec<(String, FileTreeNode)>> {
    let mut children = Vec::new();
    let entries = std::fs::read_dir(dir)
        .map_err(|err| AppError::Io(format!("cannot read {}: {err}", dir.display())))?;

    for entry in entries {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let path = entry.path();
        let file_type = entry.file_type()?;

        if file_type.is_symlink() {
            debug!(path = %path.display(), "skipping symlink");
        } else if file_type.is_dir() {
            if SKIPPED_DIRS.contains(&name.as_str()) {
                continue;
            }
            let grandchildren = read_children(&path)?;
            children.push((name, FileTreeNode::directory(grandchildren)));
        } else if file_type.is_file() {
            let bytes = std::fs::read(&path)
                .map_err(|err| AppError::Io(format!("cannot read {}: {err}", path.display())))?;
            let contents = match String::from_utf8(bytes) {
                Ok(text) => FileContents::Text(text),
                Err(err) => FileContents::Binary(err.into_bytes()),
            };
            children.push((name, FileTreeNode::File { contents }));
        }
    }
    Ok(children)
}
