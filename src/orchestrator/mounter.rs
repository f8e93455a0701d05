//! File-tree mounting.

use tracing::{info, info_span, warn, Instrument};

use crate::models::FileTree;
use crate::runtime::SandboxRuntime;
use crate::{AppError, Result};

/// Write every node of `tree` into `runtime` under its mount root.
///
/// Not transactional: a failure part-way through may leave earlier entries
/// on disk and no rollback is attempted. Callers treat any failure as fatal
/// for the run.
///
/// # Errors
///
/// Returns `AppError::Mount` for every rejected write, including entries
/// that would resolve outside the mount root.
pub async fn mount(runtime: &dyn SandboxRuntime, tree: FileTree) -> Result<()> {
    let files = tree.file_count();
    if tree.is_empty() {
        warn!("mounting an empty file tree");
    }

    let span = info_span!("mount", files);
    runtime
        .mount(tree)
        .instrument(span)
        .await
        .map_err(|err| match err {
            AppError::Mount(_) => err,
            other => AppError::Mount(other.to_string()),
        })?;

    info!(files, "file tree mounted");
    Ok(())
}
