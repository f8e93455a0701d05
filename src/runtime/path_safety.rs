//! Mount-root containment checks.
//!
//! Every path written by the local runtime must stay inside its mount
//! root. Paths are normalized lexically, `..` traversal above the root is
//! rejected, and existing targets are canonicalized so a symlink planted
//! inside the root cannot redirect a write outside it.

use std::path::{Component, Path, PathBuf};

use crate::{AppError, Result};

/// Resolve `relative` against `root`, refusing anything that escapes it.
///
/// Returns the absolute path to write to.
///
/// # Errors
///
/// Returns `AppError::PathViolation` if:
/// - The root cannot be canonicalized.
/// - The candidate is absolute or climbs above the root with `..`.
/// - The resolved path, after following symlinks, leaves the root.
pub fn resolve_in_root(root: &Path, relative: impl AsRef<Path>) -> Result<PathBuf> {
    let root = root
        .canonicalize()
        .map_err(|err| AppError::PathViolation(format!("mount root invalid: {err}")))?;

    let mut normalized = PathBuf::new();
    for component in relative.as_ref().components() {
        match component {
            Component::ParentDir => {
                if !normalized.pop() {
                    return Err(AppError::PathViolation(
                        "path attempts to escape mount root".into(),
                    ));
                }
            }
            Component::CurDir => {}
            Component::RootDir | Component::Prefix(_) => {
                return Err(AppError::PathViolation(
                    "absolute paths are not allowed in a manifest".into(),
                ));
            }
            Component::Normal(part) => normalized.push(part),
        }
    }

    let absolute = root.join(normalized);

    if absolute.exists() {
        let canonical = absolute
            .canonicalize()
            .map_err(|err| AppError::PathViolation(format!("cannot resolve path: {err}")))?;
        if !canonical.starts_with(&root) {
            return Err(AppError::PathViolation(
                "symlink target escapes mount root".into(),
            ));
        }
        Ok(canonical)
    } else {
        Ok(absolute)
    }
}
