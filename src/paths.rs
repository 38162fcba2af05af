//! Working-directory scoping for resource group directories
//!
//! Every directory the engine touches has to live strictly below the working
//! root. The check runs before any enumeration and fails closed.

use crate::error::SyncError;
use path_clean::PathClean;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Resolve `dir` (relative to `root`, or absolute) to an existing directory
/// strictly inside `root`.
///
/// `.`/`..` segments and trailing separators are normalized and symlinks are
/// resolved before the containment check, so the same directory always maps
/// to the same path.
pub fn resolve(root: &Path, dir: &Path) -> Result<PathBuf, SyncError> {
    let root = absolute_root(root)?;
    let resolved = normalize(&root.join(dir));

    if resolved == root || !resolved.starts_with(&root) {
        return Err(SyncError::InsecurePath {
            path: resolved,
            root,
        });
    }

    if !resolved.is_dir() {
        return Err(SyncError::DirectoryNotFound(resolved));
    }

    debug!("Resolved {:?} to {:?}", dir, resolved);
    Ok(resolved)
}

/// Check that `dir` stays inside `root` (the root itself allowed).
///
/// Used for archive directories, which may not exist before the first update:
/// the existing part of the path is symlink-resolved, the missing tail is
/// appended as is.
pub fn contain(root: &Path, dir: &Path) -> Result<PathBuf, SyncError> {
    let root = absolute_root(root)?;
    let resolved = normalize(&root.join(dir));

    if !resolved.starts_with(&root) {
        return Err(SyncError::InsecurePath {
            path: resolved,
            root,
        });
    }

    Ok(resolved)
}

fn absolute_root(root: &Path) -> Result<PathBuf, SyncError> {
    let absolute = if root.is_absolute() {
        root.to_path_buf()
    } else {
        std::env::current_dir()
            .map_err(|e| SyncError::io(root, e))?
            .join(root)
    };
    Ok(normalize(&absolute))
}

// Canonical form of the longest existing prefix, followed by the missing tail
fn normalize(path: &Path) -> PathBuf {
    let cleaned = path.clean();
    let mut existing = cleaned.as_path();
    let mut tail = Vec::new();

    loop {
        if let Ok(canonical) = existing.canonicalize() {
            return tail
                .iter()
                .rev()
                .fold(canonical, |path, name| path.join(name));
        }

        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                tail.push(name.to_os_string());
                existing = parent;
            }
            _ => return cleaned,
        }
    }
}
