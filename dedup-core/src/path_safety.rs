use crate::error::{DedupError, Result};
use std::path::{Component, Path, PathBuf};

#[derive(Clone, Copy, Debug, Default)]
pub struct PathPolicy {
    pub follow_symlinks: bool,
}

fn unsafe_path(reason: String) -> DedupError {
    DedupError::UnsafePath { reason }
}

/// Ensure `rel` is safe to write relative to `root`: no absolute paths, no `..`, and
/// no symlinked component under `root` unless `follow_symlinks`, in which case the
/// deepest existing ancestor must still resolve inside `root`.
///
/// The target itself may not exist yet.
pub fn validate_path(root: &Path, rel: &Path, policy: PathPolicy) -> Result<PathBuf> {
    if rel.is_absolute() || rel.has_root() {
        return Err(unsafe_path(format!("absolute paths are not allowed: {:?}", rel)));
    }
    for comp in rel.components() {
        match comp {
            Component::ParentDir => {
                return Err(unsafe_path(format!("parent traversal not allowed: {:?}", rel)))
            }
            Component::Prefix(_) => {
                return Err(unsafe_path(format!("path prefix not allowed: {:?}", rel)))
            }
            _ => {}
        }
    }
    let candidate = root.join(rel);
    if !policy.follow_symlinks {
        let mut cur = root.to_path_buf();
        for comp in rel.components() {
            cur = cur.join(comp);
            if let Ok(m) = std::fs::symlink_metadata(&cur) {
                if m.file_type().is_symlink() {
                    return Err(unsafe_path(format!("symlink in path (not following): {:?}", cur)));
                }
            }
        }
        Ok(candidate)
    } else {
        let root_can = std::fs::canonicalize(root)?;
        let mut existing = candidate.as_path();
        while !existing.exists() {
            match existing.parent() {
                Some(p) => existing = p,
                None => break,
            }
        }
        let existing_can = std::fs::canonicalize(existing)?;
        if !existing_can.starts_with(&root_can) {
            return Err(unsafe_path(format!("path escapes root: {:?}", rel)));
        }
        Ok(candidate)
    }
}
