//! Hard limits checked last, independent of diff correctness.

use std::path::{Path, PathBuf};

use super::model::FilePatch;

pub fn check(rendered: &str, files: &[FilePatch], root: &Path, max_chars: usize) -> Result<(), String> {
    let size = rendered.chars().count();
    if size > max_chars {
        return Err(format!(
            "the diff is {size} characters, over the {max_chars} character limit; make a smaller, focused change"
        ));
    }

    if let Some(file) = files.iter().find(|f| f.binary) {
        return Err(format!(
            "{} is a binary patch; binary files cannot be changed",
            file.path().unwrap_or("<unnamed>")
        ));
    }

    let canonical_root = root
        .canonicalize()
        .map_err(|e| format!("sandbox root could not be resolved: {e}"))?;
    for path in files.iter().filter_map(FilePatch::path) {
        let resolved = resolve_existing(&root.join(path))
            .ok_or_else(|| format!("{path} could not be resolved inside the sandbox"))?;
        if !resolved.starts_with(&canonical_root) {
            return Err(format!("{path} resolves outside the sandbox"));
        }
    }
    Ok(())
}

/// Canonical form of the deepest existing ancestor of `path` (itself included).
fn resolve_existing(path: &Path) -> Option<PathBuf> {
    path.ancestors()
        .find(|a| a.symlink_metadata().is_ok())
        .and_then(|a| a.canonicalize().ok())
}
