//! Header/body agreement and path shape.

use std::collections::HashSet;
use std::path::{Component, Path};

use super::model::{FileOp, FilePatch, Hunk, Line};

pub fn check(files: &[FilePatch]) -> Result<(), String> {
    if files.is_empty() {
        return Err("the diff touches no files".into());
    }

    let mut seen = HashSet::new();
    for file in files {
        let path = file
            .path()
            .ok_or("a file header has no usable path (both sides are /dev/null)")?;
        check_path(path)?;
        if !seen.insert(path) {
            return Err(format!("{path} appears more than once; combine its hunks into one file section"));
        }
        if file.rename || (file.op == FileOp::Modify && file.old_path != file.new_path) {
            return Err(format!(
                "renames and copies are not supported ({}); delete the old file and create the new one instead",
                path
            ));
        }
        if file.binary {
            // Binary patches carry no hunks; policy rejects them.
            continue;
        }
        if file.op == FileOp::Modify && file.hunks.is_empty() {
            return Err(format!("{path} has a file header but no hunks"));
        }

        let mut previous_end = 0usize;
        for (idx, hunk) in file.hunks.iter().enumerate() {
            let label = format!("hunk {} of {}", idx + 1, path);
            check_counts(hunk, &label)?;
            match file.op {
                FileOp::Create if hunk.has_context_or_removed() => {
                    return Err(format!(
                        "{label}: a new file can only contain `+` lines"
                    ));
                }
                FileOp::Delete if hunk.has_context_or_added() => {
                    return Err(format!(
                        "{label}: a deleted file can only contain `-` lines"
                    ));
                }
                _ => {}
            }
            if hunk.old_start < previous_end {
                return Err(format!(
                    "{label} starts at line {} which overlaps the previous hunk (ends at line {}); hunks must be in file order",
                    hunk.old_start,
                    previous_end.saturating_sub(1)
                ));
            }
            previous_end = hunk.old_start + hunk.old_count;
        }
    }
    Ok(())
}

fn check_counts(hunk: &Hunk, label: &str) -> Result<(), String> {
    let context = count(hunk, |l| matches!(l, Line::Context(_) | Line::Blank));
    let removed = count(hunk, |l| matches!(l, Line::Removed(_)));
    let added = count(hunk, |l| matches!(l, Line::Added(_)));

    if hunk.old_count != context + removed {
        return Err(format!(
            "{label}: hunk header/body mismatch: {} claims {} old-side line(s) but the body has {} ({} context, {} removed)",
            hunk.header(),
            hunk.old_count,
            context + removed,
            context,
            removed
        ));
    }
    if hunk.new_count != context + added {
        return Err(format!(
            "{label}: hunk header/body mismatch: {} claims {} new-side line(s) but the body has {} ({} context, {} added)",
            hunk.header(),
            hunk.new_count,
            context + added,
            context,
            added
        ));
    }
    if context + removed + added == 0 {
        return Err(format!("{label} is empty"));
    }
    Ok(())
}

fn count(hunk: &Hunk, pred: impl Fn(&Line) -> bool) -> usize {
    hunk.lines.iter().filter(|l| pred(l)).count()
}

/// Relative, inside the root, and not git metadata.
fn check_path(path: &str) -> Result<(), String> {
    if path.is_empty() || path.contains('\0') {
        return Err("a file path is empty or contains NUL".into());
    }
    let p = Path::new(path);
    if p.is_absolute() || path.starts_with('~') {
        return Err(format!("{path} is absolute; paths must be relative to the repository root"));
    }
    for component in p.components() {
        match component {
            Component::ParentDir => {
                return Err(format!("{path} escapes the repository root via `..`"));
            }
            Component::Normal(name) if name == ".git" => {
                return Err(format!("{path} points into .git metadata"));
            }
            Component::Prefix(_) | Component::RootDir => {
                return Err(format!("{path} is absolute; paths must be relative to the repository root"));
            }
            _ => {}
        }
    }
    Ok(())
}
