use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use crate::util::slugify;

/// Write the last candidate of a failed Job for offline debugging.
///
/// File name: `<job-id>-<utc timestamp>.patch`. The reason goes in a `#`
/// comment block above the diff, which `git apply` skips as leading garbage.
pub fn persist(
    dir: &Path,
    job_id: &str,
    reason: &str,
    candidate: &str,
    at: DateTime<Utc>,
) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;

    let slug = match slugify(job_id, 60) {
        s if s.is_empty() => "job".to_string(),
        s => s,
    };
    let path = dir.join(format!("{}-{}.patch", slug, at.format("%Y%m%dT%H%M%SZ")));

    let mut content = format!("# patchwright failed patch\n# job: {}\n", job_id);
    for line in reason.lines() {
        content.push_str("# ");
        content.push_str(line);
        content.push('\n');
    }
    content.push('\n');
    content.push_str(candidate);
    if !candidate.ends_with('\n') {
        content.push('\n');
    }

    std::fs::write(&path, content)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}
