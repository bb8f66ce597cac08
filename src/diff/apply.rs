//! Hand a validated diff to `git apply` and commit the result.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::ValidatedDiff;
use crate::sandbox::SandboxRepo;

const APPLY_TIMEOUT: Duration = Duration::from_secs(60);

/// Apply `diff` in `root` and commit it with `message`. Returns the new HEAD.
///
/// `git apply` is all-or-nothing, so a failure leaves the tree as it was.
pub async fn apply(root: &Path, diff: &ValidatedDiff, message: &str) -> Result<String> {
    let mut child = Command::new("git")
        .args(["apply", "--whitespace=nowarn", "-"])
        .current_dir(root)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .context("Failed to spawn git apply")?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(diff.text.as_bytes())
            .await
            .context("Failed to write patch to git apply")?;
        stdin.shutdown().await.context("Failed to close git apply stdin")?;
    }

    let output = tokio::time::timeout(APPLY_TIMEOUT, child.wait_with_output())
        .await
        .map_err(|_| anyhow::anyhow!("git apply timed out after {}s", APPLY_TIMEOUT.as_secs()))?
        .context("Failed to wait for git apply")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("git apply failed: {}", stderr.trim());
    }

    let repo = SandboxRepo::open(root)?;
    repo.commit_all(message)
}
