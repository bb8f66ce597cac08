//! Hand a verified sandbox back to its owner.
//!
//! Local targets get the changed files mirrored back in place. Remote targets
//! get the branch pushed and, when an `owner/repo` is known, a pull request
//! opened with `gh`.

use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Serialize;
use tokio::process::Command;

use crate::config::Config;
use crate::errors::JobError;
use crate::events::EventSink;
use crate::job::{Job, Source};
use crate::sandbox::{ChangeSet, Sandbox, url};
use crate::util::summary_line;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Publication {
    PullRequest { url: String, branch: String },
    /// Pushed, but no `owner/repo` to open a pull request against.
    Pushed { branch: String },
    LocalUpdated { path: PathBuf, files: usize },
    /// Publication turned off for this run.
    Skipped,
}

impl Publication {
    pub fn describe(&self) -> String {
        match self {
            Publication::PullRequest { url, .. } => format!("pull request {}", url),
            Publication::Pushed { branch } => format!("pushed branch {}", branch),
            Publication::LocalUpdated { path, files } => {
                format!("updated {} file(s) in {}", files, path.display())
            }
            Publication::Skipped => "publication skipped".to_string(),
        }
    }
}

pub async fn publish(
    job: &Job,
    sandbox: &Sandbox,
    config: &Config,
    events: &EventSink,
) -> Result<Publication, JobError> {
    let result = match job.source().ok_or(JobError::Publication("job has no target".into()))? {
        Source::Local(path) => {
            let changes = sandbox
                .changes()
                .map_err(|e| JobError::Publication(format!("{:#}", e)))?;
            events.emit(format!(
                "copying {} changed file(s) back to {}",
                changes.total_files(),
                path.display()
            ));
            let src = sandbox.root().to_path_buf();
            let dest = path.to_path_buf();
            tokio::task::spawn_blocking(move || {
                let files = copy_back(&src, &dest, &changes)?;
                Ok::<_, anyhow::Error>(Publication::LocalUpdated { path: dest, files })
            })
            .await
            .map_err(|e| JobError::Publication(format!("copy-back task failed: {}", e)))?
        }
        Source::Remote(remote) => publish_remote(job, sandbox, config, events, remote).await,
    };

    result.map_err(|e: anyhow::Error| {
        JobError::Publication(url::redact_text(&format!("{:#}", e), config.github_token()))
    })
}

/// Mirror `changes` from `src` into `dest`. Returns the number of files touched.
pub fn copy_back(src: &Path, dest: &Path, changes: &ChangeSet) -> Result<usize> {
    for rel in changes.added.iter().chain(&changes.modified) {
        let from = src.join(rel);
        let to = dest.join(rel);
        if let Some(parent) = to.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::copy(&from, &to)
            .with_context(|| format!("Failed to copy {} to {}", rel.display(), to.display()))?;
    }
    for rel in &changes.deleted {
        let target = dest.join(rel);
        match std::fs::remove_file(&target) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to delete {}", target.display()));
            }
        }
    }
    Ok(changes.total_files())
}

async fn publish_remote(
    job: &Job,
    sandbox: &Sandbox,
    config: &Config,
    events: &EventSink,
    remote: &str,
) -> Result<Publication> {
    let token = config.github_token();
    let push_url = url::with_credentials(&url::normalize_repo_url(remote), token);
    let branch = sandbox.branch().to_string();

    events.emit(format!("pushing {} to {}", branch, url::redact_url(&push_url)));
    let refspec = format!("HEAD:refs/heads/{}", branch);
    let mut push = Command::new("git");
    push.args(["push", &push_url, &refspec])
        .current_dir(sandbox.root())
        .env("GIT_TERMINAL_PROMPT", "0")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped());
    let output = output_within(push, config.clone_timeout(), "git push").await?;
    if !output.status.success() {
        bail!(
            "Failed to push branch {}: {}",
            branch,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }

    let Some(upstream) = job.upstream() else {
        return Ok(Publication::Pushed { branch });
    };

    let title = format!("patchwright: {}", summary_line(&job.prompt, 60));
    let body = format!(
        "## Summary\n\nAutomated change for job `{}`:\n\n{}\n\n---\n*Generated, validated and verified by patchwright*",
        job.id,
        job.prompt.trim()
    );
    let mut gh = Command::new("gh");
    gh.args(["pr", "create", "--repo", &upstream, "--head", &branch])
        .args(["--title", &title, "--body", &body])
        .current_dir(sandbox.root())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(base) = job.base_branch() {
        gh.args(["--base", base]);
    }
    if let Some(token) = token {
        gh.env("GH_TOKEN", token);
    }

    let output = output_within(gh, config.clone_timeout(), "gh pr create").await?;
    if !output.status.success() {
        bail!(
            "Failed to create pull request: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    let url = String::from_utf8(output.stdout)
        .context("Invalid UTF-8 in gh output")?
        .lines()
        .map(str::trim)
        .rfind(|l| !l.is_empty())
        .unwrap_or_default()
        .to_string();

    events.emit(format!("opened {}", url));
    Ok(Publication::PullRequest { url, branch })
}

/// Run `cmd` to completion, killing it once `timeout` passes.
async fn output_within(mut cmd: Command, timeout: Duration, what: &str) -> Result<Output> {
    let output = cmd.kill_on_drop(true).output();
    tokio::time::timeout(timeout, output)
        .await
        .map_err(|_| anyhow::anyhow!("{} timed out after {}s", what, timeout.as_secs()))?
        .with_context(|| format!("Failed to run {}", what))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_back_mirrors_changes() {
        let src = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(src.path().join("src/new")).unwrap();
        std::fs::write(src.path().join("src/new/a.ts"), "export const a = 1;\n").unwrap();
        std::fs::write(src.path().join("main.ts"), "updated\n").unwrap();
        std::fs::write(dest.path().join("main.ts"), "original\n").unwrap();
        std::fs::write(dest.path().join("gone.ts"), "bye\n").unwrap();

        let changes = ChangeSet {
            added: vec!["src/new/a.ts".into()],
            modified: vec!["main.ts".into()],
            deleted: vec!["gone.ts".into(), "already-missing.ts".into()],
        };
        let files = copy_back(src.path(), dest.path(), &changes).unwrap();

        assert_eq!(files, 4);
        assert_eq!(
            std::fs::read_to_string(dest.path().join("src/new/a.ts")).unwrap(),
            "export const a = 1;\n"
        );
        assert_eq!(
            std::fs::read_to_string(dest.path().join("main.ts")).unwrap(),
            "updated\n"
        );
        assert!(!dest.path().join("gone.ts").exists());
    }

    #[tokio::test]
    async fn test_output_within_kills_slow_command() {
        let mut slow = Command::new("sleep");
        slow.arg("5");
        let err = output_within(slow, Duration::from_millis(100), "gh pr create")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("gh pr create timed out"), "{err}");
    }

    #[test]
    fn test_describe() {
        let p = Publication::PullRequest {
            url: "https://github.com/o/r/pull/7".into(),
            branch: "patchwright/j".into(),
        };
        assert_eq!(p.describe(), "pull request https://github.com/o/r/pull/7");
        assert_eq!(Publication::Skipped.describe(), "publication skipped");
        let json = serde_json::to_value(Publication::Pushed { branch: "b".into() }).unwrap();
        assert_eq!(json["kind"], "pushed");
    }
}
