//! Disposable working copies, one per Job.
//!
//! A [`Sandbox`] owns a temporary directory holding a git repository on a
//! throwaway branch. The directory is removed by [`Sandbox::release`] or, on
//! any other exit path (early return, cancellation, unwinding), by `Drop`.

pub mod git;
pub mod url;

use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::Context;
use tempfile::TempDir;
use tokio::process::Command;
use walkdir::WalkDir;

use crate::config::Config;
use crate::errors::SandboxError;
use crate::job::{Job, Source};
use crate::util::slugify;

pub use git::{ChangeSet, SandboxRepo};

/// Directory names never copied from a local source.
const SKIP_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    "target",
    "dist",
    "build",
    ".next",
    ".turbo",
    ".venv",
    "__pycache__",
];

const BRANCH_PREFIX: &str = "patchwright/";

#[derive(Debug)]
pub struct Sandbox {
    dir: Option<TempDir>,
    root: PathBuf,
    branch: String,
    baseline: String,
}

impl Sandbox {
    /// Create and populate a sandbox for `job`. Any failure is fatal for the Job.
    pub async fn acquire(job: &Job, config: &Config) -> Result<Self, SandboxError> {
        let parent = config
            .sandbox
            .work_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir);
        std::fs::create_dir_all(&parent).map_err(|source| SandboxError::CreateDir {
            path: parent.clone(),
            source,
        })?;

        let job_slug = slugify(&job.id, 40);
        let job_slug = if job_slug.is_empty() {
            "job".to_string()
        } else {
            job_slug
        };
        let dir = tempfile::Builder::new()
            .prefix(&format!("patchwright-{}-", job_slug))
            .tempdir_in(&parent)
            .map_err(|source| SandboxError::CreateDir {
                path: parent.clone(),
                source,
            })?;
        let root = dir.path().join("repo");

        match job.source().ok_or(SandboxError::NoTarget)? {
            Source::Remote(url) => {
                clone_remote(url, job.base_branch(), &root, config).await?;
            }
            Source::Local(path) => {
                let src = path.to_path_buf();
                let dest = root.clone();
                tokio::task::spawn_blocking(move || copy_tree(&src, &dest))
                    .await
                    .context("Local copy task panicked")??;
                SandboxRepo::init_with_baseline(&root, "patchwright: baseline")?;
            }
        }

        let branch = format!("{}{}", BRANCH_PREFIX, job_slug);
        let repo = SandboxRepo::open(&root)?;
        repo.create_branch(&branch)?;
        let baseline = repo
            .head_sha()
            .context("Sandbox repository has no commits")?;

        tracing::debug!(
            job_id = %job.id,
            root = %root.display(),
            branch = %branch,
            "sandbox ready"
        );

        Ok(Self {
            dir: Some(dir),
            root,
            branch,
            baseline,
        })
    }

    /// Repository root inside the sandbox.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    /// Commit the sandbox started from.
    pub fn baseline(&self) -> &str {
        &self.baseline
    }

    pub fn repo(&self) -> anyhow::Result<SandboxRepo> {
        SandboxRepo::open(&self.root)
    }

    pub fn head_sha(&self) -> anyhow::Result<String> {
        self.repo()?
            .head_sha()
            .context("Sandbox repository has no HEAD")
    }

    /// Discard everything after `sha`: commits, edits and untracked files.
    pub fn rollback_to(&self, sha: &str) -> anyhow::Result<()> {
        self.repo()?.reset_hard(sha)
    }

    /// Files changed since the baseline.
    pub fn changes(&self) -> anyhow::Result<ChangeSet> {
        let repo = self.repo()?;
        let head = repo.head_sha().context("Sandbox repository has no HEAD")?;
        repo.changes_between(&self.baseline, &head)
    }

    /// Delete the sandbox directory now, reporting removal errors.
    pub fn release(mut self) -> std::io::Result<()> {
        match self.dir.take() {
            Some(dir) => dir.close(),
            None => Ok(()),
        }
    }
}

async fn clone_remote(
    url: &str,
    base_branch: Option<&str>,
    dest: &Path,
    config: &Config,
) -> Result<(), SandboxError> {
    let token = config.github_token();
    let clone_url = url::with_credentials(url, token);
    let display_url = url::redact_url(&clone_url);
    let timeout = config.clone_timeout();

    let mut cmd = Command::new("git");
    cmd.args(["clone", "--depth", "1"]);
    if let Some(branch) = base_branch {
        cmd.args(["--branch", branch]);
    }
    cmd.arg(&clone_url)
        .arg(dest)
        .env("GIT_TERMINAL_PROMPT", "0")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    tracing::info!(url = %display_url, "cloning repository");
    let output = match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(result) => result.map_err(|e| SandboxError::Clone {
            url: display_url.clone(),
            message: e.to_string(),
        })?,
        Err(_) => {
            return Err(SandboxError::CloneTimedOut {
                url: display_url,
                secs: timeout.as_secs(),
            });
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(SandboxError::Clone {
            url: display_url,
            message: url::redact_text(stderr.trim(), token),
        });
    }
    Ok(())
}

/// Copy a working tree, skipping VCS metadata and build output.
fn copy_tree(src: &Path, dest: &Path) -> Result<(), SandboxError> {
    if !src.is_dir() {
        return Err(SandboxError::MissingSource(src.to_path_buf()));
    }
    std::fs::create_dir_all(dest).map_err(|source| SandboxError::Copy {
        path: dest.to_path_buf(),
        source,
    })?;

    let walker = WalkDir::new(src).follow_links(false).into_iter().filter_entry(|e| {
        e.depth() == 0
            || !(e.file_type().is_dir()
                && e.file_name()
                    .to_str()
                    .is_some_and(|name| SKIP_DIRS.contains(&name)))
    });

    for entry in walker {
        let entry = entry.map_err(|e| SandboxError::Copy {
            path: e.path().map(Path::to_path_buf).unwrap_or_else(|| src.to_path_buf()),
            source: e.into(),
        })?;
        let rel = match entry.path().strip_prefix(src) {
            Ok(rel) if !rel.as_os_str().is_empty() => rel,
            _ => continue,
        };
        let target = dest.join(rel);
        let copy_err = |source| SandboxError::Copy {
            path: entry.path().to_path_buf(),
            source,
        };

        let file_type = entry.file_type();
        if file_type.is_dir() {
            std::fs::create_dir_all(&target).map_err(copy_err)?;
        } else if file_type.is_file() {
            std::fs::copy(entry.path(), &target).map_err(copy_err)?;
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &target).map_err(copy_err)?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(src: &Path, target: &Path) -> std::io::Result<()> {
    let link = std::fs::read_link(src)?;
    std::os::unix::fs::symlink(link, target)
}

#[cfg(not(unix))]
fn copy_symlink(_src: &Path, _target: &Path) -> std::io::Result<()> {
    Ok(())
}
