use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use git2::{
    Delta, IndexAddOption, Repository, ResetType, Signature, Status, StatusOptions,
};

const AUTHOR_NAME: &str = "patchwright";
const AUTHOR_EMAIL: &str = "patchwright@localhost";

/// Files touched between two commits.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    pub added: Vec<PathBuf>,
    pub modified: Vec<PathBuf>,
    pub deleted: Vec<PathBuf>,
}

impl ChangeSet {
    pub fn total_files(&self) -> usize {
        self.added.len() + self.modified.len() + self.deleted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total_files() == 0
    }
}

/// Git bookkeeping for one sandbox working tree.
///
/// Opened per operation; `git2::Repository` is not `Sync` and must not be
/// held across awaits.
pub struct SandboxRepo {
    repo: Repository,
}

impl SandboxRepo {
    pub fn open(root: &Path) -> Result<Self> {
        let repo = Repository::open(root)
            .with_context(|| format!("Failed to open git repository at {}", root.display()))?;
        Ok(Self { repo })
    }

    /// Initialise a repository over existing files and commit them as the baseline.
    pub fn init_with_baseline(root: &Path, message: &str) -> Result<(Self, String)> {
        let repo = Repository::init(root)
            .with_context(|| format!("Failed to init git repository at {}", root.display()))?;
        let this = Self { repo };
        let sha = this.commit_all(message)?;
        Ok((this, sha))
    }

    /// Stage every change (including deletions) and commit it on HEAD.
    pub fn commit_all(&self, message: &str) -> Result<String> {
        let mut index = self.repo.index()?;
        index.add_all(["*"].iter(), IndexAddOption::DEFAULT, None)?;
        index.update_all(["*"].iter(), None)?;
        index.write()?;

        let tree_id = index.write_tree()?;
        let tree = self.repo.find_tree(tree_id)?;
        let sig = Signature::now(AUTHOR_NAME, AUTHOR_EMAIL)?;

        // Unborn branch (fresh repo with no commits yet)
        let commit_id = match self.head_commit() {
            Some(parent) => {
                self.repo
                    .commit(Some("HEAD"), &sig, &sig, message, &tree, &[&parent])?
            }
            None => self.repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &[])?,
        };

        Ok(commit_id.to_string())
    }

    /// Create (or move) `name` to HEAD and make it the current branch.
    pub fn create_branch(&self, name: &str) -> Result<()> {
        let head = self
            .head_commit()
            .context("Cannot create a branch before the first commit")?;
        self.repo
            .branch(name, &head, true)
            .with_context(|| format!("Failed to create branch {}", name))?;
        self.repo
            .set_head(&format!("refs/heads/{}", name))
            .with_context(|| format!("Failed to switch to branch {}", name))?;
        Ok(())
    }

    pub fn current_branch(&self) -> Option<String> {
        let head = self.repo.head().ok()?;
        if head.is_branch() {
            head.shorthand().map(str::to_string)
        } else {
            None
        }
    }

    /// Hard-reset to `sha` and delete untracked files, leaving no trace of
    /// anything applied after it. Ignored files (build output) are kept.
    pub fn reset_hard(&self, sha: &str) -> Result<()> {
        let target = self
            .repo
            .revparse_single(sha)
            .with_context(|| format!("Unknown commit {}", sha))?;
        self.repo.reset(&target, ResetType::Hard, None)?;

        let workdir = self
            .repo
            .workdir()
            .context("Sandbox repository has no working directory")?
            .to_path_buf();
        let mut opts = StatusOptions::new();
        opts.include_untracked(true)
            .recurse_untracked_dirs(true)
            .include_ignored(false);
        let statuses = self.repo.statuses(Some(&mut opts))?;
        for entry in statuses.iter() {
            if entry.status().contains(Status::WT_NEW)
                && let Some(path) = entry.path()
            {
                let abs = workdir.join(path);
                let removed = if abs.is_dir() {
                    std::fs::remove_dir_all(&abs)
                } else {
                    std::fs::remove_file(&abs)
                };
                removed.with_context(|| format!("Failed to remove untracked {}", abs.display()))?;
            }
        }
        Ok(())
    }

    /// True when the working tree matches HEAD (ignored files aside).
    pub fn is_clean(&self) -> Result<bool> {
        let mut opts = StatusOptions::new();
        opts.include_untracked(true).include_ignored(false);
        Ok(self.repo.statuses(Some(&mut opts))?.is_empty())
    }

    /// Files changed between two commits.
    pub fn changes_between(&self, from_sha: &str, to_sha: &str) -> Result<ChangeSet> {
        let from_tree = self.repo.find_commit(git2::Oid::from_str(from_sha)?)?.tree()?;
        let to_tree = self.repo.find_commit(git2::Oid::from_str(to_sha)?)?.tree()?;
        let diff = self
            .repo
            .diff_tree_to_tree(Some(&from_tree), Some(&to_tree), None)?;

        let mut changes = ChangeSet::default();
        for delta in diff.deltas() {
            match delta.status() {
                Delta::Added | Delta::Copied => {
                    if let Some(p) = delta.new_file().path() {
                        changes.added.push(p.to_path_buf());
                    }
                }
                Delta::Modified | Delta::Typechange => {
                    if let Some(p) = delta.new_file().path() {
                        changes.modified.push(p.to_path_buf());
                    }
                }
                Delta::Deleted => {
                    if let Some(p) = delta.old_file().path() {
                        changes.deleted.push(p.to_path_buf());
                    }
                }
                Delta::Renamed => {
                    if let Some(p) = delta.old_file().path() {
                        changes.deleted.push(p.to_path_buf());
                    }
                    if let Some(p) = delta.new_file().path() {
                        changes.added.push(p.to_path_buf());
                    }
                }
                _ => {}
            }
        }
        Ok(changes)
    }

    /// Number of commits reachable from HEAD but not from `sha`.
    pub fn commits_since(&self, sha: &str) -> Result<usize> {
        let mut walk = self.repo.revwalk()?;
        walk.push_head()?;
        walk.hide(git2::Oid::from_str(sha)?)?;
        Ok(walk.count())
    }

    /// Current HEAD SHA (None for unborn branches).
    pub fn head_sha(&self) -> Option<String> {
        self.head_commit().map(|c| c.id().to_string())
    }

    fn head_commit(&self) -> Option<git2::Commit<'_>> {
        self.repo
            .head()
            .ok()
            .and_then(|head| head.peel_to_commit().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn setup_repo() -> (SandboxRepo, String, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("readme.txt"), "hello\n").unwrap();
        let (repo, sha) = SandboxRepo::init_with_baseline(dir.path(), "baseline").unwrap();
        (repo, sha, dir)
    }

    #[test]
    fn test_baseline_commit_has_valid_sha() {
        let (repo, sha, _dir) = setup_repo();
        assert_eq!(sha.len(), 40);
        assert_eq!(repo.head_sha(), Some(sha));
        assert!(repo.is_clean().unwrap());
    }

    #[test]
    fn test_commit_all_stages_deletions() {
        let (repo, base, dir) = setup_repo();
        fs::remove_file(dir.path().join("readme.txt")).unwrap();
        fs::write(dir.path().join("new.rs"), "fn main() {}\n").unwrap();
        let head = repo.commit_all("change").unwrap();

        let changes = repo.changes_between(&base, &head).unwrap();
        assert_eq!(changes.added, vec![PathBuf::from("new.rs")]);
        assert_eq!(changes.deleted, vec![PathBuf::from("readme.txt")]);
        assert_eq!(changes.total_files(), 2);
        assert_eq!(repo.commits_since(&base).unwrap(), 1);
    }

    #[test]
    fn test_reset_hard_discards_commits_and_untracked_files() {
        let (repo, base, dir) = setup_repo();
        fs::write(dir.path().join("readme.txt"), "changed\n").unwrap();
        repo.commit_all("bad change").unwrap();
        fs::create_dir_all(dir.path().join("gen")).unwrap();
        fs::write(dir.path().join("gen/stray.txt"), "stray").unwrap();

        repo.reset_hard(&base).unwrap();

        assert_eq!(repo.head_sha(), Some(base.clone()));
        assert_eq!(fs::read_to_string(dir.path().join("readme.txt")).unwrap(), "hello\n");
        assert!(!dir.path().join("gen/stray.txt").exists());
        assert!(repo.is_clean().unwrap());
        assert_eq!(repo.commits_since(&base).unwrap(), 0);
    }

    #[test]
    fn test_create_branch_switches_head() {
        let (repo, base, _dir) = setup_repo();
        repo.create_branch("patchwright/job-1").unwrap();
        assert_eq!(repo.current_branch().as_deref(), Some("patchwright/job-1"));
        assert_eq!(repo.head_sha(), Some(base));
    }

    #[test]
    fn test_changes_between_identical_commits_is_empty() {
        let (repo, base, _dir) = setup_repo();
        assert!(repo.changes_between(&base, &base).unwrap().is_empty());
    }
}
