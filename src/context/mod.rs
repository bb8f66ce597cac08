//! Size-bounded snapshot of the files most relevant to a change request.
//!
//! Scoring is deterministic: prompt words found in a file's path weigh most,
//! then occurrences in its content, then a small bonus for manifest and
//! readme files. Ties break on path so the same sandbox and prompt always
//! produce the same context.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::path::Path;
use std::sync::LazyLock;

use anyhow::Result;
use glob::Pattern;
use regex::Regex;
use walkdir::WalkDir;

/// Files larger than this are listed in the index but never read.
const MAX_FILE_BYTES: u64 = 200_000;

/// Index entries rendered into the prompt.
const MAX_INDEX_ENTRIES: usize = 400;

/// A partial file is only worth including with at least this much room left.
const MIN_PARTIAL_CHARS: usize = 1_000;

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
    "coverage",
];

const IGNORE_GLOBS: &[&str] = &[
    "*.lock",
    "package-lock.json",
    "pnpm-lock.yaml",
    "*.min.js",
    "*.min.css",
    "*.map",
    "*.png",
    "*.jpg",
    "*.jpeg",
    "*.gif",
    "*.ico",
    "*.webp",
    "*.pdf",
    "*.woff",
    "*.woff2",
    "*.zip",
];

const KEY_FILES: &[&str] = &[
    "README.md",
    "package.json",
    "Cargo.toml",
    "pyproject.toml",
    "go.mod",
    "tsconfig.json",
];

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "that", "this", "from", "into", "add", "make", "use", "should",
    "when", "then", "all", "any", "are", "not", "can", "have", "has", "new", "fix", "please",
];

static WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[A-Za-z_][A-Za-z0-9_]{2,}").unwrap());

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RepoContext {
    /// Relative path to (possibly truncated) content.
    pub files: BTreeMap<String, String>,
    /// Every candidate file, sorted.
    pub index: Vec<String>,
    /// Files whose content was cut to fit the budget.
    pub truncated: BTreeSet<String>,
    pub budget: usize,
}

impl RepoContext {
    /// Scan `root` and keep the most relevant content within `budget` characters.
    pub fn build(root: &Path, prompt: &str, budget: usize) -> Result<Self> {
        let ignore: Vec<Pattern> = IGNORE_GLOBS
            .iter()
            .filter_map(|g| Pattern::new(g).ok())
            .collect();
        let terms = prompt_terms(prompt);

        let mut index = Vec::new();
        let mut scored: Vec<(usize, String, String)> = Vec::new();
        for entry in WalkDir::new(root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| {
                e.depth() == 0
                    || !(e.file_type().is_dir()
                        && e.file_name()
                            .to_str()
                            .is_some_and(|n| SKIP_DIRS.contains(&n)))
            })
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(rel) = entry.path().strip_prefix(root) else {
                continue;
            };
            let rel = rel.to_string_lossy().replace('\\', "/");
            let name = entry.file_name().to_string_lossy();
            if ignore.iter().any(|p| p.matches(&name)) {
                continue;
            }
            index.push(rel.clone());

            let too_big = entry.metadata().map(|m| m.len() > MAX_FILE_BYTES).unwrap_or(true);
            if too_big {
                continue;
            }
            let Ok(bytes) = std::fs::read(entry.path()) else {
                continue;
            };
            if bytes.iter().take(8192).any(|b| *b == 0) {
                continue;
            }
            let content = String::from_utf8_lossy(&bytes).into_owned();
            let score = score(&rel, &name, &content, &terms);
            scored.push((score, rel, content));
        }
        index.sort();

        // Highest score first; path order among equals.
        scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));

        let mut files = BTreeMap::new();
        let mut truncated = BTreeSet::new();
        let mut used = 0usize;
        for (_, rel, content) in scored {
            let remaining = budget.saturating_sub(used);
            let len = content.chars().count();
            if len <= remaining {
                used += len;
                files.insert(rel, content);
            } else if remaining >= MIN_PARTIAL_CHARS {
                let head: String = content.chars().take(remaining).collect();
                used += remaining;
                truncated.insert(rel.clone());
                files.insert(rel, head);
            }
            if used >= budget {
                break;
            }
        }

        tracing::debug!(
            files = files.len(),
            indexed = index.len(),
            chars = used,
            "context built"
        );

        Ok(Self {
            files,
            index,
            truncated,
            budget,
        })
    }

    pub fn total_chars(&self) -> usize {
        self.files.values().map(|c| c.chars().count()).sum()
    }

    /// Prompt section: file index followed by file bodies.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "## Repository files ({})", self.index.len());
        for path in self.index.iter().take(MAX_INDEX_ENTRIES) {
            let _ = writeln!(out, "{path}");
        }
        if self.index.len() > MAX_INDEX_ENTRIES {
            let _ = writeln!(out, "... and {} more", self.index.len() - MAX_INDEX_ENTRIES);
        }

        for (path, content) in &self.files {
            let _ = writeln!(out, "\n## File: {path}");
            if self.truncated.contains(path) {
                out.push_str("(truncated to fit the context budget)\n");
            }
            out.push_str("```\n");
            out.push_str(content);
            if !content.ends_with('\n') {
                out.push('\n');
            }
            out.push_str("```\n");
        }
        out
    }
}

fn prompt_terms(prompt: &str) -> BTreeSet<String> {
    WORD.find_iter(prompt)
        .map(|m| m.as_str().to_lowercase())
        .filter(|w| !STOPWORDS.contains(&w.as_str()))
        .collect()
}

fn score(rel: &str, name: &str, content: &str, terms: &BTreeSet<String>) -> usize {
    let path_lower = rel.to_lowercase();
    let content_lower = content.to_lowercase();
    let mut score = 0;
    for term in terms {
        if path_lower.contains(term.as_str()) {
            score += 20;
        }
        score += content_lower.matches(term.as_str()).count().min(5);
    }
    if KEY_FILES.contains(&name) {
        score += 3;
    }
    score
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn repo() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("src")).unwrap();
        fs::create_dir_all(root.join("node_modules/pkg")).unwrap();
        fs::write(root.join("src/checkout.js"), "function checkout(cart) { return cart.total; }\n").unwrap();
        fs::write(root.join("src/util.js"), "export const noop = () => {};\n").unwrap();
        fs::write(root.join("README.md"), "# Shop\n").unwrap();
        fs::write(root.join("package-lock.json"), "{}").unwrap();
        fs::write(root.join("node_modules/pkg/index.js"), "checkout checkout checkout").unwrap();
        fs::write(root.join("logo.bin"), [0u8, 1, 2, 3]).unwrap();
        dir
    }

    #[test]
    fn test_relevant_files_first_and_ignores_applied() {
        let dir = repo();
        let ctx = RepoContext::build(dir.path(), "Handle an empty cart in checkout", 10_000).unwrap();
        assert!(ctx.files.contains_key("src/checkout.js"));
        assert!(!ctx.index.iter().any(|p| p.starts_with("node_modules")));
        assert!(!ctx.index.contains(&"package-lock.json".to_string()));
        assert!(ctx.index.contains(&"logo.bin".to_string()));
        assert!(!ctx.files.contains_key("logo.bin"));
    }

    #[test]
    fn test_budget_respected_and_relevance_wins() {
        let dir = repo();
        let budget = "function checkout(cart) { return cart.total; }\n".len();
        let ctx = RepoContext::build(dir.path(), "checkout cart", budget).unwrap();
        assert_eq!(ctx.files.len(), 1);
        assert!(ctx.files.contains_key("src/checkout.js"));
        assert!(ctx.total_chars() <= budget);
    }

    #[test]
    fn test_large_file_truncated_when_room_allows() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("big.txt"), "x".repeat(5_000)).unwrap();
        let ctx = RepoContext::build(dir.path(), "big", 2_000).unwrap();
        assert_eq!(ctx.files["big.txt"].len(), 2_000);
        assert!(ctx.truncated.contains("big.txt"));
        assert!(ctx.render().contains("truncated to fit"));
    }

    #[test]
    fn test_deterministic() {
        let dir = repo();
        let a = RepoContext::build(dir.path(), "checkout", 10_000).unwrap();
        let b = RepoContext::build(dir.path(), "checkout", 10_000).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.render(), b.render());
    }

    #[test]
    fn test_render_lists_index_and_bodies() {
        let dir = repo();
        let rendered = RepoContext::build(dir.path(), "checkout", 10_000).unwrap().render();
        assert!(rendered.starts_with("## Repository files (4)\n"));
        assert!(rendered.contains("## File: src/checkout.js\n```\nfunction checkout"));
    }
}
