//! Diff validation and application engine.
//!
//! Generator output is untrusted text. [`validate`] runs it through a fixed
//! pipeline of stages, each of which either passes its result on or rejects
//! with a reason that is fed back to the next generation attempt:
//!
//! 1. normalize: unwrap markdown fences, recognise the no-changes sentinel
//! 2. extract: cut the diff out of surrounding prose
//! 3. sanitize: repair header bookkeeping (counts, file markers, line endings)
//! 4. structure: header/body agreement, relative paths, at least one file
//! 5. applicability: dry-run every hunk against the sandbox content
//! 6. policy: size ceiling, sandbox containment, no binary patches
//!
//! Only an [`ValidationOutcome::Applicable`] diff may be passed to [`apply::apply`].

pub mod applicability;
pub mod apply;
pub mod extract;
pub mod model;
pub mod normalize;
pub mod policy;
pub mod sanitize;
pub mod structure;

use std::fmt;
use std::path::Path;

use serde::Serialize;

pub use normalize::NO_CHANGES_SENTINEL;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Normalize,
    Extract,
    Structure,
    Applicability,
    Policy,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Normalize => "normalize",
            Stage::Extract => "extract",
            Stage::Structure => "structure",
            Stage::Applicability => "applicability",
            Stage::Policy => "policy",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rejection {
    pub stage: Stage,
    pub reason: String,
}

impl Rejection {
    pub fn new(stage: Stage, reason: impl Into<String>) -> Self {
        Self {
            stage,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "diff rejected at {} stage: {}", self.stage, self.reason)
    }
}

/// A diff that passed every stage, rendered canonically.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidatedDiff {
    pub text: String,
    pub files: Vec<String>,
    /// Repairs and offsets applied on the way.
    pub notes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ValidationOutcome {
    NoChanges,
    Rejected(Rejection),
    Applicable(ValidatedDiff),
}

/// Run `raw` through every stage against the sandbox at `root`.
///
/// Pure with respect to the sandbox: nothing is written.
pub fn validate(raw: &str, root: &Path, max_diff_chars: usize) -> ValidationOutcome {
    match run_stages(raw, root, max_diff_chars) {
        Ok(Some(diff)) => ValidationOutcome::Applicable(diff),
        Ok(None) => ValidationOutcome::NoChanges,
        Err(rejection) => ValidationOutcome::Rejected(rejection),
    }
}

fn run_stages(raw: &str, root: &Path, max_diff_chars: usize) -> Result<Option<ValidatedDiff>, Rejection> {
    let text = match normalize::normalize(raw) {
        normalize::Normalized::NoChanges => return Ok(None),
        normalize::Normalized::Text(text) if text.trim().is_empty() => {
            return Err(Rejection::new(Stage::Normalize, "the response was empty"));
        }
        normalize::Normalized::Text(text) => text,
    };

    let body = extract::extract(&text).map_err(|r| Rejection::new(Stage::Extract, r))?;

    // Parse failures are structural: the text cannot be read as hunks at all.
    let sanitized = sanitize::sanitize(&body).map_err(|r| Rejection::new(Stage::Structure, r))?;
    let mut files = sanitized.files;
    let mut notes = sanitized.notes;

    structure::check(&files).map_err(|r| Rejection::new(Stage::Structure, r))?;

    let offsets = applicability::check(&mut files, root)
        .map_err(|r| Rejection::new(Stage::Applicability, r))?;
    notes.extend(offsets);

    let rendered = model::render(&files);
    policy::check(&rendered, &files, root, max_diff_chars)
        .map_err(|r| Rejection::new(Stage::Policy, r))?;

    Ok(Some(ValidatedDiff {
        text: rendered,
        files: files
            .iter()
            .filter_map(|f| f.path().map(str::to_string))
            .collect(),
        notes,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const APP_JS: &str = "\
// app.js
const config = require('./config');

function load(id) {
  return store.get(id);
}

function read(x) {
  // returns the value
  return x.value;
}

module.exports = { load, read };
";

    fn sandbox() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/app.js"), APP_JS).unwrap();
        dir
    }

    const NULL_CHECK: &str = "\
Here is the change:

```diff
--- a/src/app.js
+++ b/src/app.js
@@ -8,4 +8,5 @@ function load(id) {
 function read(x) {
   // returns the value
-  return x.value;
+  if (x == null) return undefined;
+  return x.value;
 }
```
";

    #[test]
    fn test_null_check_is_applicable() {
        let dir = sandbox();
        match validate(NULL_CHECK, dir.path(), 200_000) {
            ValidationOutcome::Applicable(diff) => {
                assert_eq!(diff.files, vec!["src/app.js"]);
                assert!(diff.text.starts_with("diff --git a/src/app.js b/src/app.js\n"));
                assert!(diff.text.contains("@@ -8,4 +8,5 @@"));
                assert!(diff.notes.is_empty(), "{:?}", diff.notes);
            }
            other => panic!("expected applicable, got {other:?}"),
        }
    }

    #[test]
    fn test_header_body_mismatch_rejected_without_mutation() {
        let dir = sandbox();
        let raw = "--- a/src/app.js\n+++ b/src/app.js\n@@ -8,3 +8,3 @@\n function read(x) {\n   // returns the value\n";
        match validate(raw, dir.path(), 200_000) {
            ValidationOutcome::Rejected(r) => {
                assert_eq!(r.stage, Stage::Structure);
                assert!(r.reason.contains("header/body mismatch"), "{}", r.reason);
            }
            other => panic!("expected rejection, got {other:?}"),
        }
        assert_eq!(fs::read_to_string(dir.path().join("src/app.js")).unwrap(), APP_JS);
    }

    #[test]
    fn test_sentinel_is_no_changes() {
        let dir = sandbox();
        assert_eq!(validate("NO_CHANGES", dir.path(), 1000), ValidationOutcome::NoChanges);
    }

    #[test]
    fn test_empty_and_prose_responses_rejected() {
        let dir = sandbox();
        let ValidationOutcome::Rejected(r) = validate("   ", dir.path(), 1000) else {
            panic!("expected rejection");
        };
        assert_eq!(r.stage, Stage::Normalize);

        let ValidationOutcome::Rejected(r) = validate("I think it is fine.", dir.path(), 1000) else {
            panic!("expected rejection");
        };
        assert_eq!(r.stage, Stage::Extract);
    }

    #[test]
    fn test_applicability_rejection_depends_on_sandbox_state() {
        // Rejected against a diverged sandbox, accepted against a fresh one.
        let diverged = sandbox();
        fs::write(
            diverged.path().join("src/app.js"),
            APP_JS.replace("return x.value;", "return x?.value;"),
        )
        .unwrap();
        let ValidationOutcome::Rejected(r) = validate(NULL_CHECK, diverged.path(), 200_000) else {
            panic!("expected rejection");
        };
        assert_eq!(r.stage, Stage::Applicability);
        assert!(r.reason.contains("expected removed line `return x.value;`"), "{}", r.reason);
        assert!(r.reason.contains("sandbox has `return x?.value;`"), "{}", r.reason);

        let fresh = sandbox();
        assert!(matches!(
            validate(NULL_CHECK, fresh.path(), 200_000),
            ValidationOutcome::Applicable(_)
        ));
    }

    #[test]
    fn test_policy_runs_after_applicability() {
        let dir = sandbox();
        let ValidationOutcome::Rejected(r) = validate(NULL_CHECK, dir.path(), 20) else {
            panic!("expected rejection");
        };
        assert_eq!(r.stage, Stage::Policy);
    }

    #[test]
    fn test_accepted_hunks_have_matching_counts() {
        let dir = sandbox();
        // Wrong new-side count is repaired, then the round trip holds.
        let raw = NULL_CHECK.replace("+8,5", "+8,9");
        let ValidationOutcome::Applicable(diff) = validate(&raw, dir.path(), 200_000) else {
            panic!("expected applicable");
        };
        for file in model::parse(&diff.text).unwrap() {
            for hunk in file.hunks {
                assert_eq!(hunk.old_count, hunk.body_old_count());
                assert_eq!(hunk.new_count, hunk.body_new_count());
            }
        }
        assert!(diff.notes.iter().any(|n| n.contains("new-side count 9 corrected to 5")));
    }

    #[test]
    fn test_rejection_display_names_stage() {
        let r = Rejection::new(Stage::Policy, "too big");
        assert_eq!(r.to_string(), "diff rejected at policy stage: too big");
    }
}
