//! Integration tests for patchwright
//!
//! These drive the binary end to end against local-path projects, with a
//! `sh` script standing in for the generator.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Helper to create a patchwright Command
fn patchwright() -> Command {
    let mut cmd = cargo_bin_cmd!("patchwright");
    cmd.env_remove("RUST_LOG");
    cmd
}

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

const NULL_CHECK: &str = "\
Sure, here is the patch.

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

/// A workspace with a source project, a canned generator response and a
/// config file pointing the generator at it.
struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new(response: &str, extra_config: &str) -> Self {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("project/src")).unwrap();
        fs::write(root.join("project/src/app.js"), APP_JS).unwrap();
        fs::write(root.join("response.txt"), response).unwrap();
        fs::create_dir_all(root.join("work")).unwrap();

        let config = format!(
            "[generator]\n\
             kind = \"command\"\n\
             command = \"sh\"\n\
             args = [\"-c\", \"cat >/dev/null; cat {response}\"]\n\
             \n\
             [sandbox]\n\
             work_dir = \"{work}\"\n\
             failed_patch_dir = \"{failed}\"\n\
             \n\
             {extra}\n",
            response = root.join("response.txt").display(),
            work = root.join("work").display(),
            failed = root.join("failed").display(),
            extra = extra_config,
        );
        fs::write(root.join("patchwright.toml"), config).unwrap();
        Self { dir }
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn project(&self) -> PathBuf {
        self.path().join("project")
    }

    fn app(&self) -> String {
        fs::read_to_string(self.project().join("src/app.js")).unwrap()
    }

    fn cmd(&self) -> Command {
        let mut cmd = patchwright();
        cmd.current_dir(self.path());
        cmd
    }

    fn sandboxes_left(&self) -> usize {
        fs::read_dir(self.path().join("work")).unwrap().count()
    }
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_help() {
        patchwright()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("repair"))
            .stdout(predicate::str::contains("batch"));
    }

    #[test]
    fn test_version() {
        patchwright().arg("--version").assert().success();
    }

    #[test]
    fn test_run_requires_a_target() {
        let dir = TempDir::new().unwrap();
        patchwright()
            .current_dir(dir.path())
            .args(["run", "--prompt", "add a null check"])
            .assert()
            .failure();
    }

    #[test]
    fn test_run_rejects_both_targets() {
        let dir = TempDir::new().unwrap();
        patchwright()
            .current_dir(dir.path())
            .args([
                "run",
                "--prompt",
                "x",
                "--local-path",
                ".",
                "--repo-url",
                "o/r",
            ])
            .assert()
            .failure();
    }
}

// =============================================================================
// Configuration Tests
// =============================================================================

mod config_commands {
    use super::*;

    #[test]
    fn test_config_show_defaults() {
        let dir = TempDir::new().unwrap();
        patchwright()
            .current_dir(dir.path())
            .env("PATCHWRIGHT_MAX_ITERATIONS", "4")
            .arg("config")
            .assert()
            .success()
            .stdout(predicate::str::contains("Patchwright Configuration"))
            .stdout(predicate::str::contains("max_iterations = 4"));
    }

    #[test]
    fn test_config_init_then_validate() {
        let dir = TempDir::new().unwrap();
        patchwright()
            .current_dir(dir.path())
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Created"));
        let content = fs::read_to_string(dir.path().join("patchwright.toml")).unwrap();
        assert!(content.contains("[limits]"));

        patchwright()
            .current_dir(dir.path())
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("no preflight commands configured"));

        patchwright()
            .current_dir(dir.path())
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("already exists"));
    }

    #[test]
    fn test_bad_numeric_env_is_an_error() {
        let dir = TempDir::new().unwrap();
        patchwright()
            .current_dir(dir.path())
            .env("PATCHWRIGHT_MAX_DIFF_CHARS", "lots")
            .arg("config")
            .assert()
            .failure()
            .stderr(predicate::str::contains("PATCHWRIGHT_MAX_DIFF_CHARS"));
    }
}

// =============================================================================
// Job Flow Tests
// =============================================================================

mod job_flow {
    use super::*;

    #[test]
    fn test_run_applies_and_copies_back() {
        let ws = Workspace::new(NULL_CHECK, "");
        ws.cmd()
            .args(["run", "--prompt", "add a null check to read", "--id", "null-check"])
            .arg("--local-path")
            .arg(ws.project())
            .assert()
            .success()
            .stdout(predicate::str::contains("Job null-check succeeded"))
            .stdout(predicate::str::contains("updated 1 file(s)"));

        assert!(ws.app().contains("  if (x == null) return undefined;\n  return x.value;"));
        assert_eq!(ws.sandboxes_left(), 0);
    }

    #[test]
    fn test_no_publish_leaves_source_alone() {
        let ws = Workspace::new(NULL_CHECK, "");
        ws.cmd()
            .args(["run", "--prompt", "add a null check", "--no-publish"])
            .arg("--local-path")
            .arg(ws.project())
            .assert()
            .success()
            .stdout(predicate::str::contains("publication skipped"));
        assert_eq!(ws.app(), APP_JS);
    }

    #[test]
    fn test_no_changes_sentinel() {
        let ws = Workspace::new("NO_CHANGES\n", "[preflight]\ntest = \"exit 1\"\n");
        ws.cmd()
            .args(["run", "--prompt", "is null handled?"])
            .arg("--local-path")
            .arg(ws.project())
            .assert()
            .success()
            .stdout(predicate::str::contains("nothing to change"));
        assert_eq!(ws.app(), APP_JS);
    }

    #[test]
    fn test_failing_preflight_exhausts_and_saves_patch() {
        let ws = Workspace::new(
            NULL_CHECK,
            "[preflight]\ntest = \"echo 'TypeError: x is undefined'; exit 1\"\n",
        );
        ws.cmd()
            .args(["run", "--prompt", "add a null check", "--max-iterations", "2"])
            .arg("--local-path")
            .arg(ws.project())
            .assert()
            .code(1)
            .stdout(predicate::str::contains("iteration 2:"))
            .stdout(predicate::str::contains("exhausted"))
            .stdout(predicate::str::contains("failed patch:"));

        assert_eq!(ws.app(), APP_JS);
        assert_eq!(ws.sandboxes_left(), 0);
        let saved: Vec<_> = fs::read_dir(ws.path().join("failed")).unwrap().collect();
        assert_eq!(saved.len(), 1);
    }

    #[test]
    fn test_json_report() {
        let ws = Workspace::new("no diff, sorry", "[limits]\nmax_iterations = 3\n");
        let output = ws
            .cmd()
            .args(["run", "--prompt", "x", "--json", "--id", "j1"])
            .arg("--local-path")
            .arg(ws.project())
            .output()
            .unwrap();
        assert_eq!(output.status.code(), Some(1));

        let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        assert_eq!(report["job_id"], "j1");
        assert_eq!(report["status"], "failed");
        assert_eq!(report["iterations"].as_array().unwrap().len(), 3);
        assert_eq!(report["iterations"][0]["validation"]["outcome"], "rejected");
        assert_eq!(report["iterations"][0]["validation"]["stage"], "extract");
    }

    #[test]
    fn test_submit_json_file() {
        let ws = Workspace::new(NULL_CHECK, "");
        let submission = serde_json::json!({
            "id": "from-intake",
            "prompt": "add a null check",
            "project": { "localPath": ws.project() }
        });
        fs::write(ws.path().join("job.json"), submission.to_string()).unwrap();

        ws.cmd()
            .args(["submit", "--file", "job.json"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Job from-intake succeeded"));
        assert!(ws.app().contains("x == null"));
    }

    #[test]
    fn test_submit_from_stdin() {
        let ws = Workspace::new(NULL_CHECK, "");
        let submission = serde_json::json!({
            "id": "piped",
            "prompt": "add a null check",
            "project": { "localPath": ws.project() }
        });

        ws.cmd()
            .args(["submit", "--file", "-"])
            .write_stdin(submission.to_string())
            .assert()
            .success()
            .stdout(predicate::str::contains("Job piped succeeded"));
        assert!(ws.app().contains("x == null"));
    }

    #[test]
    fn test_batch_runs_every_job() {
        let ws = Workspace::new("NO_CHANGES", "[limits]\nmax_concurrent_jobs = 2\n");
        let jobs = serde_json::json!([
            { "id": "a", "prompt": "one", "project": { "localPath": ws.project() } },
            { "id": "b", "prompt": "two", "project": { "localPath": ws.project() } },
            { "id": "c", "prompt": "three", "project": { "localPath": ws.project() } }
        ]);
        fs::write(ws.path().join("jobs.json"), jobs.to_string()).unwrap();

        ws.cmd()
            .args(["batch", "--file", "jobs.json"])
            .assert()
            .success()
            .stdout(predicate::str::contains("3 of 3 job(s) succeeded"));
        assert_eq!(ws.sandboxes_left(), 0);
    }

    #[test]
    fn test_repair_aborts_on_required_stage() {
        let ws = Workspace::new("I could not find anything to fix.", "");
        ws.cmd()
            .args(["repair", "--notes", "uses npm"])
            .arg("--local-path")
            .arg(ws.project())
            .assert()
            .code(1)
            .stdout(predicate::str::contains("stage fix-build: failed"))
            .stdout(predicate::str::contains("stage readme: skipped"))
            .stdout(predicate::str::contains("`fix-build` failed"));
    }
}
