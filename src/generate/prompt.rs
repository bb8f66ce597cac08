//! Prompt rendering for diff generation.

use crate::context::RepoContext;
use crate::diff::NO_CHANGES_SENTINEL;

use super::GenerationRequest;

/// Fixed instructions sent ahead of every request.
pub const OUTPUT_CONTRACT: &str = r#"Reply with ONE unified diff in git format and nothing else:
- file headers `--- a/<path>` and `+++ b/<path>`, paths relative to the repository root
- new files use `--- /dev/null`, deleted files use `+++ /dev/null`
- every hunk starts with `@@ -<start>,<count> +<start>,<count> @@` and the counts must equal the lines that follow
- keep 3 unchanged context lines around each change, copied exactly from the files below
- no binary files, no renames, no paths outside the repository

If the repository already satisfies the request, reply with exactly NO_CHANGES."#;

pub fn render(request: &GenerationRequest<'_>) -> String {
    let mut out = String::new();
    out.push_str("You are changing a software repository. Produce a patch for the request below.\n\n");
    out.push_str("## Change request\n");
    out.push_str(request.instruction.trim());
    out.push_str("\n\n## Output format\n");
    out.push_str(&OUTPUT_CONTRACT.replace("NO_CHANGES", NO_CHANGES_SENTINEL));
    out.push('\n');

    if let Some(feedback) = request.previous_error.filter(|f| !f.trim().is_empty()) {
        out.push_str("\n## Previous attempts failed\n");
        out.push_str(feedback.trim());
        out.push_str(
            "\n\nThe repository below is back at its last good state. Fix the problem above; do not resend the same patch.\n",
        );
    }

    out.push('\n');
    out.push_str(&render_context(request.context));
    out
}

fn render_context(context: &RepoContext) -> String {
    if context.index.is_empty() {
        return "## Repository files (0)\nThe repository is empty.\n".to_string();
    }
    context.render()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn context() -> RepoContext {
        let mut files = BTreeMap::new();
        files.insert("src/a.js".to_string(), "return x.value;\n".to_string());
        RepoContext {
            files,
            index: vec!["src/a.js".into()],
            ..Default::default()
        }
    }

    #[test]
    fn test_render_includes_request_contract_and_files() {
        let ctx = context();
        let prompt = render(&GenerationRequest {
            instruction: "add a null check",
            context: &ctx,
            previous_error: None,
        });
        assert!(prompt.contains("## Change request\nadd a null check"));
        assert!(prompt.contains("NO_CHANGES"));
        assert!(prompt.contains("## File: src/a.js"));
        assert!(!prompt.contains("Previous attempts failed"));
    }

    #[test]
    fn test_render_includes_feedback() {
        let ctx = context();
        let prompt = render(&GenerationRequest {
            instruction: "add a null check",
            context: &ctx,
            previous_error: Some("Attempt 1: hunk 1 of src/a.js at line 3 expected context `x`"),
        });
        assert!(prompt.contains("## Previous attempts failed\nAttempt 1: hunk 1"));
    }

    #[test]
    fn test_empty_repository_is_stated() {
        let ctx = RepoContext::default();
        let prompt = render(&GenerationRequest {
            instruction: "write a README",
            context: &ctx,
            previous_error: None,
        });
        assert!(prompt.contains("The repository is empty."));
    }
}
