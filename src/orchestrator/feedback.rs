//! Fold failed iterations into retry feedback for the next prompt.

use super::state::IterationRecord;
use crate::util::summary_line;

/// Ceiling for the whole feedback block.
const MAX_FEEDBACK_CHARS: usize = 8_000;

/// Earlier failures are reduced to one line each; the most recent one is
/// given in full.
pub fn fold(history: &[IterationRecord]) -> Option<String> {
    let failures: Vec<(u32, String)> = history
        .iter()
        .filter_map(|r| r.failure_reason().map(|reason| (r.iteration, reason)))
        .collect();
    let ((last_iteration, last_reason), earlier) = failures.split_last()?;

    let mut out = String::new();
    for (iteration, reason) in earlier {
        out.push_str(&format!(
            "Attempt {}: {}\n",
            iteration,
            summary_line(reason, 200)
        ));
    }
    if !earlier.is_empty() {
        out.push('\n');
    }
    out.push_str(&format!(
        "Most recent attempt ({}) failed:\n{}",
        last_iteration, last_reason
    ));

    Some(crate::exec::truncate_tail(&out, MAX_FEEDBACK_CHARS))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::{Rejection, Stage, ValidationOutcome};

    fn rejected(iteration: u32, reason: &str) -> IterationRecord {
        IterationRecord::new(
            iteration,
            String::new(),
            ValidationOutcome::Rejected(Rejection::new(Stage::Applicability, reason)),
        )
    }

    #[test]
    fn test_no_history_no_feedback() {
        assert!(fold(&[]).is_none());
    }

    #[test]
    fn test_latest_failure_in_full_earlier_summarized() {
        let history = vec![
            rejected(1, "first problem\nwith detail"),
            rejected(2, "second problem\nline two"),
        ];
        let feedback = fold(&history).unwrap();
        assert!(feedback.starts_with("Attempt 1: diff rejected at applicability stage: first problem\n"));
        assert!(!feedback.contains("with detail"));
        assert!(feedback.contains("Most recent attempt (2) failed:\n"));
        assert!(feedback.ends_with("second problem\nline two"));
    }

    #[test]
    fn test_feedback_is_bounded() {
        let history = vec![rejected(1, &"x".repeat(20_000))];
        assert!(fold(&history).unwrap().chars().count() <= MAX_FEEDBACK_CHARS + 20);
    }
}
