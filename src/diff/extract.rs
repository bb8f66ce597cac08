//! Cut the unified diff out of surrounding generator text.
//!
//! Leading prose is dropped up to the first file header. A hunk keeps
//! consuming body lines until its header's old-side count is used up, then
//! only prefixed lines; a blank line or prose after that ends the diff unless
//! another file header follows later.

use std::sync::LazyLock;

use regex::Regex;

static OLD_COUNT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^@@ -\d+(?:,(\d+))? ").unwrap());

enum State {
    Outside,
    Header,
    Hunk { old_remaining: usize },
    Binary,
}

pub fn extract(text: &str) -> Result<String, String> {
    let lines: Vec<&str> = text.lines().collect();
    let is_file_start = |i: usize| -> bool {
        let line = lines[i];
        line.starts_with("diff --git ")
            || (line.starts_with("--- ")
                && lines.get(i + 1).is_some_and(|n| n.starts_with("+++ ")))
    };

    let Some(first) = (0..lines.len()).find(|&i| is_file_start(i)) else {
        if lines.iter().any(|l| l.starts_with("@@")) {
            return Err("hunks have no `--- a/<path>` / `+++ b/<path>` file headers".into());
        }
        return Err(format!(
            "no unified diff found in the response; reply with a unified diff or {}",
            super::NO_CHANGES_SENTINEL
        ));
    };

    let mut kept: Vec<&str> = Vec::new();
    let mut state = State::Outside;
    let mut i = first;
    while i < lines.len() {
        let line = lines[i];
        let hunk_needs_more = matches!(state, State::Hunk { old_remaining } if old_remaining > 0);

        if line.starts_with("diff --git ") || (!hunk_needs_more && is_file_start(i)) {
            state = State::Header;
            kept.push(line);
            i += 1;
            continue;
        }

        let mut next_state = None;
        let keep = match &mut state {
            State::Outside => false,
            State::Binary => true,
            State::Header => {
                if line.starts_with("@@") {
                    next_state = Some(State::Hunk {
                        old_remaining: old_count(line),
                    });
                    true
                } else if line.starts_with("Binary files ") || line.starts_with("GIT binary patch")
                {
                    next_state = Some(State::Binary);
                    true
                } else {
                    is_header_line(line)
                }
            }
            State::Hunk { old_remaining } => {
                if line.starts_with("@@") {
                    *old_remaining = old_count(line);
                    true
                } else if *old_remaining > 0 {
                    match line.chars().next() {
                        None | Some(' ') | Some('-') => {
                            *old_remaining -= 1;
                            true
                        }
                        Some('+') | Some('\\') => true,
                        Some(_) => false,
                    }
                } else {
                    matches!(line.chars().next(), Some('+' | '-' | ' ' | '\\'))
                }
            }
        };
        if let Some(next) = next_state {
            state = next;
        }

        if keep {
            kept.push(line);
            i += 1;
            continue;
        }

        // Interleaved commentary: skip to the next file header, if any.
        match (i + 1..lines.len()).find(|&j| is_file_start(j)) {
            Some(j) => {
                state = State::Outside;
                i = j;
            }
            None => break,
        }
    }

    let mut out = kept.join("\n");
    out.push('\n');
    Ok(out)
}

/// Old-side count from a hunk header; unparseable headers count as zero and
/// are rejected later.
fn old_count(header: &str) -> usize {
    match OLD_COUNT.captures(header) {
        Some(caps) => caps
            .get(1)
            .map_or(Some(1), |m| m.as_str().parse().ok())
            .unwrap_or(0),
        None => 0,
    }
}

fn is_header_line(line: &str) -> bool {
    [
        "--- ",
        "+++ ",
        "index ",
        "new file mode",
        "deleted file mode",
        "old mode",
        "new mode",
        "similarity index",
        "dissimilarity index",
        "rename from",
        "rename to",
        "copy from",
        "copy to",
    ]
    .iter()
    .any(|p| line.starts_with(p))
}
