//! Strip markdown fencing and recognise the "no changes" sentinel.

use std::sync::LazyLock;

use regex::Regex;

/// The literal the generator is asked to return when nothing needs changing.
pub const NO_CHANGES_SENTINEL: &str = "NO_CHANGES";

static SENTINEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^no[\s_-]*changes?([\s_-]*(required|needed|necessary))?\.?$").unwrap()
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Normalized {
    NoChanges,
    Text(String),
}

/// Unwrap fenced output and collapse sentinel spellings to [`Normalized::NoChanges`].
pub fn normalize(raw: &str) -> Normalized {
    let text = unfence(raw.trim());
    if !has_diff_markers(&text) && text.lines().any(is_sentinel_line) {
        return Normalized::NoChanges;
    }
    Normalized::Text(text)
}

/// True when the text contains anything that looks like a unified diff.
pub fn has_diff_markers(text: &str) -> bool {
    text.lines().any(|l| {
        l.starts_with("diff --git ")
            || l.starts_with("--- ")
            || l.starts_with("+++ ")
            || l.starts_with("@@")
    })
}

fn is_sentinel_line(line: &str) -> bool {
    let line = line.trim().trim_matches(|c| matches!(c, '`' | '*' | '"' | '\'' | '<' | '>'));
    SENTINEL.is_match(line.trim())
}

/// Content of the best fenced block, or the input when it has no fences.
///
/// A block that looks like a diff wins over the first block; an unterminated
/// fence runs to the end of the text.
fn unfence(text: &str) -> String {
    let mut blocks: Vec<Vec<&str>> = Vec::new();
    let mut open: Option<Vec<&str>> = None;
    for line in text.lines() {
        if line.starts_with("```") {
            match open.take() {
                Some(block) => blocks.push(block),
                None => open = Some(Vec::new()),
            }
            continue;
        }
        if let Some(block) = open.as_mut() {
            block.push(line);
        }
    }
    if let Some(block) = open {
        blocks.push(block);
    }

    if blocks.is_empty() {
        return text.to_string();
    }
    let chosen = blocks
        .iter()
        .find(|b| b.iter().any(|l| l.starts_with("@@") || l.starts_with("--- ")))
        .unwrap_or(&blocks[0]);
    let mut out = chosen.join("\n");
    out.push('\n');
    out
}
