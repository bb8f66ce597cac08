//! Repair header bookkeeping without touching hunk content.
//!
//! Fixes applied here:
//! - CRLF line endings become LF
//! - blank body lines become empty context lines; trailing blanks are kept
//!   only while the header's old-side count still needs lines
//! - new-side counts and starts are recomputed, but only for hunks whose
//!   old-side count already matches the body
//! - new/deleted file hunks get `-0,0` / `+0,0` sides
//!
//! Missing `diff --git` and file-mode lines are restored by rendering; stale
//! `index` lines are dropped the same way.

use super::model::{self, FileOp, FilePatch, Hunk, Line};

#[derive(Debug, Clone, PartialEq)]
pub struct Sanitized {
    pub files: Vec<FilePatch>,
    /// One line per repair made.
    pub notes: Vec<String>,
}

pub fn sanitize(text: &str) -> Result<Sanitized, String> {
    let mut notes = Vec::new();
    let text = if text.contains('\r') {
        notes.push("normalized CRLF line endings to LF".to_string());
        text.replace("\r\n", "\n")
    } else {
        text.to_string()
    };

    let mut files = model::parse(&text)?;
    for file in &mut files {
        let path = file.path().unwrap_or("<unnamed>").to_string();
        let mut delta: isize = 0;
        for (idx, hunk) in file.hunks.iter_mut().enumerate() {
            let label = format!("hunk {} of {}", idx + 1, path);
            resolve_blanks(hunk, &label, &mut notes);
            match file.op {
                FileOp::Create => fix_created(hunk, &label, &mut notes),
                FileOp::Delete => fix_deleted(hunk, &label, &mut notes),
                FileOp::Modify => fix_new_side(hunk, delta, &label, &mut notes),
            }
            delta += hunk.new_count as isize - hunk.old_count as isize;
        }
    }

    Ok(Sanitized { files, notes })
}

fn resolve_blanks(hunk: &mut Hunk, label: &str, notes: &mut Vec<String>) {
    let trailing = hunk
        .lines
        .iter()
        .rev()
        .take_while(|l| matches!(l, Line::Blank))
        .count();
    if trailing > 0 {
        let body_len = hunk.lines.len() - trailing;
        let consumed = hunk.lines[..body_len]
            .iter()
            .filter(|l| matches!(l, Line::Context(_) | Line::Removed(_) | Line::Blank))
            .count();
        let needed = hunk.old_count.saturating_sub(consumed).min(trailing);
        if needed < trailing {
            hunk.lines.truncate(body_len + needed);
            notes.push(format!(
                "{label}: dropped {} trailing blank line(s)",
                trailing - needed
            ));
        }
    }

    for line in &mut hunk.lines {
        if matches!(line, Line::Blank) {
            *line = Line::Context(String::new());
        }
    }
}

fn fix_created(hunk: &mut Hunk, label: &str, notes: &mut Vec<String>) {
    if hunk.has_context_or_removed() {
        return;
    }
    let added = hunk.body_new_count();
    if (hunk.old_start, hunk.old_count, hunk.new_start, hunk.new_count) != (0, 0, 1, added) {
        notes.push(format!(
            "{label}: header {} corrected to @@ -0,0 +1,{added} @@",
            hunk.header()
        ));
        hunk.old_start = 0;
        hunk.old_count = 0;
        hunk.new_start = if added == 0 { 0 } else { 1 };
        hunk.new_count = added;
    }
}

fn fix_deleted(hunk: &mut Hunk, label: &str, notes: &mut Vec<String>) {
    if hunk.has_context_or_added() {
        return;
    }
    let removed = hunk.body_old_count();
    if (hunk.old_start, hunk.old_count, hunk.new_start, hunk.new_count) != (1, removed, 0, 0) {
        notes.push(format!(
            "{label}: header {} corrected to @@ -1,{removed} +0,0 @@",
            hunk.header()
        ));
        hunk.old_start = if removed == 0 { 0 } else { 1 };
        hunk.old_count = removed;
        hunk.new_start = 0;
        hunk.new_count = 0;
    }
}

/// `delta` is the net line change of the hunks before this one.
fn fix_new_side(hunk: &mut Hunk, delta: isize, label: &str, notes: &mut Vec<String>) {
    if hunk.body_old_count() != hunk.old_count {
        return;
    }
    let body_new = hunk.body_new_count();
    if body_new != hunk.new_count {
        notes.push(format!(
            "{label}: new-side count {} corrected to {}",
            hunk.new_count, body_new
        ));
        hunk.new_count = body_new;
    }

    let mut start = hunk.old_start as isize + delta;
    if hunk.old_count == 0 {
        start += 1;
    }
    if hunk.new_count == 0 {
        start -= 1;
    }
    let start = start.max(0) as usize;
    if start != hunk.new_start {
        notes.push(format!(
            "{label}: new-side start {} corrected to {}",
            hunk.new_start, start
        ));
        hunk.new_start = start;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixes_wrong_new_count() {
        let text = "--- a/x\n+++ b/x\n@@ -1,2 +1,2 @@\n a\n-b\n+c\n+d\n";
        let out = sanitize(text).unwrap();
        let hunk = &out.files[0].hunks[0];
        assert_eq!(hunk.new_count, 3);
        assert_eq!(out.notes.len(), 1);
        assert!(out.notes[0].contains("new-side count 2 corrected to 3"));
    }

    #[test]
    fn test_leaves_old_count_mismatch_alone() {
        let text = "--- a/x\n+++ b/x\n@@ -10,3 +10,3 @@\n a\n-b\n+c\n";
        let out = sanitize(text).unwrap();
        let hunk = &out.files[0].hunks[0];
        assert_eq!((hunk.old_count, hunk.new_count), (3, 3));
        assert!(out.notes.is_empty());
    }

    #[test]
    fn test_fixes_new_start_after_earlier_hunk() {
        let text = "\
--- a/x
+++ b/x
@@ -1,1 +1,2 @@
 a
+a2
@@ -5,1 +5,1 @@
-e
+E
";
        let out = sanitize(text).unwrap();
        assert_eq!(out.files[0].hunks[1].new_start, 6);
    }

    #[test]
    fn test_blank_lines_become_context() {
        let text = "--- a/x\n+++ b/x\n@@ -1,3 +1,3 @@\n a\n\n-b\n+c\n";
        let out = sanitize(text).unwrap();
        let hunk = &out.files[0].hunks[0];
        assert_eq!(hunk.lines[1], Line::Context(String::new()));
        assert_eq!(hunk.body_old_count(), 3);
    }

    #[test]
    fn test_surplus_trailing_blanks_dropped() {
        let text = "--- a/x\n+++ b/x\n@@ -1,2 +1,2 @@\n a\n-b\n+c\n\n\n";
        let out = sanitize(text).unwrap();
        let hunk = &out.files[0].hunks[0];
        assert_eq!(hunk.lines.last(), Some(&Line::Added("c".into())));
        assert!(out.notes.iter().any(|n| n.contains("trailing blank")));
    }

    #[test]
    fn test_crlf_normalized() {
        let text = "--- a/x\r\n+++ b/x\r\n@@ -1 +1 @@\r\n-a\r\n+b\r\n";
        let out = sanitize(text).unwrap();
        assert_eq!(out.files[0].hunks[0].lines[0], Line::Removed("a".into()));
        assert!(out.notes[0].contains("CRLF"));
    }

    #[test]
    fn test_new_file_header_repaired() {
        let text = "--- /dev/null\n+++ b/new.txt\n@@ -1,0 +1,5 @@\n+one\n+two\n";
        let out = sanitize(text).unwrap();
        let hunk = &out.files[0].hunks[0];
        assert_eq!(out.files[0].op, FileOp::Create);
        assert_eq!((hunk.old_start, hunk.old_count, hunk.new_start, hunk.new_count), (0, 0, 1, 2));
    }

    #[test]
    fn test_content_is_never_changed() {
        let text = "--- a/x\n+++ b/x\n@@ -1,2 +1,9 @@\n a\n-b\n+c\n";
        let out = sanitize(text).unwrap();
        let lines = &out.files[0].hunks[0].lines;
        assert_eq!(
            lines,
            &vec![
                Line::Context("a".into()),
                Line::Removed("b".into()),
                Line::Added("c".into())
            ]
        );
    }
}
