//! Dry-run every hunk against the current sandbox content.
//!
//! A hunk applies where its header says when the old-side lines match there
//! exactly. Otherwise a single exact match elsewhere (after the previous hunk)
//! is accepted and the header is moved to it, the way `git apply` tolerates
//! offsets. No match, or several, is a rejection naming the first differing line.
//!
//! CRLF files are compared without their carriage returns; the file is flagged
//! so rendering puts them back.

use std::path::Path;

use super::model::{FileOp, FilePatch, Hunk, Line};

pub fn check(files: &mut [FilePatch], root: &Path) -> Result<Vec<String>, String> {
    let canonical_root = root
        .canonicalize()
        .map_err(|e| format!("sandbox root could not be resolved: {e}"))?;
    let mut notes = Vec::new();
    for file in files.iter_mut() {
        let Some(path) = file.path().map(str::to_string) else {
            continue;
        };
        let abs = root.join(&path);
        match file.op {
            FileOp::Create => {
                if abs.symlink_metadata().is_ok() {
                    return Err(format!(
                        "new file {path} already exists in the sandbox; patch it with context lines instead"
                    ));
                }
            }
            FileOp::Delete => {
                let content = read_text(&abs, &canonical_root, &path)?;
                file.crlf = content.contains("\r\n");
                let current = split_lines(&content);
                let removed: Vec<&str> = file.hunks.iter().flat_map(Hunk::old_lines).collect();
                if current != removed {
                    return Err(format!(
                        "deleting {path} must remove its entire current content ({} line(s)) but the diff removes {} line(s) that do not match",
                        current.len(),
                        removed.len()
                    ));
                }
            }
            FileOp::Modify => {
                if file.binary {
                    continue;
                }
                let content = read_text(&abs, &canonical_root, &path)?;
                file.crlf = content.contains("\r\n");
                let current = split_lines(&content);
                match_hunks(&mut file.hunks, &current, &path, &mut notes)?;
            }
        }
    }
    Ok(notes)
}

fn match_hunks(
    hunks: &mut [Hunk],
    current: &[&str],
    path: &str,
    notes: &mut Vec<String>,
) -> Result<(), String> {
    let mut min_pos = 0usize;
    let mut offset: isize = 0;

    for (idx, hunk) in hunks.iter_mut().enumerate() {
        let number = idx + 1;
        let expected = hunk.old_lines();
        let len = expected.len();

        if expected.is_empty() {
            // Pure insertion after line `old_start`.
            let at = (hunk.old_start as isize + offset).max(0) as usize;
            if at > current.len() {
                return Err(format!(
                    "hunk {number} of {path} inserts after line {} but the sandbox file has only {} line(s)",
                    hunk.old_start,
                    current.len()
                ));
            }
            min_pos = at;
            continue;
        }

        let nominal = (hunk.old_start.max(1) as isize - 1 + offset).max(0) as usize;
        if nominal >= min_pos && matches_at(current, &expected, nominal) {
            min_pos = nominal + len;
            continue;
        }

        let found: Vec<usize> = (min_pos..=current.len().saturating_sub(len))
            .filter(|&pos| matches_at(current, &expected, pos))
            .collect();
        match found.as_slice() {
            [pos] => {
                let shift = *pos as isize - (hunk.old_start.max(1) as isize - 1);
                notes.push(format!(
                    "hunk {number} of {path} applies at line {} (offset {:+})",
                    pos + 1,
                    shift
                ));
                hunk.old_start = pos + 1;
                hunk.new_start = (hunk.new_start as isize + shift).max(0) as usize;
                offset = shift;
                min_pos = pos + len;
            }
            [] => return Err(describe_mismatch(hunk, current, nominal, number, path)),
            many => {
                return Err(format!(
                    "hunk {number} of {path} does not match at line {} and its lines occur {} times elsewhere (lines {}); include more context so the location is unambiguous",
                    nominal + 1,
                    many.len(),
                    many.iter()
                        .map(|p| (p + 1).to_string())
                        .collect::<Vec<_>>()
                        .join(", ")
                ));
            }
        }
    }
    Ok(())
}

fn matches_at(current: &[&str], expected: &[&str], pos: usize) -> bool {
    pos + expected.len() <= current.len() && current[pos..pos + expected.len()] == *expected
}

fn describe_mismatch(hunk: &Hunk, current: &[&str], start: usize, number: usize, path: &str) -> String {
    let old_side = hunk.lines.iter().filter_map(|l| match l {
        Line::Context(s) => Some(("context", s.as_str())),
        Line::Removed(s) => Some(("removed line", s.as_str())),
        _ => None,
    });
    for (i, (kind, expected)) in old_side.enumerate() {
        let line_no = start + i + 1;
        match current.get(start + i) {
            Some(actual) if *actual == expected => continue,
            Some(actual) => {
                return format!(
                    "hunk {number} of {path} at line {line_no} expected {kind} `{}` but sandbox has `{}`",
                    clip(expected),
                    clip(actual)
                );
            }
            None => {
                return format!(
                    "hunk {number} of {path} at line {line_no} expected {kind} `{}` but the sandbox file has only {} line(s)",
                    clip(expected),
                    current.len()
                );
            }
        }
    }
    format!(
        "hunk {number} of {path} does not match the sandbox content near line {}",
        start + 1
    )
}

fn read_text(abs: &Path, canonical_root: &Path, path: &str) -> Result<String, String> {
    if !abs.is_file() {
        return Err(format!("{path} does not exist in the sandbox"));
    }
    let resolved = abs
        .canonicalize()
        .map_err(|e| format!("{path} could not be resolved: {e}"))?;
    if !resolved.starts_with(canonical_root) {
        return Err(format!("{path} resolves outside the sandbox"));
    }
    let bytes = std::fs::read(abs).map_err(|e| format!("{path} could not be read: {e}"))?;
    String::from_utf8(bytes).map_err(|_| format!("{path} is not UTF-8 text and cannot be patched"))
}

fn split_lines(content: &str) -> Vec<&str> {
    if content.is_empty() {
        return Vec::new();
    }
    content
        .strip_suffix('\n')
        .unwrap_or(content)
        .split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .collect()
}

fn clip(s: &str) -> String {
    let trimmed = s.trim();
    if trimmed.chars().count() > 80 {
        let cut: String = trimmed.chars().take(77).collect();
        format!("{cut}...")
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::sanitize::sanitize;
    use std::fs;

    fn files_of(text: &str) -> Vec<FilePatch> {
        sanitize(text).unwrap().files
    }

    fn sandbox_with(path: &str, content: &str) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let abs = dir.path().join(path);
        fs::create_dir_all(abs.parent().unwrap()).unwrap();
        fs::write(abs, content).unwrap();
        dir
    }

    const FILE: &str = "a\nb\nc\nd\ne\n";

    #[test]
    fn test_exact_match_applies() {
        let dir = sandbox_with("x.txt", FILE);
        let mut files = files_of("--- a/x.txt\n+++ b/x.txt\n@@ -2,2 +2,2 @@\n b\n-c\n+C\n");
        assert!(check(&mut files, dir.path()).unwrap().is_empty());
    }

    #[test]
    fn test_unique_offset_is_accepted_and_header_moved() {
        let dir = sandbox_with("x.txt", FILE);
        let mut files = files_of("--- a/x.txt\n+++ b/x.txt\n@@ -1,2 +1,2 @@\n c\n-d\n+D\n");
        let notes = check(&mut files, dir.path()).unwrap();
        assert_eq!(files[0].hunks[0].old_start, 3);
        assert!(notes[0].contains("offset +2"));
    }

    #[test]
    fn test_mismatch_names_expected_and_actual() {
        let dir = sandbox_with("x.txt", FILE);
        let mut files = files_of("--- a/x.txt\n+++ b/x.txt\n@@ -2,2 +2,2 @@\n b\n-zzz\n+C\n");
        let err = check(&mut files, dir.path()).unwrap_err();
        assert_eq!(
            err,
            "hunk 1 of x.txt at line 3 expected removed line `zzz` but sandbox has `c`"
        );
    }

    #[test]
    fn test_ambiguous_context_rejected() {
        let dir = sandbox_with("x.txt", "x\ny\nx\ny\n");
        let mut files = files_of("--- a/x.txt\n+++ b/x.txt\n@@ -7,1 +7,2 @@\n x\n+new\n");
        let err = check(&mut files, dir.path()).unwrap_err();
        assert!(err.contains("occur 2 times"), "{err}");
    }

    #[test]
    fn test_missing_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut files = files_of("--- a/gone.txt\n+++ b/gone.txt\n@@ -1 +1 @@\n-a\n+b\n");
        let err = check(&mut files, dir.path()).unwrap_err();
        assert!(err.contains("does not exist"));
    }

    #[test]
    fn test_new_file_must_not_exist() {
        let dir = sandbox_with("n.txt", "already\n");
        let mut files = files_of("--- /dev/null\n+++ b/n.txt\n@@ -0,0 +1 @@\n+x\n");
        assert!(check(&mut files, dir.path()).unwrap_err().contains("already exists"));
    }

    #[test]
    fn test_delete_must_match_whole_file() {
        let dir = sandbox_with("d.txt", "one\ntwo\n");
        let mut partial = files_of("--- a/d.txt\n+++ /dev/null\n@@ -1,1 +0,0 @@\n-one\n");
        assert!(check(&mut partial, dir.path()).is_err());
        let mut full = files_of("--- a/d.txt\n+++ /dev/null\n@@ -1,2 +0,0 @@\n-one\n-two\n");
        assert!(check(&mut full, dir.path()).is_ok());
    }

    #[test]
    fn test_crlf_file_matches_and_is_flagged() {
        let dir = sandbox_with("a.txt", "one\r\ntwo\r\nthree\r\n");
        let mut files = files_of(
            "diff --git a/a.txt b/a.txt\n--- a/a.txt\n+++ b/a.txt\n@@ -1,3 +1,3 @@\r\n one\r\n-two\r\n+TWO\r\n three\r\n",
        );
        assert!(check(&mut files, dir.path()).unwrap().is_empty());
        assert!(files[0].crlf);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_out_of_sandbox_is_not_read() {
        let outside = sandbox_with("secret.txt", "token=abc\n");
        let dir = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path().join("secret.txt"), dir.path().join("link.txt"))
            .unwrap();
        let mut files = files_of("--- a/link.txt\n+++ b/link.txt\n@@ -1 +1 @@\n-guess\n+x\n");
        let err = check(&mut files, dir.path()).unwrap_err();
        assert!(err.contains("resolves outside the sandbox"), "{err}");
        assert!(!err.contains("token"));
    }

    #[test]
    fn test_insertion_past_end_rejected() {
        let dir = sandbox_with("x.txt", "a\n");
        let mut files = files_of("--- a/x.txt\n+++ b/x.txt\n@@ -5,0 +6,1 @@\n+z\n");
        assert!(check(&mut files, dir.path()).unwrap_err().contains("only 1 line"));
    }
}
