//! In-memory unified diff: parse lenient text, render canonical text.

use std::fmt::Write as _;
use std::sync::LazyLock;

use regex::Regex;

static HUNK_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^@@ -(\d+)(?:,(\d+))? \+(\d+)(?:,(\d+))? @@ ?(.*)$").unwrap()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOp {
    Modify,
    Create,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    Context(String),
    Removed(String),
    Added(String),
    /// An empty line whose leading space was stripped. Resolved by sanitizing.
    Blank,
    /// `\ No newline at end of file` after the preceding line.
    NoNewline,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Hunk {
    pub old_start: usize,
    pub old_count: usize,
    pub new_start: usize,
    pub new_count: usize,
    pub section: String,
    pub lines: Vec<Line>,
}

impl Hunk {
    /// Lines the old side consumes: context, removed and blank.
    pub fn body_old_count(&self) -> usize {
        self.lines
            .iter()
            .filter(|l| matches!(l, Line::Context(_) | Line::Removed(_) | Line::Blank))
            .count()
    }

    pub fn body_new_count(&self) -> usize {
        self.lines
            .iter()
            .filter(|l| matches!(l, Line::Context(_) | Line::Added(_) | Line::Blank))
            .count()
    }

    pub fn old_lines(&self) -> Vec<&str> {
        self.lines
            .iter()
            .filter_map(|l| match l {
                Line::Context(s) | Line::Removed(s) => Some(s.as_str()),
                Line::Blank => Some(""),
                _ => None,
            })
            .collect()
    }

    pub fn has_context_or_removed(&self) -> bool {
        self.lines
            .iter()
            .any(|l| matches!(l, Line::Context(_) | Line::Removed(_) | Line::Blank))
    }

    pub fn has_context_or_added(&self) -> bool {
        self.lines
            .iter()
            .any(|l| matches!(l, Line::Context(_) | Line::Added(_) | Line::Blank))
    }

    pub fn header(&self) -> String {
        format!(
            "@@ -{},{} +{},{} @@",
            self.old_start, self.old_count, self.new_start, self.new_count
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilePatch {
    /// `None` for `/dev/null`.
    pub old_path: Option<String>,
    pub new_path: Option<String>,
    pub op: FileOp,
    pub binary: bool,
    pub rename: bool,
    /// The sandbox copy uses CRLF line endings; set by the applicability check
    /// and honoured when rendering hunk bodies.
    pub crlf: bool,
    pub hunks: Vec<Hunk>,
}

impl FilePatch {
    fn from_git_header(rest: &str) -> Self {
        // `a/<old> b/<new>`; identical paths are the common case.
        let (old, new) = match rest.split_once(" b/") {
            Some((old, new)) => (Some(strip_prefix(old)), Some(new.to_string())),
            None => (None, None),
        };
        Self {
            old_path: old,
            new_path: new,
            op: FileOp::Modify,
            binary: false,
            rename: false,
            crlf: false,
            hunks: Vec::new(),
        }
    }

    pub fn path(&self) -> Option<&str> {
        self.new_path.as_deref().or(self.old_path.as_deref())
    }

    fn finish(&mut self) {
        match (&self.old_path, &self.new_path) {
            (None, Some(_)) => self.op = FileOp::Create,
            (Some(_), None) => self.op = FileOp::Delete,
            _ => {}
        }
        match self.op {
            FileOp::Create => self.old_path = None,
            FileOp::Delete => self.new_path = None,
            FileOp::Modify => {}
        }
    }
}

/// Parse diff text into file patches.
///
/// Accepts git and plain `---`/`+++` headers, `index` and mode lines, and
/// hunk bodies with blank lines. Errors name the offending 1-based line.
pub fn parse(text: &str) -> Result<Vec<FilePatch>, String> {
    let lines: Vec<&str> = text.lines().collect();
    let mut files: Vec<FilePatch> = Vec::new();
    let mut current: Option<FilePatch> = None;
    let mut saw_old_header = false;
    let mut in_hunk = false;
    let mut in_binary = false;

    for (idx, &line) in lines.iter().enumerate() {
        let lineno = idx + 1;
        let next = lines.get(idx + 1).copied().unwrap_or("");

        if let Some(rest) = line.strip_prefix("diff --git ") {
            files.extend(current.take().map(finished));
            current = Some(FilePatch::from_git_header(rest));
            saw_old_header = false;
            in_hunk = false;
            in_binary = false;
            continue;
        }
        if in_binary {
            continue;
        }

        let is_old_header = line.starts_with("--- ") && next.starts_with("+++ ");
        if is_old_header {
            let starts_new_file = match &current {
                None => true,
                Some(file) => saw_old_header || !file.hunks.is_empty(),
            };
            if starts_new_file {
                files.extend(current.take().map(finished));
                current = Some(FilePatch {
                    old_path: None,
                    new_path: None,
                    op: FileOp::Modify,
                    binary: false,
                    rename: false,
                    crlf: false,
                    hunks: Vec::new(),
                });
            }
            if let Some(file) = current.as_mut() {
                file.old_path = header_path(&line[4..]);
            }
            saw_old_header = true;
            in_hunk = false;
            continue;
        }

        let Some(file) = current.as_mut() else {
            return Err(format!("line {lineno}: `{}` appears before any file header", clip(line)));
        };

        if !in_hunk || line.starts_with("@@") {
            if let Some(rest) = line.strip_prefix("+++ ") {
                file.new_path = header_path(rest);
            } else if line.starts_with("new file mode") {
                file.op = FileOp::Create;
            } else if line.starts_with("deleted file mode") {
                file.op = FileOp::Delete;
            } else if line.starts_with("rename from")
                || line.starts_with("rename to")
                || line.starts_with("copy from")
                || line.starts_with("copy to")
            {
                file.rename = true;
            } else if line.starts_with("Binary files ") || line.starts_with("GIT binary patch") {
                file.binary = true;
                in_binary = true;
            } else if line.starts_with("@@") {
                file.hunks.push(parse_hunk_header(line, lineno)?);
                in_hunk = true;
            } else if is_ignorable_header(line) {
                // index, mode and similarity lines carry nothing we use
            } else {
                return Err(format!("line {lineno}: unexpected `{}` outside a hunk", clip(line)));
            }
            continue;
        }

        let body = match line.chars().next() {
            None => Line::Blank,
            Some(' ') => Line::Context(line[1..].to_string()),
            Some('+') => Line::Added(line[1..].to_string()),
            Some('-') => Line::Removed(line[1..].to_string()),
            Some('\\') => Line::NoNewline,
            Some(_) => {
                return Err(format!("line {lineno}: unexpected `{}` inside a hunk", clip(line)));
            }
        };
        if let Some(hunk) = file.hunks.last_mut() {
            hunk.lines.push(body);
        }
    }

    files.extend(current.map(finished));
    Ok(files)
}

/// Canonical git-style text for `files`.
pub fn render(files: &[FilePatch]) -> String {
    let mut out = String::new();
    for file in files {
        let path = file.path().unwrap_or_default();
        let _ = writeln!(out, "diff --git a/{path} b/{path}");
        match file.op {
            FileOp::Create => out.push_str("new file mode 100644\n"),
            FileOp::Delete => out.push_str("deleted file mode 100644\n"),
            FileOp::Modify => {}
        }
        if file.hunks.is_empty() {
            continue;
        }
        match &file.old_path {
            Some(p) => {
                let _ = writeln!(out, "--- a/{p}");
            }
            None => out.push_str("--- /dev/null\n"),
        }
        match &file.new_path {
            Some(p) => {
                let _ = writeln!(out, "+++ b/{p}");
            }
            None => out.push_str("+++ /dev/null\n"),
        }
        for hunk in &file.hunks {
            out.push_str(&hunk.header());
            if !hunk.section.is_empty() {
                out.push(' ');
                out.push_str(&hunk.section);
            }
            out.push('\n');
            let mut lines = hunk.lines.iter().peekable();
            while let Some(line) = lines.next() {
                // The last line of a file without a trailing newline has no CR either.
                let eol = if file.crlf && lines.peek() != Some(&&Line::NoNewline) {
                    "\r\n"
                } else {
                    "\n"
                };
                match line {
                    Line::Context(s) => {
                        let _ = write!(out, " {s}{eol}");
                    }
                    Line::Added(s) => {
                        let _ = write!(out, "+{s}{eol}");
                    }
                    Line::Removed(s) => {
                        let _ = write!(out, "-{s}{eol}");
                    }
                    Line::Blank => {
                        let _ = write!(out, " {eol}");
                    }
                    Line::NoNewline => out.push_str("\\ No newline at end of file\n"),
                }
            }
        }
    }
    out
}

fn finished(mut file: FilePatch) -> FilePatch {
    file.finish();
    file
}

fn parse_hunk_header(line: &str, lineno: usize) -> Result<Hunk, String> {
    let caps = HUNK_HEADER.captures(line).ok_or_else(|| {
        format!(
            "line {lineno}: malformed hunk header `{}` (expected `@@ -start,count +start,count @@`)",
            clip(line)
        )
    })?;
    let num = |i: usize, default: usize| {
        caps.get(i)
            .and_then(|m| m.as_str().parse::<usize>().ok())
            .unwrap_or(default)
    };
    Ok(Hunk {
        old_start: num(1, 0),
        old_count: num(2, 1),
        new_start: num(3, 0),
        new_count: num(4, 1),
        section: caps.get(5).map(|m| m.as_str().trim().to_string()).unwrap_or_default(),
        lines: Vec::new(),
    })
}

/// Path from a `---`/`+++` header; `None` for `/dev/null`.
fn header_path(raw: &str) -> Option<String> {
    let raw = raw.split('\t').next().unwrap_or(raw).trim();
    let raw = raw.trim_matches('"');
    if raw == "/dev/null" {
        None
    } else {
        Some(strip_prefix(raw))
    }
}

fn strip_prefix(path: &str) -> String {
    path.strip_prefix("a/")
        .or_else(|| path.strip_prefix("b/"))
        .unwrap_or(path)
        .to_string()
}

fn is_ignorable_header(line: &str) -> bool {
    ["index ", "old mode", "new mode", "similarity index", "dissimilarity index"]
        .iter()
        .any(|p| line.starts_with(p))
}

fn clip(line: &str) -> String {
    crate::util::summary_line(line, 60)
}
