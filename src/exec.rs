//! Bounded shell execution shared by the preflight pipeline and repair-stage
//! verification.
//!
//! Commands run through `sh -c` inside the sandbox. Output is captured while
//! the process runs so a timed-out command still reports what it printed.

use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

/// Characters of combined output kept for feedback.
pub const MAX_CAPTURED_CHARS: usize = 4000;

/// Bytes buffered per stream before the oldest output is dropped.
const MAX_BUFFERED_BYTES: usize = 1 << 20;

/// How long to wait for pipes to drain once the process is gone.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Result of one shell command.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandOutcome {
    pub command: String,
    /// `None` when the process was killed or terminated by a signal.
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    /// Combined stdout then stderr, tail-truncated to [`MAX_CAPTURED_CHARS`].
    pub output: String,
    pub duration: Duration,
}

impl CommandOutcome {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    /// One-line description of why the command failed.
    pub fn failure_summary(&self) -> String {
        if self.timed_out {
            format!(
                "`{}` timed out after {:.0}s",
                self.command,
                self.duration.as_secs_f64()
            )
        } else {
            match self.exit_code {
                Some(code) => format!("`{}` exited with code {}", self.command, code),
                None => format!("`{}` was terminated by a signal", self.command),
            }
        }
    }
}

/// Run `command` with `sh -c` in `cwd`, killing it after `timeout`.
///
/// Spawn failures are errors; non-zero exits and timeouts are reported in
/// the returned [`CommandOutcome`].
pub async fn run_shell(command: &str, cwd: &Path, timeout: Duration) -> Result<CommandOutcome> {
    let start = Instant::now();

    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(command)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    // Own process group, so a timeout can take down everything `sh` started.
    #[cfg(unix)]
    cmd.process_group(0);
    let mut child = cmd
        .spawn()
        .with_context(|| format!("Failed to spawn command: {}", command))?;

    let stdout = child.stdout.take().context("Failed to capture stdout")?;
    let stderr = child.stderr.take().context("Failed to capture stderr")?;
    let out_buf = Arc::new(Mutex::new(Vec::new()));
    let err_buf = Arc::new(Mutex::new(Vec::new()));
    let readers = [
        tokio::spawn(drain(stdout, Arc::clone(&out_buf))),
        tokio::spawn(drain(stderr, Arc::clone(&err_buf))),
    ];

    let (exit_code, timed_out) = match tokio::time::timeout(timeout, child.wait()).await {
        Ok(status) => {
            let status = status.with_context(|| format!("Failed to wait for: {}", command))?;
            (status.code(), false)
        }
        Err(_) => {
            kill_process_group(&child);
            if let Err(e) = child.kill().await {
                tracing::warn!("failed to kill timed-out command `{}`: {}", command, e);
            }
            (None, true)
        }
    };

    for reader in readers {
        let abort = reader.abort_handle();
        if tokio::time::timeout(DRAIN_GRACE, reader).await.is_err() {
            abort.abort();
        }
    }

    let mut combined = take_lossy(&out_buf);
    let stderr_text = take_lossy(&err_buf);
    if !stderr_text.trim().is_empty() {
        if !combined.is_empty() && !combined.ends_with('\n') {
            combined.push('\n');
        }
        combined.push_str(&stderr_text);
    }
    let duration = start.elapsed();
    if timed_out {
        combined.push_str(&format!(
            "\n[killed after exceeding the {}s timeout]",
            timeout.as_secs()
        ));
    }

    Ok(CommandOutcome {
        command: command.to_string(),
        exit_code,
        timed_out,
        output: truncate_tail(&combined, MAX_CAPTURED_CHARS),
        duration,
    })
}

#[cfg(unix)]
fn kill_process_group(child: &tokio::process::Child) {
    if let Some(pid) = child.id() {
        // SAFETY: plain syscall on a group id we created at spawn.
        let rc = unsafe { libc::kill(-(pid as libc::pid_t), libc::SIGKILL) };
        if rc != 0 {
            tracing::debug!(
                "failed to signal process group {}: {}",
                pid,
                std::io::Error::last_os_error()
            );
        }
    }
}

#[cfg(not(unix))]
fn kill_process_group(_child: &tokio::process::Child) {}

async fn drain<R: AsyncRead + Unpin>(mut reader: R, buf: Arc<Mutex<Vec<u8>>>) {
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if let Ok(mut b) = buf.lock() {
                    b.extend_from_slice(&chunk[..n]);
                    if b.len() > MAX_BUFFERED_BYTES {
                        let excess = b.len() - MAX_BUFFERED_BYTES;
                        b.drain(..excess);
                    }
                }
            }
        }
    }
}

fn take_lossy(buf: &Arc<Mutex<Vec<u8>>>) -> String {
    match buf.lock() {
        Ok(b) => String::from_utf8_lossy(&b).into_owned(),
        Err(_) => String::new(),
    }
}

/// Keep the last `max` characters; failures are reported at the end of output.
pub fn truncate_tail(s: &str, max: usize) -> String {
    let trimmed = s.trim();
    let count = trimmed.chars().count();
    if count <= max {
        return trimmed.to_string();
    }
    let tail: String = trimmed.chars().skip(count - max).collect();
    format!("… (truncated)\n{}", tail)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_shell_success_captures_output() {
        let dir = tempfile::tempdir().unwrap();
        let out = run_shell("echo hello && echo oops 1>&2", dir.path(), Duration::from_secs(10))
            .await
            .unwrap();
        assert!(out.success());
        assert_eq!(out.exit_code, Some(0));
        assert!(out.output.contains("hello"));
        assert!(out.output.contains("oops"));
    }

    #[tokio::test]
    async fn test_run_shell_non_zero_exit() {
        let dir = tempfile::tempdir().unwrap();
        let out = run_shell("echo failing test; exit 3", dir.path(), Duration::from_secs(10))
            .await
            .unwrap();
        assert!(!out.success());
        assert_eq!(out.exit_code, Some(3));
        assert!(out.failure_summary().contains("code 3"));
        assert!(out.output.contains("failing test"));
    }

    #[tokio::test]
    async fn test_run_shell_runs_in_cwd() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "here").unwrap();
        let out = run_shell("cat marker.txt", dir.path(), Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(out.output, "here");
    }

    #[tokio::test]
    async fn test_run_shell_timeout_keeps_partial_output() {
        let dir = tempfile::tempdir().unwrap();
        let out = run_shell(
            "echo started; exec sleep 30",
            dir.path(),
            Duration::from_millis(500),
        )
        .await
        .unwrap();
        assert!(out.timed_out);
        assert!(!out.success());
        assert!(out.output.contains("started"));
        assert!(out.output.contains("timeout"));
        assert!(out.failure_summary().contains("timed out"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_shell_timeout_kills_grandchildren() {
        let dir = tempfile::tempdir().unwrap();
        let out = run_shell(
            "sh -c 'sleep 1; touch late-write'; echo done",
            dir.path(),
            Duration::from_millis(200),
        )
        .await
        .unwrap();
        assert!(out.timed_out);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!dir.path().join("late-write").exists());
    }

    #[test]
    fn test_truncate_tail_keeps_end() {
        let s = format!("{}END", "x".repeat(100));
        let out = truncate_tail(&s, 10);
        assert!(out.ends_with("xxxxxxxEND"));
        assert!(out.starts_with("… (truncated)"));
    }

    #[test]
    fn test_truncate_tail_unicode_safe() {
        assert_eq!(truncate_tail("错误: 失败 😊", 2), "… (truncated)\n 😊");
        assert_eq!(truncate_tail("ok", 10), "ok");
    }
}
