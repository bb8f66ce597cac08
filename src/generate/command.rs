use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::{GenerationRequest, Generator, prompt};
use crate::errors::GenerationError;
use crate::exec::truncate_tail;

/// Runs a CLI (e.g. `claude --print`) with the prompt on stdin and takes
/// stdout as the candidate diff.
pub struct CommandGenerator {
    command: String,
    args: Vec<String>,
}

impl CommandGenerator {
    pub fn new(command: String, args: Vec<String>) -> Self {
        Self { command, args }
    }
}

#[async_trait]
impl Generator for CommandGenerator {
    fn name(&self) -> &str {
        &self.command
    }

    async fn generate(&self, request: &GenerationRequest<'_>) -> Result<String, GenerationError> {
        let prompt = prompt::render(request);

        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| GenerationError::Spawn {
                command: self.command.clone(),
                source,
            })?;

        tracing::debug!(
            command = %self.command,
            prompt_chars = prompt.len(),
            "generator spawned"
        );

        // Feed stdin from a task so a chatty generator cannot deadlock on a full pipe.
        let writer = child.stdin.take().map(|mut stdin| {
            tokio::spawn(async move {
                stdin.write_all(prompt.as_bytes()).await?;
                stdin.shutdown().await
            })
        });

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| GenerationError::Transport(format!("waiting for {}: {}", self.command, e)))?;

        if let Some(writer) = writer
            && let Ok(Err(e)) = writer.await
        {
            tracing::debug!("generator closed stdin early: {}", e);
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(GenerationError::NonZeroExit {
                exit_code: output.status.code().unwrap_or(-1),
                stderr: truncate_tail(&stderr, 2000),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if stdout.trim().is_empty() {
            return Err(GenerationError::EmptyResponse);
        }
        Ok(stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RepoContext;

    fn request(ctx: &RepoContext) -> GenerationRequest<'_> {
        GenerationRequest {
            instruction: "add a null check",
            context: ctx,
            previous_error: None,
        }
    }

    #[tokio::test]
    async fn test_prompt_goes_to_stdin_and_stdout_comes_back() {
        let ctx = RepoContext::default();
        let generator = CommandGenerator::new(
            "sh".into(),
            vec!["-c".into(), "grep -c 'add a null check'".into()],
        );
        let out = generator.generate(&request(&ctx)).await.unwrap();
        assert_eq!(out.trim(), "1");
    }

    #[tokio::test]
    async fn test_non_zero_exit() {
        let ctx = RepoContext::default();
        let generator = CommandGenerator::new(
            "sh".into(),
            vec!["-c".into(), "cat >/dev/null; echo rate limited >&2; exit 7".into()],
        );
        match generator.generate(&request(&ctx)).await.unwrap_err() {
            GenerationError::NonZeroExit { exit_code, stderr } => {
                assert_eq!(exit_code, 7);
                assert!(stderr.contains("rate limited"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_empty_output() {
        let ctx = RepoContext::default();
        let generator = CommandGenerator::new("sh".into(), vec!["-c".into(), "cat >/dev/null".into()]);
        assert!(matches!(
            generator.generate(&request(&ctx)).await.unwrap_err(),
            GenerationError::EmptyResponse
        ));
    }

    #[tokio::test]
    async fn test_missing_binary() {
        let ctx = RepoContext::default();
        let generator = CommandGenerator::new("patchwright-no-such-generator".into(), vec![]);
        assert!(matches!(
            generator.generate(&request(&ctx)).await.unwrap_err(),
            GenerationError::Spawn { .. }
        ));
    }
}
