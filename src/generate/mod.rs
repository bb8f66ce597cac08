//! The generation call: prompt and context in, diff text out.
//!
//! [`Generator`] is the seam to the language model. Two implementations ship:
//! [`CommandGenerator`] pipes the prompt to a CLI on stdin, and
//! [`HttpGenerator`] calls an OpenAI-compatible chat completions endpoint.

pub mod command;
pub mod http;
pub mod prompt;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use async_trait::async_trait;

use crate::config::{GeneratorConfig, GeneratorKind};
use crate::context::RepoContext;
use crate::errors::GenerationError;

pub use command::CommandGenerator;
pub use http::HttpGenerator;

/// Everything one generation attempt sees.
#[derive(Debug, Clone, Copy)]
pub struct GenerationRequest<'a> {
    pub instruction: &'a str,
    pub context: &'a RepoContext,
    /// Folded feedback from earlier failed attempts.
    pub previous_error: Option<&'a str>,
}

#[async_trait]
pub trait Generator: Send + Sync {
    /// Short label for logs.
    fn name(&self) -> &str;

    /// Return the raw candidate diff (or the no-changes sentinel).
    async fn generate(&self, request: &GenerationRequest<'_>) -> Result<String, GenerationError>;
}

pub type DynGenerator = Arc<dyn Generator>;

/// Run one generation call bounded by `timeout`.
pub async fn generate_with_timeout(
    generator: &dyn Generator,
    request: &GenerationRequest<'_>,
    timeout: Duration,
) -> Result<String, GenerationError> {
    match tokio::time::timeout(timeout, generator.generate(request)).await {
        Ok(result) => result,
        Err(_) => Err(GenerationError::TimedOut {
            secs: timeout.as_secs(),
        }),
    }
}

/// Build the configured generator. Reads the API key env var once, here.
pub fn build_generator(config: &GeneratorConfig) -> Result<DynGenerator> {
    match config.kind {
        GeneratorKind::Command => {
            if config.command.trim().is_empty() {
                bail!("generator.command is empty");
            }
            Ok(Arc::new(CommandGenerator::new(
                config.command.clone(),
                config.args.clone(),
            )))
        }
        GeneratorKind::Http => {
            let api_key = std::env::var(&config.api_key_env)
                .ok()
                .filter(|k| !k.trim().is_empty());
            let Some(api_key) = api_key else {
                bail!(
                    "{} is not set; the http generator needs an API key",
                    config.api_key_env
                );
            };
            Ok(Arc::new(HttpGenerator::new(
                config.endpoint.clone(),
                config.model.clone(),
                api_key,
            )))
        }
    }
}
