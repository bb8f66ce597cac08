use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use super::{GenerationRequest, Generator, prompt};
use crate::errors::GenerationError;

const SYSTEM_PROMPT: &str =
    "You are a careful software engineer. You answer only with a unified diff or the literal NO_CHANGES.";

/// OpenAI-compatible chat completions client. The whole rendered prompt is
/// sent as one user message.
pub struct HttpGenerator {
    endpoint: String,
    model: String,
    api_key: String,
    client: Client,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

impl HttpGenerator {
    pub fn new(endpoint: String, model: String, api_key: String) -> Self {
        Self {
            endpoint,
            model,
            api_key,
            client: Client::new(),
        }
    }

    fn body(&self, prompt: &str) -> serde_json::Value {
        json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": prompt }
            ],
            "temperature": 0.0
        })
    }
}

#[async_trait]
impl Generator for HttpGenerator {
    fn name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &GenerationRequest<'_>) -> Result<String, GenerationError> {
        let prompt = prompt::render(request);
        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&self.body(&prompt))
            .send()
            .await
            .map_err(|e| GenerationError::Transport(e.to_string()))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| GenerationError::Transport(e.to_string()))?;
        if !status.is_success() {
            return Err(GenerationError::Transport(format!(
                "{} returned {}: {}",
                self.endpoint,
                status,
                crate::exec::truncate_tail(&text, 1000)
            )));
        }

        parse_content(&text)
    }
}

fn parse_content(text: &str) -> Result<String, GenerationError> {
    let parsed: ChatResponse = serde_json::from_str(text)
        .map_err(|e| GenerationError::Transport(format!("unreadable chat response: {e}")))?;
    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .filter(|c| !c.trim().is_empty())
        .ok_or(GenerationError::EmptyResponse)
}
