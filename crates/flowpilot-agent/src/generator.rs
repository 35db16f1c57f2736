//! The text-generation seam used by workflow analysis.
//!
//! The engine only needs "prompt in, text out".  [`TextGenerator`] is that
//! contract; [`LlmClient`] implements it against a real provider and
//! [`DisabledGenerator`] stands in when no API key is configured.

use async_trait::async_trait;

use crate::error::{AgentError, Result};
use crate::llm::{ChatRequest, LlmClient, Message};

/// Something that turns a prompt into text.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Complete `prompt` and return the generated text.
    async fn complete(&self, prompt: &str) -> Result<String>;

    /// Backend name for logs.
    fn name(&self) -> &str {
        "generator"
    }
}

#[async_trait]
impl TextGenerator for LlmClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let request = ChatRequest {
            messages: vec![
                Message::system(
                    "You are a productivity assistant. Answer with JSON only, no prose.",
                ),
                Message::user(prompt),
            ],
            temperature: Some(0.3),
            ..Default::default()
        };
        let response = self.chat(&request).await?;
        Ok(response.text)
    }

    fn name(&self) -> &str {
        self.provider().as_str()
    }
}

/// Always fails with [`AgentError::Disabled`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledGenerator;

#[async_trait]
impl TextGenerator for DisabledGenerator {
    async fn complete(&self, _prompt: &str) -> Result<String> {
        Err(AgentError::Disabled)
    }

    fn name(&self) -> &str {
        "disabled"
    }
}

/// Strip a surrounding Markdown code fence (```` ```json ... ``` ````) if
/// the model wrapped its answer in one.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string (e.g. `json`) on the opening line.
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    body.strip_suffix("```").unwrap_or(body).trim()
}
