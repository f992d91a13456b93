//! LLM text-generation service.
//!
//! The fabric only ever asks the model for one thing: a completion for a
//! prompt. Agents hold the service through the [`LanguageModel`] trait so a
//! remote API and the offline static model are interchangeable.

use crate::{config::LlmConfig, FabricError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

const API_VERSION: &str = "2023-06-01";
const MAX_COMPLETION_TOKENS: u32 = 1024;

/// Text-generation contract
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate_text(&self, prompt: &str) -> Result<String>;
}

/// HTTP-backed language model speaking the messages API
#[derive(Debug, Clone)]
pub struct HttpLanguageModel {
    config: LlmConfig,
    api_key: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<PromptMessage<'a>>,
}

#[derive(Serialize)]
struct PromptMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct CompletionResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: String,
}

impl HttpLanguageModel {
    pub fn new(config: LlmConfig) -> Result<Self> {
        let api_key = config.api_key.clone().ok_or_else(|| {
            FabricError::Configuration(
                "FABRIC_LLM_API_KEY is required for the HTTP language model".to_string(),
            )
        })?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            config,
            api_key,
            client,
        })
    }
}

#[async_trait]
impl LanguageModel for HttpLanguageModel {
    async fn generate_text(&self, prompt: &str) -> Result<String> {
        let request = CompletionRequest {
            model: &self.config.model,
            max_tokens: MAX_COMPLETION_TOKENS,
            messages: vec![PromptMessage {
                role: "user",
                content: prompt,
            }],
        };

        let response = self
            .client
            .post(format!("{}/v1/messages", self.config.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json::<CompletionResponse>()
            .await?;

        let text: String = response
            .content
            .iter()
            .filter(|block| block.block_type == "text")
            .map(|block| block.text.as_str())
            .collect();
        debug!(model = %self.config.model, chars = text.len(), "completion received");
        Ok(text)
    }
}

/// Offline model returning scripted responses
///
/// Pops queued responses in order; once the queue is empty it falls back to
/// a deterministic echo of the prompt, so agents keep functioning without a
/// configured API key.
#[derive(Debug, Default)]
pub struct StaticLanguageModel {
    responses: Mutex<VecDeque<String>>,
}

impl StaticLanguageModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_responses(responses: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
        }
    }
}

#[async_trait]
impl LanguageModel for StaticLanguageModel {
    async fn generate_text(&self, prompt: &str) -> Result<String> {
        if let Some(response) = self.responses.lock().await.pop_front() {
            return Ok(response);
        }
        let preview: String = prompt.chars().take(120).collect();
        Ok(format!("[static completion] {preview}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_model_pops_scripted_responses_then_echoes() {
        let model = StaticLanguageModel::with_responses(["first", "second"]);
        assert_eq!(model.generate_text("q1").await.unwrap(), "first");
        assert_eq!(model.generate_text("q2").await.unwrap(), "second");
        let fallback = model.generate_text("what is up").await.unwrap();
        assert!(fallback.contains("what is up"));
    }

    #[test]
    fn http_model_requires_an_api_key() {
        let config = LlmConfig {
            api_key: None,
            base_url: "https://api.anthropic.com".to_string(),
            model: "claude-3-5-sonnet-20241022".to_string(),
            timeout_secs: 10,
        };
        assert!(HttpLanguageModel::new(config).is_err());
    }
}
