//! OpenRouter API client for LLM interactions.

use anyhow::Result;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::AiConfig;
use crate::llm::{AiError, TextGenerator};

/// OpenRouter client for chat completions.
#[derive(Clone)]
pub struct OpenRouterClient {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    timeout: Duration,
}

impl OpenRouterClient {
    pub fn new(client: Client, config: &AiConfig) -> Result<Self> {
        if config.api_key.trim().is_empty() {
            anyhow::bail!("OpenRouter API key is empty");
        }

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url_or_default()),
            api_key: config.api_key.clone(),
            model: config.model_or_default().to_string(),
            timeout: config.timeout,
        })
    }

    /// Send a chat completion request with text only.
    pub async fn chat(&self, messages: Vec<Message>) -> Result<String, AiError> {
        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages,
            max_tokens: Some(4096),
        };

        self.send_request(request).await
    }

    async fn send_request(&self, request: ChatCompletionRequest) -> Result<String, AiError> {
        debug!("Sending request to OpenRouter: model={}", request.model);

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| AiError::from_transport("openrouter", e))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AiError::Rejected {
                status: status.as_u16(),
                message: error_text,
            });
        }

        let response: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| AiError::from_transport("openrouter", e))?;

        if let Some(usage) = &response.usage {
            info!(
                "OpenRouter response: {} tokens (prompt: {}, completion: {})",
                usage.total_tokens, usage.prompt_tokens, usage.completion_tokens
            );
        }

        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        if content.trim().is_empty() {
            return Err(AiError::EmptyResponse);
        }
        Ok(content)
    }
}

#[async_trait::async_trait]
impl TextGenerator for OpenRouterClient {
    fn name(&self) -> &str {
        "openrouter"
    }

    async fn generate(&self, prompt: &str) -> Result<String, AiError> {
        self.chat(vec![Message::user(prompt)]).await
    }
}

// ============================================================================
// Request/Response types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}
