//! Google Gemini `generateContent` client.

use anyhow::Result;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::AiConfig;
use crate::llm::{AiError, TextGenerator};

#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    endpoint: String,
    api_key: String,
    timeout: Duration,
}

impl GeminiClient {
    pub fn new(client: Client, config: &AiConfig) -> Result<Self> {
        if config.api_key.trim().is_empty() {
            anyhow::bail!("Gemini API key is empty");
        }

        Ok(Self {
            client,
            endpoint: format!(
                "{}/v1beta/models/{}:generateContent",
                config.base_url_or_default(),
                config.model_or_default()
            ),
            api_key: config.api_key.clone(),
            timeout: config.timeout,
        })
    }
}

#[async_trait::async_trait]
impl TextGenerator for GeminiClient {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn generate(&self, prompt: &str) -> Result<String, AiError> {
        let request = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
        };

        debug!("Sending request to Gemini: {}", self.endpoint);

        let response = self
            .client
            .post(&self.endpoint)
            .header("x-goog-api-key", &self.api_key)
            .timeout(self.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| AiError::from_transport("gemini", e))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AiError::Rejected {
                status: status.as_u16(),
                message: error_text,
            });
        }

        let response: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| AiError::from_transport("gemini", e))?;

        if let Some(reason) = response.prompt_feedback.and_then(|f| f.block_reason) {
            return Err(AiError::Rejected {
                status: status.as_u16(),
                message: format!("prompt blocked: {}", reason),
            });
        }

        if let Some(usage) = &response.usage_metadata {
            info!(
                "Gemini response: {} tokens (prompt: {}, completion: {})",
                usage.total_token_count, usage.prompt_token_count, usage.candidates_token_count
            );
        }

        let text: String = response
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().map(|p| p.text).collect())
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(AiError::EmptyResponse);
        }
        Ok(text)
    }
}

#[derive(Debug, Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
    #[serde(default)]
    total_token_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AiProviderKind;
    use crate::error::NoteError;
    use crate::llm::RetryPolicy;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(base_url: &str) -> AiConfig {
        AiConfig {
            provider: AiProviderKind::Gemini,
            api_key: "gm-key".to_string(),
            model: None,
            base_url: Some(base_url.to_string()),
            timeout: Duration::from_secs(2),
            retry: RetryPolicy::default(),
        }
    }

    #[tokio::test]
    async fn test_parts_are_concatenated() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-1.5-flash:generateContent"))
            .and(header("x-goog-api-key", "gm-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "candidates": [{
                    "content": {
                        "parts": [{"text": "Light "}, {"text": "becomes sugar."}],
                        "role": "model"
                    }
                }],
                "usageMetadata": {
                    "promptTokenCount": 4,
                    "candidatesTokenCount": 3,
                    "totalTokenCount": 7
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = GeminiClient::new(Client::new(), &config(&server.uri())).unwrap();
        let text = client.generate("Summarize photosynthesis").await.unwrap();
        assert_eq!(text, "Light becomes sugar.");
    }

    #[tokio::test]
    async fn test_blocked_prompt_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "promptFeedback": {"blockReason": "SAFETY"}
            })))
            .mount(&server)
            .await;

        let client = GeminiClient::new(Client::new(), &config(&server.uri())).unwrap();
        let err = client.generate("prompt").await.unwrap_err();
        assert!(matches!(err, AiError::Rejected { ref message, .. } if message.contains("SAFETY")));
    }

    #[tokio::test]
    async fn test_unreachable_provider_is_unavailable() {
        // Nothing listens on port 9 (discard) on the loopback interface.
        let client = GeminiClient::new(Client::new(), &config("http://127.0.0.1:9")).unwrap();
        let err = client.generate("prompt").await.unwrap_err();
        assert!(matches!(err, AiError::Unavailable(_)));
        assert!(!err.to_string().contains("gm-key"));
        assert!(!NoteError::from(err).to_string().contains("gm-key"));
    }

    #[tokio::test]
    async fn test_key_is_not_sent_in_the_url() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let client = GeminiClient::new(Client::new(), &config(&server.uri())).unwrap();
        client.generate("prompt").await.unwrap_err();

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].url.query().is_none());
        assert!(!requests[0].url.as_str().contains("gm-key"));
    }
}
