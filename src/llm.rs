//! Generative-model abstraction shared by the provider clients.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use tracing::{info, warn};

use crate::config::{AiConfig, AiProviderKind};
use crate::gemini::GeminiClient;
use crate::openrouter::OpenRouterClient;

#[derive(Debug, Clone, Error)]
pub enum AiError {
    /// Provider unreachable or the request timed out.
    #[error("AI provider unavailable: {0}")]
    Unavailable(String),

    /// Provider answered with an error.
    #[error("AI provider rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("AI provider returned an empty response")]
    EmptyResponse,
}

impl AiError {
    /// Only unavailability is worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }

    /// Classify a transport error from reqwest. The request URL is dropped
    /// from the message since it may carry credentials.
    pub fn from_transport(provider: &str, err: reqwest::Error) -> Self {
        let err = err.without_url();
        if err.is_decode() {
            // Reached the provider, but the body was not what it documents.
            Self::Rejected {
                status: 502,
                message: format!("{}: unreadable response: {}", provider, err),
            }
        } else {
            Self::Unavailable(format!("{}: {}", provider, err))
        }
    }
}

/// Sends one prompt, returns the model's raw text.
#[async_trait::async_trait]
pub trait TextGenerator: Send + Sync {
    fn name(&self) -> &str;
    async fn generate(&self, prompt: &str) -> Result<String, AiError>;
}

/// Cut `text` to at most `max_chars` characters, never splitting one.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

// ============================================================================
// Retry
// ============================================================================

/// Bounded retry for transient provider failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub base_delay_ms: u64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay_ms: 250,
            max_delay: Duration::from_secs(5),
        }
    }
}

/// Wraps a generator and retries [`AiError::Unavailable`] with jittered
/// exponential backoff. Rejections and empty replies are returned at once.
pub struct RetryingGenerator {
    inner: Arc<dyn TextGenerator>,
    policy: RetryPolicy,
}

impl RetryingGenerator {
    pub fn new(inner: Arc<dyn TextGenerator>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait::async_trait]
impl TextGenerator for RetryingGenerator {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn generate(&self, prompt: &str) -> Result<String, AiError> {
        // Delays: base*2, base*4, ... capped at max_delay, each jittered.
        let strategy = ExponentialBackoff::from_millis(2)
            .factor(self.policy.base_delay_ms.max(1) / 2 + 1)
            .max_delay(self.policy.max_delay)
            .map(jitter)
            .take(self.policy.max_retries);

        RetryIf::spawn(
            strategy,
            || self.inner.generate(prompt),
            |err: &AiError| {
                let retry = err.is_transient();
                if retry {
                    warn!("{} unavailable, retrying: {}", self.inner.name(), err);
                }
                retry
            },
        )
        .await
    }
}

/// Build the configured provider client, wrapped in retry when enabled.
pub fn build_generator(
    config: &AiConfig,
    client: reqwest::Client,
) -> anyhow::Result<Arc<dyn TextGenerator>> {
    let provider: Arc<dyn TextGenerator> = match config.provider {
        AiProviderKind::OpenRouter => Arc::new(OpenRouterClient::new(client, config)?),
        AiProviderKind::Gemini => Arc::new(GeminiClient::new(client, config)?),
    };

    info!(
        "AI provider: {} (model: {}, timeout: {:?}, retries: {})",
        provider.name(),
        config.model_or_default(),
        config.timeout,
        config.retry.max_retries
    );

    if config.retry.max_retries == 0 {
        return Ok(provider);
    }
    Ok(Arc::new(RetryingGenerator::new(provider, config.retry)))
}
