//! Test doubles for the generator, fetcher and store seams.
//!
//! ```ignore
//! let generator = MockGenerator::scripted()
//!     .fail_on(ANALYSIS_MARKER, AiError::Unavailable("timeout".into()));
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use reqwest::Url;

use crate::config::Prompts;
use crate::fetcher::{DocumentFetcher, FetchError};
use crate::llm::{AiError, TextGenerator};
use crate::store::{DocumentStore, Record, StoreError};

pub const ANALYSIS_MARKER: &str = "[[ANALYSIS]]";
pub const SUMMARY_MARKER: &str = "[[SUMMARY]]";
pub const QUIZ_MARKER: &str = "[[QUIZ]]";

pub const SCRIPTED_SUMMARY: &str = "Plants turn light into chemical energy.";

struct Rule {
    marker: String,
    reply: Result<String, AiError>,
    latency: Duration,
}

/// Generator returning canned replies chosen by a marker in the prompt.
pub struct MockGenerator {
    rules: Vec<Rule>,
    default_response: String,
    fail_first: Mutex<(usize, Option<AiError>)>,
    calls: Mutex<Vec<String>>,
}

impl MockGenerator {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            default_response: "Mock response".to_string(),
            fail_first: Mutex::new((0, None)),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Well-formed replies for each of the [`MockGenerator::prompts`].
    pub fn scripted() -> Self {
        Self::new()
            .with_reply(
                ANALYSIS_MARKER,
                "```json\n{\"title\": \"Photosynthesis\", \"subject\": \"Biology\"}\n```",
            )
            .with_reply(SUMMARY_MARKER, SCRIPTED_SUMMARY)
            .with_reply(QUIZ_MARKER, &scripted_quiz())
    }

    /// Templates tagged with markers so replies can be routed per prompt.
    pub fn prompts() -> Prompts {
        Prompts {
            analysis: format!("{} {{text}}", ANALYSIS_MARKER),
            summary: format!("{} {{text}}", SUMMARY_MARKER),
            quiz: format!("{} {{text}}", QUIZ_MARKER),
        }
    }

    pub fn with_fixed_response(mut self, response: impl Into<String>) -> Self {
        self.default_response = response.into();
        self
    }

    pub fn with_reply(mut self, marker: &str, reply: &str) -> Self {
        self.rules.retain(|r| r.marker != marker);
        self.rules.push(Rule {
            marker: marker.to_string(),
            reply: Ok(reply.to_string()),
            latency: Duration::ZERO,
        });
        self
    }

    pub fn fail_on(mut self, marker: &str, err: AiError) -> Self {
        self.rules.retain(|r| r.marker != marker);
        self.rules.push(Rule {
            marker: marker.to_string(),
            reply: Err(err),
            latency: Duration::ZERO,
        });
        self
    }

    /// Delay the reply for prompts carrying `marker`.
    pub fn with_latency_on(mut self, marker: &str, latency: Duration) -> Self {
        if let Some(rule) = self.rules.iter_mut().find(|r| r.marker == marker) {
            rule.latency = latency;
        }
        self
    }

    /// Fail the first `count` calls with `err`, whatever the prompt.
    pub fn fail_first(self, count: usize, err: AiError) -> Self {
        *self.fail_first.lock().unwrap() = (count, Some(err));
        self
    }

    pub fn get_calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl TextGenerator for MockGenerator {
    fn name(&self) -> &str {
        "mock"
    }

    async fn generate(&self, prompt: &str) -> Result<String, AiError> {
        self.calls.lock().unwrap().push(prompt.to_string());

        {
            let mut fail_first = self.fail_first.lock().unwrap();
            if fail_first.0 > 0 {
                fail_first.0 -= 1;
                if let Some(err) = &fail_first.1 {
                    return Err(err.clone());
                }
            }
        }

        match self.rules.iter().find(|r| prompt.contains(&r.marker)) {
            Some(rule) => {
                if !rule.latency.is_zero() {
                    tokio::time::sleep(rule.latency).await;
                }
                rule.reply.clone()
            }
            None => Ok(self.default_response.clone()),
        }
    }
}

/// A valid five-item quiz as a JSON string.
pub fn scripted_quiz() -> String {
    let items: Vec<_> = (1..=5)
        .map(|n| {
            serde_json::json!({
                "question": format!("What does step {} of photosynthesis produce?", n),
                "options": ["Glucose", "Oxygen", "Water", "Nitrogen"],
                "answer": "Glucose",
            })
        })
        .collect();
    serde_json::Value::Array(items).to_string()
}

/// Fetcher returning fixed bytes, or failing like an unreachable URL.
pub struct StaticFetcher {
    body: Option<Vec<u8>>,
    calls: AtomicUsize,
}

impl StaticFetcher {
    pub fn ok(body: Vec<u8>) -> Self {
        Self {
            body: Some(body),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn not_found() -> Self {
        Self {
            body: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl DocumentFetcher for StaticFetcher {
    async fn fetch(&self, url: &Url) -> Result<Vec<u8>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.body
            .clone()
            .ok_or_else(|| FetchError::FetchFailed(format!("{} returned 404 Not Found", url)))
    }
}

/// Store that refuses every write.
#[derive(Default)]
pub struct FailingStore {
    attempts: AtomicUsize,
}

impl FailingStore {
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl DocumentStore for FailingStore {
    fn name(&self) -> &str {
        "failing"
    }

    async fn create(&self, _collection: &str, _record: Record) -> Result<String, StoreError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::Unavailable("connection reset".to_string()))
    }
}
