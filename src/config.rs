//! Process-wide configuration.
//!
//! Read once at startup from the environment (after `.env` is loaded) and
//! handed to each component explicitly. Prompt templates can be overridden
//! from a JSON file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

use crate::llm::RetryPolicy;

/// Placeholder substituted with the (truncated) source text.
pub const TEXT_PLACEHOLDER: &str = "{text}";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub ai: AiConfig,
    pub budgets: CharBudgets,
    /// Overall limit for the text-only endpoints.
    pub text_timeout: Duration,
    /// Overall limit for one document pipeline run.
    pub document_timeout: Duration,
    pub fetch: FetchConfig,
    pub store: StoreConfig,
    pub auth: AuthConfig,
    pub prompts_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AiProviderKind {
    OpenRouter,
    Gemini,
}

impl AiProviderKind {
    pub fn from_name(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openrouter" => Some(Self::OpenRouter),
            "gemini" => Some(Self::Gemini),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AiConfig {
    pub provider: AiProviderKind,
    pub api_key: String,
    pub model: Option<String>,
    pub base_url: Option<String>,
    /// Per-request limit enforced by the HTTP client.
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl AiConfig {
    pub fn model_or_default(&self) -> &str {
        match (&self.model, self.provider) {
            (Some(model), _) => model,
            (None, AiProviderKind::OpenRouter) => "google/gemini-flash-1.5",
            (None, AiProviderKind::Gemini) => "gemini-1.5-flash",
        }
    }

    pub fn base_url_or_default(&self) -> &str {
        let url = match (&self.base_url, self.provider) {
            (Some(url), _) => url.as_str(),
            (None, AiProviderKind::OpenRouter) => "https://openrouter.ai/api/v1",
            (None, AiProviderKind::Gemini) => "https://generativelanguage.googleapis.com",
        };
        url.trim_end_matches('/')
    }
}

/// Character budgets applied to source text before each prompt is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharBudgets {
    pub analysis: usize,
    pub summary: usize,
    pub quiz: usize,
}

impl Default for CharBudgets {
    fn default() -> Self {
        Self {
            analysis: 4000,
            summary: 8000,
            quiz: 8000,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FetchConfig {
    pub timeout: Duration,
    pub max_bytes: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            max_bytes: 50 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone)]
pub enum StoreConfig {
    Memory,
    Supabase { url: String, service_role_key: String },
}

#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    pub jwt_secret: Option<String>,
    /// token -> user id, for local development.
    pub static_tokens: HashMap<String, String>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup (the environment in production).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let provider = match get("AI_PROVIDER") {
            Some(name) => AiProviderKind::from_name(&name)
                .with_context(|| format!("Unknown AI_PROVIDER: {}", name))?,
            None => AiProviderKind::OpenRouter,
        };
        let key_var = match provider {
            AiProviderKind::OpenRouter => "OPENROUTER_API_KEY",
            AiProviderKind::Gemini => "GEMINI_API_KEY",
        };
        let api_key = get(key_var)
            .with_context(|| format!("{} environment variable not set", key_var))?;

        let retry = RetryPolicy {
            max_retries: parse_or(&get, "AI_MAX_RETRIES", 2)?,
            base_delay_ms: parse_or(&get, "AI_RETRY_BASE_MS", 250)?,
            ..RetryPolicy::default()
        };

        let ai = AiConfig {
            provider,
            api_key,
            model: get("AI_MODEL"),
            base_url: get("AI_BASE_URL"),
            timeout: Duration::from_secs(parse_or(&get, "AI_TIMEOUT_SECS", 55)?),
            retry,
        };

        let defaults = CharBudgets::default();
        let budgets = CharBudgets {
            analysis: parse_or(&get, "ANALYSIS_CHAR_BUDGET", defaults.analysis)?,
            summary: parse_or(&get, "SUMMARY_CHAR_BUDGET", defaults.summary)?,
            quiz: parse_or(&get, "QUIZ_CHAR_BUDGET", defaults.quiz)?,
        };
        if budgets.analysis == 0 || budgets.summary == 0 || budgets.quiz == 0 {
            anyhow::bail!("Character budgets must be greater than zero: {:?}", budgets);
        }

        let fetch_defaults = FetchConfig::default();
        let fetch = FetchConfig {
            timeout: Duration::from_secs(parse_or(
                &get,
                "FETCH_TIMEOUT_SECS",
                fetch_defaults.timeout.as_secs(),
            )?),
            max_bytes: parse_or(&get, "FETCH_MAX_BYTES", fetch_defaults.max_bytes)?,
        };

        let store = match (get("SUPABASE_URL"), get("SUPABASE_SERVICE_ROLE_KEY")) {
            (Some(url), Some(service_role_key)) => StoreConfig::Supabase {
                url: url.trim_end_matches('/').to_string(),
                service_role_key,
            },
            (Some(_), None) => {
                anyhow::bail!("SUPABASE_URL set but SUPABASE_SERVICE_ROLE_KEY is not")
            }
            _ => StoreConfig::Memory,
        };

        let auth = AuthConfig {
            jwt_secret: get("SUPABASE_JWT_SECRET"),
            static_tokens: match get("AUTH_STATIC_TOKENS") {
                Some(raw) => parse_static_tokens(&raw)?,
                None => HashMap::new(),
            },
        };
        if auth.jwt_secret.is_none() && auth.static_tokens.is_empty() {
            anyhow::bail!(
                "No identity provider configured: set SUPABASE_JWT_SECRET or AUTH_STATIC_TOKENS"
            );
        }

        Ok(Self {
            bind_addr: get("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:3000".to_string()),
            ai,
            budgets,
            text_timeout: Duration::from_secs(parse_or(&get, "TEXT_TIMEOUT_SECS", 60)?),
            document_timeout: Duration::from_secs(parse_or(&get, "DOCUMENT_TIMEOUT_SECS", 300)?),
            fetch,
            store,
            auth,
            prompts_path: get("PROMPTS_PATH").map(PathBuf::from),
        })
    }

    /// Prompt templates from `PROMPTS_PATH`, or the built-in defaults.
    pub fn load_prompts(&self) -> Result<Prompts> {
        match &self.prompts_path {
            Some(path) => Prompts::load(path),
            None => Ok(Prompts::default()),
        }
    }
}

fn parse_or<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid value for {}: {:?} ({})", key, raw, e)),
        None => Ok(default),
    }
}

/// Parse `token=user,token2=user2`.
fn parse_static_tokens(raw: &str) -> Result<HashMap<String, String>> {
    raw.split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| -> Result<(String, String)> {
            let (token, user) = pair
                .split_once('=')
                .with_context(|| format!("Malformed AUTH_STATIC_TOKENS entry: {}", pair))?;
            Ok((token.trim().to_string(), user.trim().to_string()))
        })
        .collect()
}

// ============================================================================
// Prompts
// ============================================================================

/// Prompt templates. Each contains [`TEXT_PLACEHOLDER`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prompts {
    pub analysis: String,
    pub summary: String,
    pub quiz: String,
}

impl Prompts {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read prompts: {:?}", path))?;

        let prompts: Prompts = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse prompts: {:?}", path))?;
        prompts.validate()?;

        info!("Loaded prompt templates from {:?}", path);
        Ok(prompts)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, template) in [
            ("analysis", &self.analysis),
            ("summary", &self.summary),
            ("quiz", &self.quiz),
        ] {
            if !template.contains(TEXT_PLACEHOLDER) {
                anyhow::bail!("Prompt '{}' is missing the {} placeholder", name, TEXT_PLACEHOLDER);
            }
        }
        Ok(())
    }
}

impl Default for Prompts {
    fn default() -> Self {
        Self {
            analysis: r#"You are helping a student organise their notes. Read the text below and return ONLY a JSON object with this structure:

{"title": "a title of at most 5 words", "subject": "History|Biology|Mathematics|Physics|General"}

Pick "General" when no other subject fits. Do not add any explanation.

TEXT: "{text}""#
                .to_string(),
            summary: r#"Summarize the following text for a student, clearly and concisely, extracting the key concepts. TEXT: "{text}""#
                .to_string(),
            quiz: r#"Write a multiple-choice quiz for a student based on the text below. Return ONLY a JSON array of exactly 5 objects with this structure:

[{"question": "...", "options": ["...", "...", "...", "..."], "answer": "..."}]

Each question has exactly 4 options and "answer" must be copied exactly from one of them. Do not add any explanation.

TEXT: "{text}""#
                .to_string(),
        }
    }
}
