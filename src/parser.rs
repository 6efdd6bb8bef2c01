//! Parsing of free-form model output into typed records.
//!
//! Both parsers first remove a code-fence wrapper with [`strip_fence`], then
//! parse the remainder as strict JSON. Nothing else is repaired: a reply that
//! is not valid JSON after de-fencing is a parse failure.
//!
//! Analysis failures fall back to a fixed default and never propagate:
//!
//! | condition                               | result                          |
//! |-----------------------------------------|---------------------------------|
//! | not a JSON object, or wrong field types | `{"Untitled note", General}`    |
//! | `title` missing or blank                | `{"Untitled note", General}`    |
//! | `subject` missing or blank              | `{"Untitled note", General}`    |
//! | `subject` not a known label             | title kept, `General`           |
//! | `title` longer than five words          | first five words, subject kept  |
//!
//! Quiz failures are returned as [`QuizFormatError`], since there is no
//! meaningful default quiz.

use regex::Regex;
use serde::de::IgnoredAny;
use serde::Deserialize;
use std::sync::OnceLock;
use thiserror::Error;
use tracing::{debug, warn};

use crate::schema::{AnalysisResult, Quiz, QuizFormatError, QuizItem, Subject};

/// First opening fence that starts a line (with optional language tag)
/// through the last closing fence that ends a line.
fn fence_regex() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    FENCE.get_or_init(|| {
        Regex::new(concat!(
            r"(?s)(?:\A|\n)[ \t]*```[A-Za-z0-9_+\-]*[ \t]*\r?\n?",
            r"(.*)```[ \t]*(?:\r?\n|\z)",
        ))
        .expect("fence pattern is valid")
    })
}

/// Remove a code-fence wrapper from a model reply.
///
/// Text that already parses as JSON is returned trimmed and untouched, so
/// backticks inside JSON strings are never treated as fences. Otherwise
/// prose before the opening fence or after the closing fence is dropped.
/// Text without a complete fence pair is returned trimmed.
pub fn strip_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    if serde_json::from_str::<IgnoredAny>(trimmed).is_ok() {
        return trimmed;
    }
    match fence_regex().captures(trimmed).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str().trim(),
        None => trimmed,
    }
}

/// Why an analysis reply could not be used as-is.
#[derive(Debug, Error)]
pub enum AnalysisParseError {
    #[error("reply is not a JSON object with string fields: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("title is missing or blank")]
    MissingTitle,
    #[error("subject is missing or blank")]
    MissingSubject,
}

#[derive(Debug, Deserialize)]
struct RawAnalysis {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    subject: Option<String>,
}

/// Strict form of [`parse_analysis`].
pub fn try_parse_analysis(raw: &str) -> Result<AnalysisResult, AnalysisParseError> {
    let parsed: RawAnalysis = serde_json::from_str(strip_fence(raw))?;

    let title = parsed
        .title
        .filter(|t| !t.trim().is_empty())
        .ok_or(AnalysisParseError::MissingTitle)?;
    let subject_label = parsed
        .subject
        .filter(|s| !s.trim().is_empty())
        .ok_or(AnalysisParseError::MissingSubject)?;

    let subject = Subject::from_label(&subject_label).unwrap_or_else(|| {
        debug!("Unknown subject label {:?}, using General", subject_label);
        Subject::General
    });

    Ok(AnalysisResult::new(&title, subject))
}

/// Parse an analysis reply, falling back to [`AnalysisResult::fallback`].
pub fn parse_analysis(raw: &str) -> AnalysisResult {
    try_parse_analysis(raw).unwrap_or_else(|e| {
        warn!(
            "Analysis reply unusable ({}), using fallback: {}",
            e,
            preview(raw)
        );
        AnalysisResult::fallback()
    })
}

/// Parse a quiz reply. The result satisfies every [`Quiz`] invariant.
pub fn parse_quiz(raw: &str) -> Result<Quiz, QuizFormatError> {
    let items: Vec<QuizItem> = serde_json::from_str(strip_fence(raw)).map_err(|e| {
        debug!("Quiz reply is not valid JSON: {}", preview(raw));
        QuizFormatError::Malformed(e.to_string())
    })?;
    Quiz::new(items)
}

fn preview(raw: &str) -> String {
    raw.chars().take(200).collect()
}
