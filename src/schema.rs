//! Note data model and request/response records.
//!
//! [`Quiz`] can only be built through [`Quiz::new`], which enforces the shape
//! invariants, so an invalid quiz never reaches a caller.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::NoteError;

/// Collection that persisted notes are written to.
pub const NOTES_COLLECTION: &str = "notes";

/// Number of items in every quiz.
pub const QUIZ_LEN: usize = 5;

/// Number of options in every quiz item.
pub const OPTIONS_PER_ITEM: usize = 4;

/// Maximum number of words kept in a note title.
pub const MAX_TITLE_WORDS: usize = 5;

// ============================================================================
// Analysis
// ============================================================================

/// Subject classification for a note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Subject {
    History,
    Biology,
    Mathematics,
    Physics,
    General,
}

impl Subject {
    pub const ALL: [Subject; 5] = [
        Subject::History,
        Subject::Biology,
        Subject::Mathematics,
        Subject::Physics,
        Subject::General,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::History => "History",
            Self::Biology => "Biology",
            Self::Mathematics => "Mathematics",
            Self::Physics => "Physics",
            Self::General => "General",
        }
    }

    /// Case-insensitive lookup of a subject label.
    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.trim();
        Self::ALL
            .into_iter()
            .find(|s| s.as_str().eq_ignore_ascii_case(label))
    }
}

impl std::fmt::Display for Subject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Title and subject derived from a piece of study material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnalysisResult {
    pub title: String,
    pub subject: Subject,
}

impl AnalysisResult {
    pub const FALLBACK_TITLE: &'static str = "Untitled note";

    /// Build a result, cutting the title down to [`MAX_TITLE_WORDS`] words.
    /// A blank title becomes the placeholder.
    pub fn new(title: &str, subject: Subject) -> Self {
        let words: Vec<&str> = title.split_whitespace().take(MAX_TITLE_WORDS).collect();
        let title = if words.is_empty() {
            Self::FALLBACK_TITLE.to_string()
        } else {
            words.join(" ")
        };
        Self { title, subject }
    }

    pub fn fallback() -> Self {
        Self {
            title: Self::FALLBACK_TITLE.to_string(),
            subject: Subject::General,
        }
    }

    pub fn is_fallback(&self) -> bool {
        *self == Self::fallback()
    }
}

/// Free-text summary produced by the summary prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SummaryResult {
    pub summary: String,
}

// ============================================================================
// Quiz
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizItem {
    pub question: String,
    pub options: Vec<String>,
    pub answer: String,
}

/// Reasons a quiz is rejected.
#[derive(Debug, Error)]
pub enum QuizFormatError {
    #[error("quiz is not valid JSON: {0}")]
    Malformed(String),
    #[error("expected {QUIZ_LEN} quiz items, found {0}")]
    WrongItemCount(usize),
    #[error("item {index} has {found} options, expected {OPTIONS_PER_ITEM}")]
    WrongOptionCount { index: usize, found: usize },
    #[error("item {index} answer is not one of its options")]
    AnswerNotInOptions { index: usize },
    #[error("item {index} has an empty question")]
    EmptyQuestion { index: usize },
}

/// Exactly [`QUIZ_LEN`] validated items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Quiz {
    items: Vec<QuizItem>,
}

impl Quiz {
    pub fn new(items: Vec<QuizItem>) -> Result<Self, QuizFormatError> {
        if items.len() != QUIZ_LEN {
            return Err(QuizFormatError::WrongItemCount(items.len()));
        }

        for (index, item) in items.iter().enumerate() {
            if item.question.trim().is_empty() {
                return Err(QuizFormatError::EmptyQuestion { index });
            }
            if item.options.len() != OPTIONS_PER_ITEM {
                return Err(QuizFormatError::WrongOptionCount {
                    index,
                    found: item.options.len(),
                });
            }
            // Byte-identical match, no trimming or case folding.
            if !item.options.iter().any(|o| *o == item.answer) {
                return Err(QuizFormatError::AnswerNotInOptions { index });
            }
        }

        Ok(Self { items })
    }

    pub fn items(&self) -> &[QuizItem] {
        &self.items
    }
}

// ============================================================================
// Note
// ============================================================================

/// A note as written by the ingestion pipeline. The store adds `createdAt`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewNote {
    pub title: String,
    pub subject: Subject,
    pub content: String,
    pub summary: String,
    pub user_id: String,
    pub pdf_url: String,
    pub original_file_name: String,
}

impl NewNote {
    pub const CREATED_AT_FIELD: &'static str = "createdAt";
}

// ============================================================================
// Endpoint records
// ============================================================================

/// Body of the text-based endpoints (`summarize`, `analyze`, `generateQuiz`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TextRequest {
    #[serde(default)]
    pub text: Option<String>,
}

impl TextRequest {
    /// The `text` field, required to be a non-empty string.
    pub fn into_text(self) -> Result<String, NoteError> {
        match self.text {
            Some(text) if !text.trim().is_empty() => Ok(text),
            _ => Err(NoteError::ValidationFailed(
                "'text' must be a non-empty string".to_string(),
            )),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProcessDocumentRequest {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default, rename = "fileName")]
    pub file_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SummarizeResponse {
    pub summary: String,
}

#[derive(Debug, Serialize)]
pub struct QuizResponse {
    pub quiz: Quiz,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessDocumentResponse {
    pub success: bool,
    pub note_id: String,
}
