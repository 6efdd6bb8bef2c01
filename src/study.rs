//! Prompt rendering and the direct text flows: summarize, analyze, quiz.

use std::sync::Arc;
use tracing::{debug, info};

use crate::config::{CharBudgets, Prompts, TEXT_PLACEHOLDER};
use crate::error::NoteError;
use crate::llm::{truncate_chars, AiError, TextGenerator};
use crate::parser;
use crate::schema::{AnalysisResult, Quiz, SummaryResult};

/// Truncate `text` to `budget` characters, then substitute it into `template`.
pub fn render_prompt(template: &str, text: &str, budget: usize) -> String {
    template.replace(TEXT_PLACEHOLDER, truncate_chars(text, budget))
}

/// Runs each prompt against the configured generator.
#[derive(Clone)]
pub struct StudyAssistant {
    generator: Arc<dyn TextGenerator>,
    prompts: Arc<Prompts>,
    budgets: CharBudgets,
}

impl StudyAssistant {
    pub fn new(generator: Arc<dyn TextGenerator>, prompts: Prompts, budgets: CharBudgets) -> Self {
        Self {
            generator,
            prompts: Arc::new(prompts),
            budgets,
        }
    }

    pub async fn summarize(&self, text: &str) -> Result<SummaryResult, NoteError> {
        let prompt = render_prompt(&self.prompts.summary, text, self.budgets.summary);
        let summary = self.generator.generate(&prompt).await?;

        let summary = summary.trim();
        if summary.is_empty() {
            return Err(AiError::EmptyResponse.into());
        }

        info!("Summary generated ({} chars)", summary.chars().count());
        Ok(SummaryResult {
            summary: summary.to_string(),
        })
    }

    /// Provider failures propagate; an unusable reply falls back.
    pub async fn analyze(&self, text: &str) -> Result<AnalysisResult, NoteError> {
        let prompt = render_prompt(&self.prompts.analysis, text, self.budgets.analysis);
        let raw = self.generator.generate(&prompt).await?;

        let analysis = parser::parse_analysis(&raw);
        debug!(
            "Analysis: title={:?}, subject={}, fallback={}",
            analysis.title,
            analysis.subject,
            analysis.is_fallback()
        );
        Ok(analysis)
    }

    pub async fn generate_quiz(&self, text: &str) -> Result<Quiz, NoteError> {
        let prompt = render_prompt(&self.prompts.quiz, text, self.budgets.quiz);
        let raw = self.generator.generate(&prompt).await?;

        let quiz = parser::parse_quiz(&raw)?;
        info!("Quiz generated ({} items)", quiz.items().len());
        Ok(quiz)
    }
}
