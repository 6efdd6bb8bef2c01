//! Note ingestion pipeline: fetch, extract, analyze and summarize, persist.
//!
//! ```text
//! Start -> Fetched -> Extracted -> Analyzed + Summarized -> Persisted
//!    \________\___________\_______________\________________-> Failed
//! ```
//!
//! The analysis and summary calls share no data and run concurrently; the
//! first failure drops the other call. Nothing is written unless every
//! earlier stage succeeded, and the whole run is bounded by one deadline.

use reqwest::Url;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info};

use crate::auth::CallerIdentity;
use crate::error::{with_timeout, NoteError};
use crate::fetcher::{self, CancelFlag, DocumentFetcher, FetchError};
use crate::schema::{NewNote, ProcessDocumentRequest, ProcessDocumentResponse};
use crate::store::{self, DocumentStore};
use crate::study::StudyAssistant;

const DEFAULT_FILE_NAME: &str = "document.pdf";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Start,
    Fetched,
    Extracted,
    Analyzed,
    Persisted,
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Start => "start",
            Self::Fetched => "fetched",
            Self::Extracted => "extracted",
            Self::Analyzed => "analyzed+summarized",
            Self::Persisted => "persisted",
        };
        f.write_str(name)
    }
}

/// A validated pipeline request.
#[derive(Debug, Clone)]
pub struct DocumentJob {
    pub url: Url,
    pub file_name: String,
}

impl DocumentJob {
    pub fn from_request(request: ProcessDocumentRequest) -> Result<Self, NoteError> {
        let raw_url = request
            .url
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty())
            .ok_or_else(|| {
                NoteError::ValidationFailed("'url' must be a non-empty string".to_string())
            })?;

        let url = Url::parse(&raw_url)
            .map_err(|e| NoteError::ValidationFailed(format!("'url' is not a valid URL: {}", e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(NoteError::ValidationFailed(
                "'url' must use http or https".to_string(),
            ));
        }

        let file_name = request
            .file_name
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty())
            .or_else(|| file_name_from_url(&url))
            .unwrap_or_else(|| DEFAULT_FILE_NAME.to_string());

        Ok(Self { url, file_name })
    }
}

fn file_name_from_url(url: &Url) -> Option<String> {
    url.path_segments()?
        .next_back()
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
}

/// Pipeline orchestrator.
pub struct NoteIngestionPipeline {
    fetcher: Arc<dyn DocumentFetcher>,
    assistant: StudyAssistant,
    store: Arc<dyn DocumentStore>,
    timeout: Duration,
}

impl NoteIngestionPipeline {
    pub fn new(
        fetcher: Arc<dyn DocumentFetcher>,
        assistant: StudyAssistant,
        store: Arc<dyn DocumentStore>,
        timeout: Duration,
    ) -> Self {
        Self {
            fetcher,
            assistant,
            store,
            timeout,
        }
    }

    /// Run one invocation for `caller`.
    pub async fn run(
        &self,
        caller: Option<&CallerIdentity>,
        request: ProcessDocumentRequest,
    ) -> Result<ProcessDocumentResponse, NoteError> {
        let caller = caller.ok_or(NoteError::AuthFailed)?;
        let job = DocumentJob::from_request(request)?;

        let started = Instant::now();
        let result = with_timeout(self.timeout, self.execute(caller, &job)).await;

        match &result {
            Ok(response) => info!(
                "Pipeline for {} finished in {:?}: note {}",
                job.url,
                started.elapsed(),
                response.note_id
            ),
            Err(e) => error!(
                "Pipeline for {} failed after {:?} [{}]: {}",
                job.url,
                started.elapsed(),
                e.kind(),
                e
            ),
        }
        result
    }

    async fn execute(
        &self,
        caller: &CallerIdentity,
        job: &DocumentJob,
    ) -> Result<ProcessDocumentResponse, NoteError> {
        info!(
            "Stage {}: {} ({}) for user {}",
            PipelineStage::Start,
            job.url,
            job.file_name,
            caller.user_id
        );

        let data = self.fetcher.fetch(&job.url).await?;
        info!("Stage {}: {} bytes", PipelineStage::Fetched, data.len());

        // PDF parsing is CPU-bound; keep it off the async workers. The task
        // cannot be aborted, so dropping this run flags it to stop at the next
        // page.
        let cancel = CancelFlag::default();
        let _cancel_on_drop = cancel.cancel_on_drop();
        let content =
            tokio::task::spawn_blocking(move || fetcher::extract_text_cancellable(&data, &cancel))
                .await
                .map_err(|e| {
                    FetchError::ExtractionFailed(format!("extraction task failed: {}", e))
                })??;
        info!(
            "Stage {}: {} chars",
            PipelineStage::Extracted,
            content.chars().count()
        );

        let (analysis, summary) = tokio::try_join!(
            self.assistant.analyze(&content),
            self.assistant.summarize(&content),
        )?;
        info!(
            "Stage {}: title={:?}, subject={}",
            PipelineStage::Analyzed,
            analysis.title,
            analysis.subject
        );

        let note = NewNote {
            title: analysis.title,
            subject: analysis.subject,
            content,
            summary: summary.summary,
            user_id: caller.user_id.clone(),
            pdf_url: job.url.to_string(),
            original_file_name: job.file_name.clone(),
        };
        let note_id = store::create_note(self.store.as_ref(), &note).await?;
        info!(
            "Stage {}: note {} in {}",
            PipelineStage::Persisted,
            note_id,
            self.store.name()
        );

        Ok(ProcessDocumentResponse {
            success: true,
            note_id,
        })
    }
}
