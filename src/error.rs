//! Error taxonomy and the mapping onto caller-visible codes.

use std::future::Future;
use std::time::Duration;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

use crate::fetcher::FetchError;
use crate::llm::AiError;
use crate::schema::QuizFormatError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum NoteError {
    #[error("caller is not authenticated")]
    AuthFailed,

    #[error("invalid argument: {0}")]
    ValidationFailed(String),

    #[error(transparent)]
    Ai(#[from] AiError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("invalid quiz format: {0}")]
    InvalidQuizFormat(#[from] QuizFormatError),

    #[error("failed to persist note: {0}")]
    Persistence(#[from] StoreError),

    #[error("invocation timed out after {0:?}")]
    Timeout(Duration),
}

impl NoteError {
    /// Stable label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AuthFailed => "auth_failed",
            Self::ValidationFailed(_) => "validation_failed",
            Self::Ai(AiError::Unavailable(_)) => "upstream_unavailable",
            Self::Ai(_) => "upstream_rejected",
            Self::Fetch(FetchError::FetchFailed(_)) => "fetch_failed",
            Self::Fetch(FetchError::ExtractionFailed(_)) => "extraction_failed",
            Self::InvalidQuizFormat(_) => "invalid_quiz_format",
            Self::Persistence(_) => "persistence_failed",
            Self::Timeout(_) => "timeout",
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::AuthFailed => ErrorCode::Unauthenticated,
            Self::ValidationFailed(_) => ErrorCode::InvalidArgument,
            _ => ErrorCode::Internal,
        }
    }
}

/// Error codes surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCode {
    Unauthenticated,
    InvalidArgument,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::InvalidArgument => "invalid-argument",
            Self::Internal => "internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::InvalidArgument => StatusCode::BAD_REQUEST,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Run `fut` under an overall deadline. Dropping the future on expiry
/// cancels whatever it still had in flight.
pub async fn with_timeout<T, F>(limit: Duration, fut: F) -> Result<T, NoteError>
where
    F: Future<Output = Result<T, NoteError>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| NoteError::Timeout(limit))?
}

// ============================================================================
// HTTP boundary
// ============================================================================

/// Endpoint-layer error. Only the code and a caller-safe message leave the
/// process; the internal kind is logged.
#[derive(Debug)]
pub struct ApiError(pub NoteError);

impl From<NoteError> for ApiError {
    fn from(err: NoteError) -> Self {
        Self(err)
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Serialize)]
struct ErrorDetail {
    code: ErrorCode,
    message: String,
}

impl ApiError {
    fn message(&self) -> String {
        match &self.0 {
            NoteError::AuthFailed => {
                "The function must be called by an authenticated user.".to_string()
            }
            NoteError::ValidationFailed(reason) => reason.clone(),
            NoteError::InvalidQuizFormat(_) => {
                "The generated quiz was malformed. Please try again.".to_string()
            }
            NoteError::Timeout(_) => "The request took too long to complete.".to_string(),
            _ => "Internal error while processing the request.".to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.0.code();
        match code {
            ErrorCode::Internal => error!("Request failed [{}]: {}", self.0.kind(), self.0),
            _ => warn!(
                "Request rejected with {} [{}]: {}",
                code.as_str(),
                self.0.kind(),
                self.0
            ),
        }

        let body = ErrorBody {
            error: ErrorDetail {
                code,
                message: self.message(),
            },
        };

        (code.status(), Json(body)).into_response()
    }
}
