//! SmartNote backend - turns study material into titled, classified,
//! summarized notes and quizzes using a generative model.

mod auth;
mod config;
mod error;
mod fetcher;
mod gemini;
mod llm;
#[cfg(test)]
mod mock;
mod openrouter;
mod parser;
mod pipeline;
mod schema;
mod store;
mod study;
mod supabase;

use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, FromRef, State},
    response::Json,
    routing::{get, post},
    Router,
};
use auth::{
    Caller, CallerIdentity, ChainedIdentity, IdentityProvider, JwtIdentityProvider,
    StaticTokenIdentity,
};
use config::{AppConfig, StoreConfig};
use error::{with_timeout, ApiError, NoteError};
use fetcher::HttpDocumentFetcher;
use pipeline::NoteIngestionPipeline;
use schema::{
    AnalysisResult, ProcessDocumentRequest, ProcessDocumentResponse, QuizResponse,
    SummarizeResponse, TextRequest,
};
use std::sync::Arc;
use std::time::Duration;
use store::{DocumentStore, MemoryDocumentStore};
use study::StudyAssistant;
use supabase::SupabaseStore;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    assistant: StudyAssistant,
    pipeline: Arc<NoteIngestionPipeline>,
    identity: Arc<dyn IdentityProvider>,
    text_timeout: Duration,
}

impl FromRef<AppState> for Arc<dyn IdentityProvider> {
    fn from_ref(state: &AppState) -> Self {
        state.identity.clone()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "smartnote_backend=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env()?;
    let prompts = config.load_prompts()?;

    // One connection pool for every outbound call.
    let http = reqwest::Client::builder()
        .user_agent(concat!("smartnote-backend/", env!("CARGO_PKG_VERSION")))
        .build()?;

    let generator = llm::build_generator(&config.ai, http.clone())?;
    let assistant = StudyAssistant::new(generator, prompts, config.budgets);

    let store: Arc<dyn DocumentStore> = match &config.store {
        StoreConfig::Supabase {
            url,
            service_role_key,
        } => Arc::new(SupabaseStore::new(http.clone(), url, service_role_key)),
        StoreConfig::Memory => {
            warn!("SUPABASE_URL not set: notes are kept in memory only");
            Arc::new(MemoryDocumentStore::new())
        }
    };
    info!("Note store: {}", store.name());

    let pipeline = NoteIngestionPipeline::new(
        Arc::new(HttpDocumentFetcher::new(http.clone(), &config.fetch)),
        assistant.clone(),
        store,
        config.document_timeout,
    );

    let state = AppState {
        assistant,
        pipeline: Arc::new(pipeline),
        identity: build_identity(&config),
        text_timeout: config.text_timeout,
    };

    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!("Server listening on http://{}", config.bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

fn build_identity(config: &AppConfig) -> Arc<dyn IdentityProvider> {
    let mut providers: Vec<Arc<dyn IdentityProvider>> = Vec::new();
    if let Some(secret) = &config.auth.jwt_secret {
        providers.push(Arc::new(JwtIdentityProvider::new(secret)));
    }
    if !config.auth.static_tokens.is_empty() {
        warn!(
            "Static development tokens enabled for {} user(s)",
            config.auth.static_tokens.len()
        );
        providers.push(Arc::new(StaticTokenIdentity::new(
            config.auth.static_tokens.clone(),
        )));
    }
    Arc::new(ChainedIdentity::new(providers))
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/summarize", post(summarize))
        .route("/analyze", post(analyze))
        .route("/processDocumentFromUrl", post(process_document_from_url))
        .route("/generateQuiz", post(generate_quiz))
        .layer(DefaultBodyLimit::max(10 * 1024 * 1024)) // 10MB
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint.
async fn health() -> &'static str {
    "ok"
}

/// Authenticate first, then validate the body.
fn read_body<T>(
    caller: Caller,
    payload: Result<Json<T>, JsonRejection>,
) -> Result<(CallerIdentity, T), NoteError> {
    let caller = caller.require()?;
    let Json(body) = payload.map_err(|e| NoteError::ValidationFailed(e.body_text()))?;
    Ok((caller, body))
}

async fn summarize(
    State(state): State<AppState>,
    caller: Caller,
    payload: Result<Json<TextRequest>, JsonRejection>,
) -> Result<Json<SummarizeResponse>, ApiError> {
    let (caller, body) = read_body(caller, payload)?;
    let text = body.into_text()?;
    info!("summarize: {} chars for user {}", text.chars().count(), caller.user_id);

    let result = with_timeout(state.text_timeout, state.assistant.summarize(&text)).await?;
    Ok(Json(SummarizeResponse {
        summary: result.summary,
    }))
}

async fn analyze(
    State(state): State<AppState>,
    caller: Caller,
    payload: Result<Json<TextRequest>, JsonRejection>,
) -> Result<Json<AnalysisResult>, ApiError> {
    let (caller, body) = read_body(caller, payload)?;
    let text = body.into_text()?;
    info!("analyze: {} chars for user {}", text.chars().count(), caller.user_id);

    let result = with_timeout(state.text_timeout, state.assistant.analyze(&text)).await?;
    Ok(Json(result))
}

async fn generate_quiz(
    State(state): State<AppState>,
    caller: Caller,
    payload: Result<Json<TextRequest>, JsonRejection>,
) -> Result<Json<QuizResponse>, ApiError> {
    let (caller, body) = read_body(caller, payload)?;
    let text = body.into_text()?;
    info!("generateQuiz: {} chars for user {}", text.chars().count(), caller.user_id);

    let quiz = with_timeout(state.text_timeout, state.assistant.generate_quiz(&text)).await?;
    Ok(Json(QuizResponse { quiz }))
}

async fn process_document_from_url(
    State(state): State<AppState>,
    caller: Caller,
    payload: Result<Json<ProcessDocumentRequest>, JsonRejection>,
) -> Result<Json<ProcessDocumentResponse>, ApiError> {
    let (caller, body) = read_body(caller, payload)?;
    let response = state.pipeline.run(Some(&caller), body).await?;
    Ok(Json(response))
}
