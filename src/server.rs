//! HTTP shell over the two public operations.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/api/health` | Health check (returns version) |
//! | `POST` | `/api/summarize` | Body `{"article_url": "..."}` |
//! | `GET`  | `/api/search` | Query `q`, `source` (`arxiv`\|`hal`\|`both`, default `arxiv`), `max_results` (default 10) |
//!
//! # Error Contract
//!
//! Every failure uses one body shape:
//!
//! ```json
//! { "error": { "code": "unsupported_source", "message": "unsupported source: ..." } }
//! ```
//!
//! | Code | Status |
//! |------|--------|
//! | `bad_request`, `unsupported_source`, `malformed_identifier` | 400 |
//! | `fetch_failed`, `llm_output_malformed` | 502 |
//! | `llm_unavailable`, `search_unavailable` | 503 |
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so browser front-ends
//! can call the API directly.

use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::error::DigestError;
use crate::models::{SearchResponse, SourceSelector, SummarizeResponse};
use crate::service::Digest;

const DEFAULT_MAX_RESULTS: usize = 10;

/// Build the router. Exposed separately from [`run_server`] so tests can
/// serve it on an ephemeral port.
pub fn router(digest: Arc<Digest>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(handle_health))
        .route("/api/summarize", post(handle_summarize))
        .route("/api/search", get(handle_search))
        .layer(cors)
        .with_state(digest)
}

/// Bind to `[server].bind` and serve until the process is terminated or
/// Ctrl-C is received.
pub async fn run_server(digest: Arc<Digest>) -> anyhow::Result<()> {
    let bind_addr = digest.config().server.bind.clone();
    let app = router(digest);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown requested");
        })
        .await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<DigestError> for AppError {
    fn from(err: DigestError) -> Self {
        let status = match &err {
            DigestError::UnsupportedSource { .. }
            | DigestError::MalformedIdentifier { .. }
            | DigestError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            DigestError::FetchFailed { .. } | DigestError::LlmOutputMalformed { .. } => {
                StatusCode::BAD_GATEWAY
            }
            DigestError::LlmUnavailable { .. } | DigestError::SearchUnavailable { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
        };
        AppError {
            status,
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

// ============ GET /api/health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /api/summarize ============

#[derive(Deserialize)]
struct SummarizeRequest {
    article_url: Option<String>,
}

async fn handle_summarize(
    State(digest): State<Arc<Digest>>,
    body: Result<Json<SummarizeRequest>, JsonRejection>,
) -> Result<Json<SummarizeResponse>, AppError> {
    let Json(request) = body.map_err(|e| bad_request(e.body_text()))?;
    let url = request
        .article_url
        .filter(|u| !u.trim().is_empty())
        .ok_or_else(|| bad_request("article_url is required"))?;

    let response = digest.summarize(&url).await?;
    Ok(Json(response))
}

// ============ GET /api/search ============

#[derive(Deserialize)]
struct SearchParams {
    q: Option<String>,
    source: Option<String>,
    max_results: Option<String>,
}

async fn handle_search(
    State(digest): State<Arc<Digest>>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>, AppError> {
    let query = params
        .q
        .filter(|q| !q.trim().is_empty())
        .ok_or_else(|| bad_request("q is required"))?;
    let selector = match params.source.as_deref() {
        None | Some("") => SourceSelector::Arxiv,
        Some(s) => s.parse::<SourceSelector>().map_err(bad_request)?,
    };
    let max_results = match params.max_results.as_deref() {
        None | Some("") => DEFAULT_MAX_RESULTS,
        Some(n) => n.trim().parse::<usize>().map_err(|_| {
            bad_request(format!("max_results must be a positive integer, got '{}'", n))
        })?,
    };

    let response = digest.search(&query, selector, max_results).await?;
    Ok(Json(response))
}
