//! HTTP API.
//!
//! Serves the manual paths next to the background poll scheduler: scheduler
//! control, one-off PDF upload (extract + upsert), and read access to stored
//! orders.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/scheduler/status` | Running flag, interval, last cycle |
//! | `POST` | `/scheduler/start` | Start polling (no-op if running) |
//! | `POST` | `/scheduler/stop` | Stop polling after the current cycle |
//! | `POST` | `/upload-pdf` | PDF (raw body or multipart `file` field) → extracted, stored order |
//! | `GET`  | `/orders` | Filtered, sorted page of orders plus `total` |
//! | `GET`  | `/orders/{id}` | One order with line items (id or PO id) |
//! | `DELETE` | `/orders/{id}` | Delete an order and its line items |
//! | `GET`  | `/filters` | Distinct model ids, colors and sizes |
//! | `GET`  | `/stats` | Aggregate counts |
//!
//! `/orders` accepts `search`, `model_id`, `color`, `size`, `sort_by`
//! (`order_date`, `total_amount`, `item_count`), `sort_order` (`asc`,
//! `desc`), `limit` and `offset`.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "upload is not a PDF: ..." } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `payload_too_large`
//! (413), `extraction_failed` (500), `internal` (500).

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, FromRequest, Multipart, Path, Query, Request, State},
    http::{header::CONTENT_TYPE, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use po_intake_core::models::{PersistedOrder, SourceKind};
use po_intake_core::store::{FilterOptions, OrderQuery, OrderRepository, OrderStats, OrderSummary};

use crate::config::Config;
use crate::extractor::DocumentExtractor;
use crate::fetch::{FetchOutcome, FileFetcher};
use crate::process::{process_document, ProcessError, ProcessOutcome};
use crate::scheduler::{Pipeline, PollScheduler, SchedulerStatus, Transition};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub repository: Arc<dyn OrderRepository>,
    pub extractor: Arc<dyn DocumentExtractor>,
    /// Materializes uploads under the same sniffing rules as mailbox fetches.
    pub fetcher: Arc<FileFetcher>,
    pub scheduler: PollScheduler,
}

/// Builds the router without binding; used by [`run_server`] and tests.
pub fn build_router(state: AppState, max_upload_bytes: u64) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let body_limit = usize::try_from(max_upload_bytes).unwrap_or(usize::MAX);

    Router::new()
        .route("/health", get(handle_health))
        .route("/scheduler/status", get(handle_scheduler_status))
        .route("/scheduler/start", post(handle_scheduler_start))
        .route("/scheduler/stop", post(handle_scheduler_stop))
        .route("/upload-pdf", post(handle_upload))
        .route("/orders", get(handle_list_orders))
        .route("/orders/{id}", get(handle_get_order).delete(handle_delete_order))
        .route("/filters", get(handle_filters))
        .route("/stats", get(handle_stats))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .with_state(state)
}

/// Starts the HTTP server and, if `[scheduler] autostart` is set, the poll
/// scheduler. Runs until Ctrl-C, then stops the scheduler and closes the
/// mailbox.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pipeline = Pipeline::build(config).await?;
    if config.scheduler.autostart {
        pipeline.scheduler.start();
    }

    let state = AppState {
        repository: pipeline.repository.clone(),
        extractor: pipeline.extractor.clone(),
        fetcher: Arc::new(FileFetcher::new(&config.fetch)?),
        scheduler: pipeline.scheduler.clone(),
    };
    let app = build_router(state, config.fetch.max_bytes);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(bind = %config.server.bind, "server listening");
    println!("po-intake listening on http://{}", config.server.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    pipeline.shutdown().await
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
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

/// A body the extractors refused; oversized bodies keep their 413.
fn rejected(status: StatusCode, message: String) -> AppError {
    let code = if status == StatusCode::PAYLOAD_TOO_LARGE {
        "payload_too_large"
    } else {
        "bad_request"
    };
    AppError {
        status: if code == "bad_request" {
            StatusCode::BAD_REQUEST
        } else {
            status
        },
        code,
        message,
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found",
        message: message.into(),
    }
}

fn internal(err: anyhow::Error) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal",
        message: format!("{:#}", err),
    }
}

impl From<ProcessError> for AppError {
    fn from(err: ProcessError) -> Self {
        let code = match &err {
            ProcessError::Extraction(_) => "extraction_failed",
            ProcessError::Persistence { .. } => "internal",
        };
        AppError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code,
            message: err.to_string(),
        }
    }
}

// ============ Health / scheduler ============

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

#[derive(Serialize)]
struct TransitionResponse {
    result: Transition,
    status: SchedulerStatus,
}

async fn handle_scheduler_status(State(state): State<AppState>) -> Json<SchedulerStatus> {
    Json(state.scheduler.status())
}

async fn handle_scheduler_start(State(state): State<AppState>) -> Json<TransitionResponse> {
    let result = state.scheduler.start();
    Json(TransitionResponse {
        result,
        status: state.scheduler.status(),
    })
}

async fn handle_scheduler_stop(State(state): State<AppState>) -> Json<TransitionResponse> {
    let result = state.scheduler.stop();
    Json(TransitionResponse {
        result,
        status: state.scheduler.status(),
    })
}

// ============ POST /upload-pdf ============

#[derive(Deserialize)]
struct UploadParams {
    filename: Option<String>,
}

/// Field carrying the document in a `multipart/form-data` upload.
const UPLOAD_FIELD: &str = "file";

/// An uploaded document before sniffing.
struct Upload {
    filename: Option<String>,
    declared: String,
    bytes: Bytes,
}

/// Reads either a raw body or the `file` field of a multipart form.
async fn read_upload(state: &AppState, request: Request) -> Result<Upload, AppError> {
    let content_type = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_ascii_lowercase();

    if !content_type.starts_with("multipart/form-data") {
        let bytes = Bytes::from_request(request, state)
            .await
            .map_err(|e| rejected(e.status(), e.body_text()))?;
        return Ok(Upload {
            filename: None,
            declared: content_type,
            bytes,
        });
    }

    let mut form = Multipart::from_request(request, state)
        .await
        .map_err(|e| rejected(e.status(), e.body_text()))?;
    while let Some(field) = form
        .next_field()
        .await
        .map_err(|e| rejected(e.status(), e.body_text()))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let filename = field.file_name().map(str::to_string);
        let declared = field
            .content_type()
            .unwrap_or("")
            .to_ascii_lowercase();
        let bytes = field.bytes().await.map_err(|e| rejected(e.status(), e.body_text()))?;
        return Ok(Upload {
            filename,
            declared,
            bytes,
        });
    }
    Err(bad_request(format!(
        "multipart upload has no '{}' field",
        UPLOAD_FIELD
    )))
}

/// Sniffs the uploaded bytes, stores them in the download directory, then
/// runs extract + upsert on them.
async fn handle_upload(
    State(state): State<AppState>,
    Query(params): Query<UploadParams>,
    request: Request,
) -> Result<Json<ProcessOutcome>, AppError> {
    let upload = read_upload(&state, request).await?;
    let filename = params
        .filename
        .or(upload.filename)
        .unwrap_or_else(|| "upload.pdf".to_string());

    let document = match state.fetcher.materialize(
        SourceKind::Attachment,
        "upload",
        &filename,
        &upload.declared,
        &upload.bytes,
    )
    .await
    {
        FetchOutcome::Accepted(document) => document,
        FetchOutcome::Skipped { reason, .. } => {
            warn!(%filename, %reason, "upload rejected");
            return Err(bad_request(format!(
                "upload is not a {}: {}",
                state.fetcher.kind(),
                reason
            )));
        }
    };

    let outcome = process_document(
        state.extractor.as_ref(),
        state.repository.as_ref(),
        &document.path,
    )
    .await?;
    Ok(Json(outcome))
}

// ============ Orders ============

#[derive(Serialize)]
struct OrderListResponse {
    orders: Vec<OrderSummary>,
    total: i64,
    limit: i64,
    offset: i64,
}

async fn handle_list_orders(
    State(state): State<AppState>,
    Query(query): Query<OrderQuery>,
) -> Result<Json<OrderListResponse>, AppError> {
    let page = state.repository.list_orders(&query).await.map_err(internal)?;
    Ok(Json(OrderListResponse {
        orders: page.orders,
        total: page.total,
        limit: query.limit,
        offset: query.offset,
    }))
}

async fn handle_filters(State(state): State<AppState>) -> Result<Json<FilterOptions>, AppError> {
    Ok(Json(state.repository.distinct_filters().await.map_err(internal)?))
}

async fn handle_get_order(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<PersistedOrder>, AppError> {
    match state.repository.get_order(&id).await.map_err(internal)? {
        Some(order) => Ok(Json(order)),
        None => Err(not_found(format!("order not found: {}", id))),
    }
}

#[derive(Serialize)]
struct DeleteResponse {
    deleted: bool,
}

async fn handle_delete_order(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeleteResponse>, AppError> {
    if state.repository.delete_order(&id).await.map_err(internal)? {
        Ok(Json(DeleteResponse { deleted: true }))
    } else {
        Err(not_found(format!("order not found: {}", id)))
    }
}

async fn handle_stats(State(state): State<AppState>) -> Result<Json<OrderStats>, AppError> {
    Ok(Json(state.repository.stats().await.map_err(internal)?))
}
