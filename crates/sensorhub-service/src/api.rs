//! REST API endpoints for the sensorhub-service.
//!
//! Each configured stream gets an upload route and a JSON query route:
//!
//! - `POST /{stream}/data` - multipart upload, file in field `file`
//! - `GET /{stream}/data/json` - all stored rows as JSON objects
//! - `GET /api/health` - service health check
//! - `GET /api/streams` - configured streams and their store files
//!
//! ## Blocking work
//!
//! The store is synchronous. Ingestion, retrieval and every write of an upload
//! body to its temporary file run on tokio's blocking pool; the request task
//! only pulls multipart chunks off the connection.
//!
//! ## Error Handling
//!
//! All endpoints return structured JSON errors via [`AppError`]. Client errors
//! (unknown stream, missing upload, header mismatch) map to 4xx codes; I/O and
//! conversion failures return HTTP 500.
//!
//! # Example
//!
//! ```ignore
//! use sensorhub_service::api;
//!
//! let app = api::app(state);
//! ```

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{
        DefaultBodyLimit, Multipart, Path, State,
        multipart::{Field, MultipartError, MultipartRejection},
    },
    http::{HeaderName, HeaderValue, Method, StatusCode},
    response::IntoResponse,
    routing::{get, post},
};
use sensorhub_store::{IngestReport, Record, StreamInfo, UploadBatch};
use serde::Serialize;
use time::OffsetDateTime;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::state::AppState;

/// Multipart field carrying the uploaded CSV file.
pub const UPLOAD_FIELD: &str = "file";

/// Response header carrying the number of rows skipped during conversion.
pub const SKIPPED_ROWS_HEADER: &str = "x-skipped-rows";

/// Body returned for a successful upload.
pub const UPLOAD_OK: &str = "File uploaded and appended successfully.";

/// Create the API router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        // Health and status
        .route("/api/health", get(health))
        .route("/api/streams", get(list_streams))
        // Stream endpoints
        .route("/{stream}/data", post(upload_data))
        .route("/{stream}/data/json", get(get_records))
}

/// Build the full application: routes, body limit, request tracing and CORS.
pub fn app(state: Arc<AppState>) -> Router {
    let server = &state.config.server;
    Router::new()
        .merge(router())
        .layer(DefaultBodyLimit::max(server.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(server))
        .with_state(state)
}

/// CORS policy for the configured origins. No origins means any origin.
pub fn cors_layer(server: &ServerConfig) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any)
        .expose_headers([HeaderName::from_static(SKIPPED_ROWS_HEADER)]);

    if server.cors_origins.is_empty() {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = server
        .cors_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Ignoring CORS origin {:?}: {}", origin, e);
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

/// Health check endpoint.
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: OffsetDateTime::now_utc(),
    })
}

/// List the configured streams with the size of their store files.
async fn list_streams(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<StreamInfo>>, AppError> {
    let store = Arc::clone(&state.store);
    let streams = tokio::task::spawn_blocking(move || store.describe()).await??;
    Ok(Json(streams))
}

/// Accept a CSV batch for a stream and append it to the stream's store.
///
/// The first file part named `file` is spooled to a temporary file; other
/// parts, including a plain text field named `file`, are ignored. The
/// temporary file is removed once ingestion finishes, or as soon as the
/// request fails.
async fn upload_data(
    State(state): State<Arc<AppState>>,
    Path(stream): Path<String>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<&'static str, AppError> {
    // Reject unknown streams before touching the body
    state.store.store_path(&stream)?;

    let mut multipart = match multipart {
        Ok(multipart) => multipart,
        Err(rejection) => {
            debug!("Upload to {} is not multipart: {}", stream, rejection);
            return Err(sensorhub_store::Error::MissingUpload.into());
        }
    };

    let mut batch = None;
    while let Some(field) = multipart.next_field().await? {
        if batch.is_some() || field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        match field.file_name().map(str::to_string) {
            Some(name) => batch = Some(spool_field(&state, name, field).await?),
            None => debug!("Ignoring non-file part named {} for {}", UPLOAD_FIELD, stream),
        }
    }

    let store = Arc::clone(&state.store);
    let report: IngestReport =
        tokio::task::spawn_blocking(move || store.ingest(&stream, batch)).await??;

    info!(
        "Upload for {}: {} rows, {} bytes{}",
        report.stream,
        report.rows_appended,
        report.bytes_written,
        if report.created { " (new store)" } else { "" }
    );
    Ok(UPLOAD_OK)
}

/// Write a multipart field chunk by chunk into a fresh upload batch.
///
/// File I/O happens on the blocking pool. The batch moves into each blocking
/// task and back, so a failed write drops (and removes) it there.
async fn spool_field(
    state: &AppState,
    name: String,
    mut field: Field<'_>,
) -> Result<UploadBatch, AppError> {
    let dir = state.upload_dir().to_path_buf();
    let mut batch =
        tokio::task::spawn_blocking(move || UploadBatch::create_in(&dir, Some(name))).await??;
    while let Some(chunk) = field.chunk().await? {
        batch = tokio::task::spawn_blocking(move || batch.write_chunk(&chunk).map(|()| batch))
            .await??;
    }
    debug!(
        "Spooled {} bytes from {:?} to {}",
        batch.len(),
        batch.name(),
        batch.path().display()
    );
    Ok(batch)
}

/// Return every stored row of a stream as a JSON object keyed by header.
async fn get_records(
    State(state): State<Arc<AppState>>,
    Path(stream): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let store = Arc::clone(&state.store);
    let (records, skipped) = tokio::task::spawn_blocking(move || {
        let mut records = store.retrieve(&stream)?;
        let rows = records
            .by_ref()
            .collect::<sensorhub_store::Result<Vec<Record>>>()?;
        Ok::<_, sensorhub_store::Error>((rows, records.skipped()))
    })
    .await??;

    Ok(([(SKIPPED_ROWS_HEADER, skipped.to_string())], Json(records)))
}

/// API error type.
#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    PayloadTooLarge(String),
    Store(sensorhub_store::Error),
    Internal(String),
}

impl From<sensorhub_store::Error> for AppError {
    fn from(e: sensorhub_store::Error) -> Self {
        use sensorhub_store::Error;

        match e {
            Error::UnknownStream(_) => AppError::NotFound(e.to_string()),
            Error::StoreNotFound(_) => AppError::NotFound("CSV file not found.".to_string()),
            Error::MissingUpload => AppError::BadRequest("No file uploaded.".to_string()),
            Error::EmptyUpload => AppError::BadRequest(e.to_string()),
            Error::SchemaMismatch { .. } => AppError::Conflict(e.to_string()),
            other => AppError::Store(other),
        }
    }
}

impl From<MultipartError> for AppError {
    fn from(e: MultipartError) -> Self {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            AppError::PayloadTooLarge(e.body_text())
        } else {
            AppError::BadRequest(e.body_text())
        }
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(e: tokio::task::JoinError) -> Self {
        AppError::Internal(format!("Store task failed: {}", e))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::PayloadTooLarge(msg) => (StatusCode::PAYLOAD_TOO_LARGE, msg),
            AppError::Store(e) => {
                error!("Store operation failed: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
            AppError::Internal(msg) => {
                error!("{}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, Json(body)).into_response()
    }
}
