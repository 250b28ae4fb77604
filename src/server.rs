//! HTTP front end for the watermark remover.
//!
//! `POST /remove-watermark` takes a multipart upload (field `file`), runs the
//! pipeline on the blocking pool and answers with the name of the file written
//! to the upload directory. Errors are reported as `{"detail": "..."}`.

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::multipart::MultipartError;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::engine::WatermarkRemover;
use crate::error::Error;

/// Default upload limit: 10 MiB.
pub const DEFAULT_MAX_UPLOAD_SIZE: usize = 10 * 1024 * 1024;

/// Runtime settings of the HTTP service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Interface to bind.
    pub host: String,
    /// Port to bind.
    pub port: u16,
    /// Enables debug-level logging.
    pub debug: bool,
    /// Directory processed images are written to.
    pub upload_dir: PathBuf,
    /// Largest accepted request body in bytes.
    pub max_upload_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            debug: false,
            upload_dir: PathBuf::from("static/uploads"),
            max_upload_size: DEFAULT_MAX_UPLOAD_SIZE,
        }
    }
}

impl ServerConfig {
    /// `host:port` string suitable for binding.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Shared state handed to every request.
#[derive(Clone)]
pub struct AppState {
    remover: Arc<WatermarkRemover>,
    config: Arc<ServerConfig>,
}

impl AppState {
    /// Bundle a remover and its service configuration.
    #[must_use]
    pub fn new(remover: WatermarkRemover, config: ServerConfig) -> Self {
        Self {
            remover: Arc::new(remover),
            config: Arc::new(config),
        }
    }
}

#[derive(Debug, Serialize)]
struct RemoveResponse {
    filename: String,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    detail: String,
}

/// Error returned by request handlers.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    fn bad_request(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            detail: detail.into(),
        }
    }

    fn internal(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            detail: detail.into(),
        }
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        Self {
            status: err.status(),
            detail: err.body_text(),
        }
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        if err.is_client_error() {
            Self::bad_request(err.to_string())
        } else {
            Self::internal(err.to_string())
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(status = %self.status, detail = %self.detail, "request failed");
        } else {
            warn!(status = %self.status, detail = %self.detail, "request rejected");
        }
        (self.status, Json(ErrorBody { detail: self.detail })).into_response()
    }
}

/// Build the service router.
#[must_use]
pub fn router(state: AppState) -> Router {
    let limit = state.config.max_upload_size;
    Router::new()
        .route("/health", get(health))
        .route("/remove-watermark", post(remove_watermark))
        .layer(DefaultBodyLimit::max(limit))
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
}

async fn health() -> Json<Health> {
    Json(Health { status: "ok" })
}

async fn remove_watermark(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<RemoveResponse>, ApiError> {
    let mut upload = None;
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("file") {
            continue;
        }
        if let Some(content_type) = field.content_type() {
            if !content_type.starts_with("image/") {
                return Err(ApiError::bad_request("File must be an image"));
            }
        }
        let filename = field.file_name().unwrap_or("image").to_string();
        let bytes = field.bytes().await?;
        upload = Some((filename, bytes));
        break;
    }

    let (filename, bytes) =
        upload.ok_or_else(|| ApiError::bad_request("missing multipart field `file`"))?;
    info!(%filename, size = bytes.len(), "removing watermark");

    let remover = Arc::clone(&state.remover);
    let upload_dir = state.config.upload_dir.clone();
    let saved = tokio::task::spawn_blocking(move || {
        remover.process_bytes(&bytes, &filename, &upload_dir)
    })
    .await
    .map_err(|e| ApiError::internal(format!("worker failed: {e}")))??;

    Ok(Json(RemoveResponse {
        filename: saved.file_name,
    }))
}
