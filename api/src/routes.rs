/// HTTP route handlers.
use std::path::Path as FsPath;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;
use tracing::{error, info, warn};

use vidfetch_downloader::output;
use vidfetch_shared::models::{DownloadRequest, JobRecord, JobStatus, VideoInfo};

use crate::system::{self, SystemSnapshot};
use crate::AppState;

pub const JOB_NOT_FOUND: &str = "Download ID not found";

// ====== ERRORS ======

/// Error response carried as `{"detail": ...}`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub detail: String,
}

impl ApiError {
    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self { status: StatusCode::BAD_REQUEST, detail: detail.into() }
    }

    pub fn not_found(detail: impl Into<String>) -> Self {
        Self { status: StatusCode::NOT_FOUND, detail: detail.into() }
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self { status: StatusCode::INTERNAL_SERVER_ERROR, detail: detail.into() }
    }
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub detail: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { detail: self.detail })).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::bad_request(rejection.body_text())
    }
}

// ====== REQUEST / RESPONSE TYPES ======

#[derive(Deserialize)]
pub struct VideoInfoBody {
    #[serde(default)]
    pub url: String,
}

#[derive(Serialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Serialize)]
pub struct DownloadStarted {
    pub download_id: String,
    pub status: &'static str,
}

// ====== ROUTES ======

/// GET /
pub async fn root() -> Json<MessageResponse> {
    Json(MessageResponse {
        message: "Vidfetch API is running".to_string(),
    })
}

/// POST /video-info
pub async fn video_info(
    State(state): State<Arc<AppState>>,
    body: Result<Json<VideoInfoBody>, JsonRejection>,
) -> Result<Json<VideoInfo>, ApiError> {
    let Json(body) = body?;
    let url = body.url.trim();
    if url.is_empty() {
        return Err(ApiError::bad_request("URL is required"));
    }

    let info = state
        .runner
        .extractor()
        .probe(url)
        .await
        .map_err(|e| {
            warn!("Video info lookup failed for {}: {}", url, e);
            ApiError::bad_request(format!("Error getting video info: {}", e))
        })?;

    info!("Video info for {}: {:?} ({} formats)", url, info.title, info.formats.len());
    Ok(Json(info))
}

/// POST /download
pub async fn start_download(
    State(state): State<Arc<AppState>>,
    body: Result<Json<DownloadRequest>, JsonRejection>,
) -> Result<Json<DownloadStarted>, ApiError> {
    let Json(mut request) = body?;
    request.url = request.url.trim().to_string();
    if request.url.is_empty() {
        return Err(ApiError::bad_request("URL is required"));
    }

    let download_id = state.runner.start(&request).await.map_err(|e| {
        error!("Failed to start download for {}: {}", request.url, e);
        ApiError::internal(format!("Error starting download: {}", e))
    })?;

    Ok(Json(DownloadStarted {
        download_id,
        status: "started",
    }))
}

/// GET /download-progress/:id
pub async fn download_progress(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<JobRecord>, ApiError> {
    state
        .store
        .get(&id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::not_found(JOB_NOT_FOUND))
}

/// GET /download-ready/:id - Stream the finished file
pub async fn download_ready(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let record = state
        .store
        .get(&id)
        .await
        .ok_or_else(|| ApiError::not_found(JOB_NOT_FOUND))?;

    if record.status() != JobStatus::Finished {
        return Err(ApiError::bad_request("Download not finished yet"));
    }

    let job_dir = state
        .store
        .job_dir(&id)
        .await
        .ok_or_else(|| ApiError::not_found(JOB_NOT_FOUND))?;

    let path = output::resolve_output_file(&job_dir, record.filepath().map(FsPath::new))
        .await
        .map_err(|e| {
            warn!("Resolving file for job {} failed: {}", id, e);
            ApiError::not_found("File not found")
        })?
        .ok_or_else(|| ApiError::not_found("File not found"))?;

    let file = tokio::fs::File::open(&path)
        .await
        .map_err(|e| ApiError::internal(format!("Cannot open file: {}", e)))?;

    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("download")
        .to_string();
    info!("Serving {:?} for job {}", path, id);

    let body = Body::from_stream(ReaderStream::new(file));
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type_for(&filename).to_string()),
            (header::CONTENT_DISPOSITION, content_disposition(&filename)),
        ],
        body,
    )
        .into_response())
}

/// GET /system-info
pub async fn system_info(State(state): State<Arc<AppState>>) -> Result<Json<SystemSnapshot>, ApiError> {
    let system = state.system.clone();
    let download_dir = state.config.download_dir.clone();

    tokio::task::spawn_blocking(move || system::snapshot(&system, &download_dir))
        .await
        .map(Json)
        .map_err(|e| ApiError::internal(format!("Error reading system info: {}", e)))
}

// ====== HELPERS ======

/// Media type reported for a delivered file.
pub fn content_type_for(filename: &str) -> &'static str {
    let ext = FsPath::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    match ext.as_str() {
        "mp4" | "webm" | "mkv" | "avi" => "video/mp4",
        "mp3" | "wav" | "flac" | "aac" | "m4a" => "audio/mpeg",
        _ => "application/octet-stream",
    }
}

/// `attachment` disposition with an ASCII fallback name and an RFC 5987 UTF-8 name.
pub fn content_disposition(filename: &str) -> String {
    let fallback: String = filename
        .chars()
        .map(|c| if c.is_ascii() && !c.is_ascii_control() && c != '"' && c != '\\' { c } else { '_' })
        .collect();

    if filename.is_ascii() {
        return format!("attachment; filename=\"{}\"", fallback);
    }

    let mut encoded = String::new();
    for byte in filename.bytes() {
        if byte.is_ascii_alphanumeric() || b"!#$&+-.^_`|~".contains(&byte) {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("%{:02X}", byte));
        }
    }
    format!("attachment; filename=\"{}\"; filename*=UTF-8''{}", fallback, encoded)
}
