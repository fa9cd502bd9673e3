#![forbid(unsafe_code)]

//! HTTP surface of the service.
//!
//! Handlers stay thin: they parse the request, call into the downloader or
//! the retrieval service and map typed errors onto `{"error": ...}` bodies.
//! Every non-2xx response produced here is JSON, including the 404/405/413
//! responses axum would otherwise leave empty or plain text.

use std::{
    net::{IpAddr, SocketAddr},
    path::Path,
    sync::Arc,
    time::{Duration, Instant},
};

use axum::{
    Json, Router,
    body::{Body, Bytes},
    extract::{
        ConnectInfo, DefaultBodyLimit, Path as AxumPath, Query, Request, State,
        rejection::PathRejection,
    },
    http::{HeaderMap, HeaderValue, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;
use mime_guess::MimeGuess;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncSeekExt},
};
use tokio_util::io::ReaderStream;
use tracing::Instrument;

use crate::download::{DownloadError, Downloader, validate_url};
use crate::extractor::{CacheClear, MediaExtractor};
use crate::monitoring::{
    DiskSpace, Metrics, SystemMetrics, HostSampler, disk_space, render_prometheus, storage_usage,
};
use crate::retrieval::RetrievalService;
use crate::store::{DownloadStore, StoreError};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const SLOW_REQUEST: Duration = Duration::from_secs(5);
const MISSING_URL: &str = "Missing required parameter: url";
const INVALID_URL: &str = "Invalid URL provided";

#[derive(Clone)]
pub struct AppState {
    downloader: Downloader,
    retrieval: RetrievalService,
    metrics: Arc<Metrics>,
    host: Arc<HostSampler>,
}

impl AppState {
    pub fn new(store: DownloadStore, extractor: Arc<dyn MediaExtractor>) -> Self {
        let metrics = Arc::new(Metrics::default());
        Self {
            downloader: Downloader::new(store.clone(), extractor, metrics.clone()),
            retrieval: RetrievalService::new(store),
            metrics,
            host: Arc::new(HostSampler::new()),
        }
    }

    fn storage_root(&self) -> &Path {
        self.downloader.store().root()
    }
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

pub fn router(state: AppState, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/", get(api_index))
        .route("/api", get(api_index))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/download", post(download_video))
        .route("/metadata", post(video_metadata))
        .route("/formats", get(video_formats))
        .route("/file/{id}/{filename}", get(serve_file))
        .route("/cleanup", post(cleanup))
        .route("/clear-cache", post(clear_cache))
        .fallback(endpoint_not_found)
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(middleware::map_response(json_error_bodies))
        .layer(middleware::from_fn_with_state(state.clone(), log_requests))
        .with_state(state)
}

async fn log_requests(State(state): State<AppState>, request: Request, next: Next) -> Response {
    state.metrics.request_seen();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let client_ip = client_ip(&request).map_or_else(|| "-".to_string(), |ip| ip.to_string());
    let span = tracing::info_span!("request", %client_ip);
    let started = Instant::now();

    let response = next.run(request).instrument(span).await;

    let elapsed = started.elapsed();
    let duration_ms = elapsed.as_millis() as u64;
    let status = response.status().as_u16();
    if elapsed >= SLOW_REQUEST {
        tracing::warn!(%method, %path, %client_ip, status, duration_ms, "slow request");
    } else {
        tracing::info!(%method, %path, %client_ip, status, duration_ms, "request");
    }
    response
}

/// Peer address recorded by `into_make_service_with_connect_info`; absent when
/// the router is driven directly.
fn client_ip(request: &Request) -> Option<IpAddr> {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
}

/// Rewrites the framework's own 405 and 413 responses into JSON errors.
async fn json_error_bodies(response: Response) -> Response {
    let message = match response.status() {
        StatusCode::METHOD_NOT_ALLOWED => "Method not allowed",
        StatusCode::PAYLOAD_TOO_LARGE => "Request body too large",
        _ => return response,
    };
    let allow = response.headers().get(header::ALLOW).cloned();
    let mut rewritten = ApiError::new(response.status(), message).into_response();
    if let Some(allow) = allow {
        rewritten.headers_mut().insert(header::ALLOW, allow);
    }
    rewritten
}

async fn endpoint_not_found() -> ApiError {
    ApiError::not_found("Endpoint not found")
}

async fn api_index() -> Json<Value> {
    Json(json!({
        "message": "TikTok Video Downloader API",
        "version": VERSION,
        "endpoints": {
            "POST /download": "Download TikTok video",
            "POST /metadata": "Get video metadata",
            "GET /formats": "Get all available video formats and metadata (use ?url=<tiktok_url>)",
            "GET /file/{download_id}/{filename}": "Fetch a downloaded file",
            "POST /cleanup": "Remove one download (download_id) or all downloads",
            "POST /clear-cache": "Clear the yt-dlp cache",
            "GET /health": "Health check (use ?detailed=true for system metrics)",
            "GET /metrics": "Prometheus-style metrics",
        }
    }))
}

#[derive(Debug, Deserialize)]
struct HealthQuery {
    detailed: Option<String>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: String,
    version: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_metrics: Option<SystemMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    disk_space: Option<DiskSpace>,
}

async fn health(State(state): State<AppState>, Query(query): Query<HealthQuery>) -> Response {
    let mut response = HealthResponse {
        status: "healthy",
        timestamp: Utc::now().to_rfc3339(),
        version: VERSION,
        system_metrics: None,
        disk_space: None,
    };

    let detailed = query
        .detailed
        .is_some_and(|value| value.eq_ignore_ascii_case("true"));
    if detailed {
        let root = state.storage_root().to_path_buf();
        let host = state.host.clone();
        let sampled =
            tokio::task::spawn_blocking(move || (host.snapshot(&root), disk_space(&root))).await;
        match sampled {
            Ok((system, disk)) => {
                response.system_metrics = Some(system);
                response.disk_space = disk;
            }
            Err(err) => {
                tracing::error!(error = %err, "health check failed");
                return unhealthy(err);
            }
        }
    }

    Json(response).into_response()
}

fn unhealthy(error: impl std::fmt::Display) -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({
            "status": "unhealthy",
            "error": error.to_string(),
            "timestamp": Utc::now().to_rfc3339(),
        })),
    )
        .into_response()
}

async fn metrics(State(state): State<AppState>) -> Response {
    let root = state.storage_root().to_path_buf();
    let host = state.host.clone();
    let counters = state.metrics.snapshot();
    let rendered = tokio::task::spawn_blocking(move || {
        let system = host.snapshot(&root);
        render_prometheus(&system, counters, storage_usage(&root))
    })
    .await;

    let content_type = [(header::CONTENT_TYPE, "text/plain; charset=utf-8")];
    match rendered {
        Ok(text) => (content_type, text).into_response(),
        Err(err) => {
            tracing::error!(error = %err, "metrics collection failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                content_type,
                format!("# Error: {err}\n"),
            )
                .into_response()
        }
    }
}

async fn download_video(State(state): State<AppState>, body: Bytes) -> ApiResult<Json<Value>> {
    let url = parse_url_payload(&body)?;
    let record = state
        .downloader
        .download(&url)
        .await
        .map_err(|failure| download_error("Download failed", failure.source))?;

    let id = record.id.to_string();
    Ok(Json(json!({
        "success": true,
        "message": "Video downloaded successfully",
        "download_id": id,
        "filename": record.filename,
        "file_size": record.file_size,
        "download_url": format!(
            "/file/{}/{}",
            urlencoding::encode(&id),
            urlencoding::encode(&record.filename)
        ),
    })))
}

async fn video_metadata(State(state): State<AppState>, body: Bytes) -> ApiResult<Json<Value>> {
    let url = parse_url_payload(&body)?;
    let result = state
        .downloader
        .metadata(&url)
        .await
        .map_err(|err| download_error("Failed to get metadata", err))?;
    Ok(Json(json!({
        "success": true,
        "metadata": result.metadata_summary(&url),
    })))
}

#[derive(Debug, Deserialize)]
struct FormatsQuery {
    url: Option<String>,
}

async fn video_formats(
    State(state): State<AppState>,
    Query(query): Query<FormatsQuery>,
) -> ApiResult<Json<Value>> {
    let raw = query.url.ok_or_else(|| ApiError::bad_request(MISSING_URL))?;
    let url = validate_url(&raw).map_err(|_| ApiError::bad_request(INVALID_URL))?;
    let result = state
        .downloader
        .formats(url)
        .await
        .map_err(|err| download_error("Failed to get video formats", err))?;

    let formats = result.format_list();
    Ok(Json(json!({
        "success": true,
        "metadata": result.detailed_metadata(url),
        "formats": formats,
        "best_format": result.best_format(),
        "total_formats": formats.len(),
    })))
}

async fn serve_file(
    State(state): State<AppState>,
    path: Result<AxumPath<(String, String)>, PathRejection>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    // Segments that do not decode to UTF-8 cannot name a stored file.
    let AxumPath((id, filename)) = path.map_err(|rejection| {
        tracing::debug!(error = %rejection, "undecodable file path");
        ApiError::not_found("File not found")
    })?;
    let retrieval = state.retrieval.clone();
    let stored = tokio::task::spawn_blocking(move || retrieval.open(&id, &filename))
        .await
        .map_err(|err| ApiError::internal(format!("Failed to serve file: {err}")))?
        .map_err(|err| match err {
            StoreError::NotFound => ApiError::not_found("File not found"),
            other => ApiError::internal(format!("Failed to serve file: {other}")),
        })?;

    let mut response = stream_file(&stored.path, Some(&headers)).await?;
    response.headers_mut().insert(
        header::CONTENT_DISPOSITION,
        content_disposition(&stored.filename)?,
    );
    Ok(response)
}

async fn cleanup(State(state): State<AppState>, body: Bytes) -> ApiResult<Json<Value>> {
    let id = parse_cleanup_payload(&body)?;
    let retrieval = state.retrieval.clone();
    let outcome = tokio::task::spawn_blocking(move || retrieval.cleanup(id.as_deref()))
        .await
        .map_err(|err| ApiError::internal(format!("Cleanup failed: {err}")))?
        .map_err(|err| match err {
            StoreError::NotFound => ApiError::not_found("Download ID not found"),
            other => ApiError::internal(format!("Cleanup failed: {other}")),
        })?;

    Ok(Json(json!({
        "success": true,
        "message": outcome.message(),
    })))
}

async fn clear_cache(State(state): State<AppState>) -> Response {
    match state.downloader.extractor().clear_cache().await {
        Ok(CacheClear::Cleared(output)) => Json(json!({
            "success": true,
            "message": "yt-dlp cache cleared successfully",
            "output": output,
        }))
        .into_response(),
        Ok(CacheClear::Refused(error)) => Json(json!({
            "success": false,
            "message": "Failed to clear cache via yt-dlp command",
            "error": error,
        }))
        .into_response(),
        Err(err) => {
            tracing::error!(error = %err, "cache clearing failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "success": false,
                    "message": format!("Cache clearing failed: {err}"),
                })),
            )
                .into_response()
        }
    }
}

/// `{"url": "..."}` bodies. A body that is not JSON, or has no `url`, counts
/// as a missing parameter; a non-string or blank `url` is invalid.
fn parse_url_payload(body: &[u8]) -> ApiResult<String> {
    let value: Value =
        serde_json::from_slice(body).map_err(|_| ApiError::bad_request(MISSING_URL))?;
    match value.get("url") {
        None | Some(Value::Null) => Err(ApiError::bad_request(MISSING_URL)),
        Some(Value::String(url)) => validate_url(url)
            .map(str::to_string)
            .map_err(|_| ApiError::bad_request(INVALID_URL)),
        Some(_) => Err(ApiError::bad_request(INVALID_URL)),
    }
}

/// `None` selects every download: empty body, `null`, `{}` or a null id.
fn parse_cleanup_payload(body: &[u8]) -> ApiResult<Option<String>> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    let value: Value = serde_json::from_slice(body)
        .map_err(|_| ApiError::bad_request("Invalid JSON body"))?;
    match value {
        Value::Null => Ok(None),
        Value::Object(map) => match map.get("download_id") {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(id)) if !id.trim().is_empty() => Ok(Some(id.trim().to_string())),
            Some(_) => Err(ApiError::bad_request("Invalid download_id")),
        },
        _ => Err(ApiError::bad_request("Invalid JSON body")),
    }
}

fn download_error(context: &str, err: DownloadError) -> ApiError {
    match err {
        DownloadError::InvalidInput(message) => ApiError::bad_request(message),
        DownloadError::Extraction(err) => ApiError::internal(format!("{context}: {err}")),
        DownloadError::Store(StoreError::FileMissing(_)) => {
            ApiError::internal(format!("{context}: downloaded file not found"))
        }
        other => {
            tracing::error!(error = %other, "{context}");
            ApiError::internal("Internal server error")
        }
    }
}

fn content_disposition(filename: &str) -> ApiResult<HeaderValue> {
    let fallback: String = filename
        .chars()
        .map(|c| {
            if c == ' ' || (c.is_ascii_graphic() && c != '"' && c != '\\') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let value = format!(
        "attachment; filename=\"{fallback}\"; filename*=UTF-8''{}",
        urlencoding::encode(filename)
    );
    HeaderValue::from_str(&value)
        .map_err(|_| ApiError::internal("Failed to serve file: invalid file name"))
}

async fn stream_file(path: &Path, headers: Option<&HeaderMap>) -> ApiResult<Response> {
    let mut file = File::open(path)
        .await
        .map_err(|_| ApiError::not_found("File not found"))?;
    let size = file
        .metadata()
        .await
        .map_err(|_| ApiError::not_found("File not found"))?
        .len();

    let range = headers
        .and_then(|headers| headers.get(header::RANGE))
        .and_then(|value| parse_range_header(value, size));

    let mut response = match range {
        Some((start, _)) if start >= size => {
            let mut response = Response::new(Body::empty());
            *response.status_mut() = StatusCode::RANGE_NOT_SATISFIABLE;
            response
                .headers_mut()
                .insert(header::CONTENT_RANGE, header_value(format!("bytes */{size}"))?);
            response
        }
        Some((start, end)) => {
            let end = end.min(size.saturating_sub(1));
            let length = end - start + 1;
            file.seek(std::io::SeekFrom::Start(start))
                .await
                .map_err(|err| ApiError::internal(format!("Failed to serve file: {err}")))?;
            let mut response = Body::from_stream(ReaderStream::new(file.take(length))).into_response();
            *response.status_mut() = StatusCode::PARTIAL_CONTENT;
            response.headers_mut().insert(
                header::CONTENT_RANGE,
                header_value(format!("bytes {start}-{end}/{size}"))?,
            );
            response
                .headers_mut()
                .insert(header::CONTENT_LENGTH, HeaderValue::from(length));
            response
        }
        None => {
            let mut response = Body::from_stream(ReaderStream::new(file)).into_response();
            response
                .headers_mut()
                .insert(header::CONTENT_LENGTH, HeaderValue::from(size));
            response
        }
    };

    response
        .headers_mut()
        .insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    if let Some(mime) = MimeGuess::from_path(path).first()
        && let Ok(value) = HeaderValue::from_str(mime.as_ref())
    {
        response.headers_mut().insert(header::CONTENT_TYPE, value);
    }

    Ok(response)
}

fn header_value(value: String) -> ApiResult<HeaderValue> {
    HeaderValue::from_str(&value).map_err(|_| ApiError::internal("invalid header value"))
}

/// Single `bytes=` ranges only: `start-end`, `start-` and suffix `-N`.
fn parse_range_header(value: &HeaderValue, size: u64) -> Option<(u64, u64)> {
    let value = value.to_str().ok()?.trim();
    let range = value.strip_prefix("bytes=")?.trim();
    if range.is_empty() || range.contains(',') {
        return None;
    }
    let (start_str, end_str) = range.split_once('-')?;

    if start_str.is_empty() {
        let suffix_len: u64 = end_str.parse().ok()?;
        if suffix_len == 0 {
            return None;
        }
        return Some((size.saturating_sub(suffix_len), size.saturating_sub(1)));
    }

    let start: u64 = start_str.parse().ok()?;
    if end_str.is_empty() {
        // Open-ended: a start past the end still comes back so the caller
        // can answer 416.
        return Some((start, size.saturating_sub(1).max(start)));
    }
    let end: u64 = end_str.parse().ok()?;
    (end >= start).then_some((start, end))
}
