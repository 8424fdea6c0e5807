use axum::{
    body::Body,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Json, Query, State,
    },
    http::{header, HeaderMap, HeaderValue, Method, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use bytes::Bytes;
use chrono::Local;
use log::{Level, LevelFilter, Log, Metadata, Record};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::{
    env,
    fs::OpenOptions,
    io::Write,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
    sync::{Arc, Mutex},
    time::Duration,
};
use subtle::ConstantTimeEq;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::signal;
use tokio::sync::broadcast;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    services::{ServeDir, ServeFile},
};

use vodcast_server::commands::{test_ffmpeg, test_rtmp_endpoint};
use vodcast_server::models::PlaybackOptions;
use vodcast_server::services::{
    is_video_file, validate_extension, BatchConverter, Clipper, EventSink, FfmpegLocator,
    JobError, MediaProbe, MediaServer, PreviewManager, PreviewPipeline, SettingsManager,
    StreamController, VIDEO_EXTENSIONS,
};

// ============================================================================
// Constants
// ============================================================================

const DEFAULT_PORT: u16 = 3000;
const STREAM_CHUNK_SIZE: usize = 64 * 1024;

// ============================================================================
// Event System
// ============================================================================

#[derive(Clone, Serialize)]
struct ServerEvent {
    event: String,
    payload: Value,
}

#[derive(Clone)]
struct EventBus {
    sender: broadcast::Sender<ServerEvent>,
}

impl EventBus {
    fn new() -> Self {
        let (sender, _) = broadcast::channel(256);
        Self { sender }
    }

    fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.sender.subscribe()
    }
}

impl EventSink for EventBus {
    fn emit(&self, event: &str, payload: Value) {
        let _ = self.sender.send(ServerEvent {
            event: event.to_string(),
            payload,
        });
    }
}

// ============================================================================
// Application State
// ============================================================================

#[derive(Clone)]
struct AppState {
    settings_manager: Arc<SettingsManager>,
    locator: Arc<FfmpegLocator>,
    probe: Arc<MediaProbe>,
    preview_manager: Arc<PreviewManager>,
    stream_controller: Arc<StreamController>,
    batch_converter: Arc<BatchConverter>,
    clipper: Arc<Clipper>,
    media_server: Arc<MediaServer>,
    event_bus: EventBus,
    home_dir: Option<PathBuf>,
    auth_token: Option<String>,
}

// ============================================================================
// Logging
// ============================================================================

/// Writes timestamped log lines to a per-day file and mirrors them onto the
/// event bus for the UI log view
struct ServerLogger {
    log_dir: PathBuf,
    file: Mutex<Option<(String, std::fs::File)>>,
    event_bus: EventBus,
    level: LevelFilter,
}

impl ServerLogger {
    fn new(log_dir: PathBuf, event_bus: EventBus) -> Self {
        Self {
            log_dir,
            file: Mutex::new(None),
            event_bus,
            level: LevelFilter::Info,
        }
    }
}

impl Log for ServerLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let timestamp = Local::now();
        let date = timestamp.format("%Y-%m-%d").to_string();
        let time = timestamp.format("%H:%M:%S%.3f");
        let target = record.target();
        let level = record.level();
        let message = format!("{}", record.args());
        let line = format!("[{date}][{time}][{target}][{level}] {message}");

        eprintln!("{line}");

        if let Ok(mut guard) = self.file.lock() {
            // One file per day, reopened when the date rolls over
            let reopen = match guard.as_ref() {
                Some((current_date, _)) => current_date != &date,
                None => true,
            };
            if reopen {
                let path = self.log_dir.join(format!("vodcast_{date}.log"));
                if let Ok(file) = OpenOptions::new().create(true).append(true).open(path) {
                    *guard = Some((date, file));
                }
            }
            if let Some((_, file)) = guard.as_mut() {
                let _ = writeln!(file, "{line}");
            }
        }

        let level_number = match level {
            Level::Error => 1,
            Level::Warn => 2,
            Level::Info => 3,
            Level::Debug => 4,
            Level::Trace => 5,
        };

        self.event_bus.emit(
            "log://log",
            json!({ "level": level_number, "message": message, "target": target }),
        );
    }

    fn flush(&self) {}
}

/// Delete day files older than the configured retention
fn prune_logs(log_dir: &std::path::Path, retention_days: u32) {
    let cutoff = Duration::from_secs(u64::from(retention_days) * 24 * 60 * 60);
    let entries = match std::fs::read_dir(log_dir) {
        Ok(entries) => entries,
        Err(_) => return,
    };

    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        if !name.starts_with("vodcast_") || !name.ends_with(".log") {
            continue;
        }
        let age = entry
            .metadata()
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| modified.elapsed().ok());
        if age.map(|age| age > cutoff).unwrap_or(false) {
            let _ = std::fs::remove_file(entry.path());
        }
    }
}

// ============================================================================
// Security Utilities
// ============================================================================

/// Constant-time token comparison to prevent timing attacks
fn verify_token(expected: &str, provided: &str) -> bool {
    expected.as_bytes().ct_eq(provided.as_bytes()).into()
}

/// Extract bearer token from Authorization header
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

async fn auth_middleware(
    State(state): State<AppState>,
    headers: HeaderMap,
    request: Request<Body>,
    next: Next,
) -> Response {
    // If no token configured, allow all requests
    let Some(expected) = state.auth_token.as_deref() else {
        return next.run(request).await;
    };

    if let Some(token) = bearer_token(&headers) {
        if verify_token(expected, token) {
            return next.run(request).await;
        }
    }

    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "ok": false, "error": "Authentication required" })),
    )
        .into_response()
}

fn build_cors_layer() -> CorsLayer {
    let cors_origins = env::var("VODCAST_CORS_ORIGINS")
        .unwrap_or_else(|_| "http://localhost:*,http://127.0.0.1:*".to_string());

    let allowed_origins: Vec<String> = cors_origins
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(move |origin: &HeaderValue, _| {
            let origin_str = match origin.to_str() {
                Ok(s) => s,
                Err(_) => return false,
            };

            allowed_origins.iter().any(|allowed| {
                if allowed.ends_with(":*") {
                    // Wildcard port matching
                    let prefix = allowed.trim_end_matches(":*");
                    origin_str.starts_with(prefix) && origin_str[prefix.len()..].starts_with(':')
                } else {
                    origin_str == allowed
                }
            })
        }))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

// ============================================================================
// Response Helpers
// ============================================================================

fn ok_json(data: Value) -> Response {
    Json(json!({ "ok": true, "data": data })).into_response()
}

fn error_json(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "ok": false, "error": message }))).into_response()
}

fn job_error_response(err: &JobError) -> Response {
    let status = match err {
        JobError::InvalidParameter(_) => StatusCode::BAD_REQUEST,
        JobError::SourceNotFound(_) => StatusCode::NOT_FOUND,
        JobError::AlreadyRunning => StatusCode::CONFLICT,
        JobError::SpawnFailure { .. } | JobError::ProcessFailure(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    error_json(status, &err.to_string())
}

// ============================================================================
// Config & System Handlers
// ============================================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigUpdate {
    ffmpeg_path: Option<String>,
    output_dir: Option<String>,
    last_browse_path: Option<String>,
    media_server_path: Option<String>,
    rtmp_port: Option<u16>,
    stream_name: Option<String>,
}

async fn get_config(State(state): State<AppState>) -> Response {
    match state.settings_manager.load() {
        Ok(settings) => match serde_json::to_value(&settings) {
            Ok(value) => ok_json(value),
            Err(e) => error_json(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
        },
        Err(e) => error_json(StatusCode::INTERNAL_SERVER_ERROR, &e),
    }
}

async fn update_config(
    State(state): State<AppState>,
    Json(update): Json<ConfigUpdate>,
) -> Response {
    let mut settings = match state.settings_manager.load() {
        Ok(settings) => settings,
        Err(e) => return error_json(StatusCode::INTERNAL_SERVER_ERROR, &e),
    };

    if let Some(path) = update.ffmpeg_path {
        settings.ffmpeg_path = path;
    }
    if let Some(dir) = update.output_dir {
        settings.output_dir = dir;
    }
    if let Some(path) = update.last_browse_path {
        settings.last_browse_path = path;
    }
    if let Some(path) = update.media_server_path {
        settings.media_server_path = path;
    }
    if let Some(port) = update.rtmp_port {
        settings.rtmp_port = port;
    }
    if let Some(name) = update.stream_name {
        settings.stream_name = name;
    }

    match state.settings_manager.save(&settings) {
        Ok(()) => ok_json(json!(settings)),
        Err(e) => error_json(StatusCode::INTERNAL_SERVER_ERROR, &e),
    }
}

#[derive(Deserialize)]
struct SaveBrowsePathRequest {
    path: Option<String>,
}

async fn save_browse_path(
    State(state): State<AppState>,
    Json(request): Json<SaveBrowsePathRequest>,
) -> Response {
    let path = request.path.unwrap_or_default();
    match state.settings_manager.save_browse_path(&path) {
        Ok(()) => ok_json(json!({})),
        Err(e) => error_json(StatusCode::INTERNAL_SERVER_ERROR, &e),
    }
}

async fn test_ffmpeg_handler(State(state): State<AppState>) -> Response {
    let ffmpeg_path = state.locator.ffmpeg_path();
    let result = tokio::task::spawn_blocking(move || test_ffmpeg(&ffmpeg_path)).await;
    match result {
        Ok(result) => ok_json(json!(result)),
        Err(e) => error_json(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}

async fn health() -> impl IntoResponse {
    Json(json!({ "ok": true }))
}

async fn ready(State(state): State<AppState>) -> Response {
    let settings_ok = state.settings_manager.load().is_ok();
    let media_server_ok = state.media_server.health_check().await;

    let all_ok = settings_ok; // media server is optional for previews
    let payload = json!({
        "ok": all_ok,
        "checks": {
            "settings": settings_ok,
            "mediaServer": media_server_ok,
        }
    });

    if all_ok {
        Json(payload).into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(payload)).into_response()
    }
}

// ============================================================================
// File Browser Handlers
// ============================================================================

#[derive(Deserialize)]
struct BrowseQuery {
    path: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BrowseEntry {
    name: String,
    path: String,
    is_directory: bool,
    is_video: bool,
    size: Option<u64>,
}

async fn files_browse(
    State(state): State<AppState>,
    Query(params): Query<BrowseQuery>,
) -> Response {
    let browse_path = match params.path.filter(|p| !p.is_empty()) {
        Some(p) => PathBuf::from(p),
        None => {
            // Fall back to the last browsed directory, then home
            let last = state
                .settings_manager
                .load()
                .map(|s| s.last_browse_path)
                .unwrap_or_default();
            if !last.is_empty() && PathBuf::from(&last).is_dir() {
                PathBuf::from(last)
            } else {
                match &state.home_dir {
                    Some(home) => home.clone(),
                    None => PathBuf::from("/"),
                }
            }
        }
    };

    if !browse_path.exists() {
        return error_json(StatusCode::NOT_FOUND, "Directory not found");
    }
    if !browse_path.is_dir() {
        return error_json(StatusCode::BAD_REQUEST, "Path is not a directory");
    }

    let entries = match std::fs::read_dir(&browse_path) {
        Ok(entries) => entries,
        Err(e) => {
            log::error!("Failed to read directory {browse_path:?}: {e}");
            return error_json(StatusCode::INTERNAL_SERVER_ERROR, "Failed to read directory");
        }
    };

    let mut items: Vec<BrowseEntry> = Vec::new();
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') {
            continue;
        }

        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(_) => continue, // unreadable entry
        };

        let is_directory = metadata.is_dir();
        items.push(BrowseEntry {
            path: entry.path().to_string_lossy().to_string(),
            is_video: !is_directory && is_video_file(&name),
            size: if is_directory { None } else { Some(metadata.len()) },
            name,
            is_directory,
        });
    }

    // Directories first, then case-insensitive by name
    items.sort_by(|a, b| match (a.is_directory, b.is_directory) {
        (true, false) => std::cmp::Ordering::Less,
        (false, true) => std::cmp::Ordering::Greater,
        _ => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
    });

    let parent = browse_path
        .parent()
        .map(|p| p.to_string_lossy().to_string());

    ok_json(json!({
        "path": browse_path.to_string_lossy(),
        "parent": parent,
        "items": items,
    }))
}

// ============================================================================
// Video Info & Streaming Handlers
// ============================================================================

#[derive(Deserialize)]
struct VideoPathQuery {
    path: String,
}

async fn video_info_handler(
    State(state): State<AppState>,
    Query(params): Query<VideoPathQuery>,
) -> Response {
    let path = PathBuf::from(&params.path);
    if !path.exists() {
        return error_json(StatusCode::NOT_FOUND, "File not found");
    }

    match state.probe.video_info(&path).await {
        Ok(info) => ok_json(json!(info)),
        Err(e) => error_json(StatusCode::INTERNAL_SERVER_ERROR, &e),
    }
}

#[derive(Deserialize)]
struct VideoStreamQuery {
    path: String,
    session: Option<String>,
}

async fn video_stream_handler(
    State(state): State<AppState>,
    Query(params): Query<VideoStreamQuery>,
    headers: HeaderMap,
) -> Response {
    let source = PathBuf::from(&params.path);
    if !source.exists() {
        return error_json(StatusCode::NOT_FOUND, "File not found");
    }
    if let Err(e) = validate_extension(&source, VIDEO_EXTENSIONS) {
        return error_json(StatusCode::BAD_REQUEST, &e);
    }

    // Prefer the session's working file; this also refreshes its idle timer
    let stream_path = match params.session.as_deref() {
        Some(session) if !session.is_empty() => state
            .preview_manager
            .resolve_playback_path(session, &source),
        _ => source,
    };

    serve_range_file(&stream_path, &headers).await
}

/// Serve a file honoring a single `Range: bytes=start-end` header
async fn serve_range_file(path: &std::path::Path, headers: &HeaderMap) -> Response {
    let mut file = match tokio::fs::File::open(path).await {
        Ok(file) => file,
        Err(e) => {
            log::error!("Failed to open {} for streaming: {e}", path.display());
            return error_json(StatusCode::INTERNAL_SERVER_ERROR, "Failed to open file");
        }
    };

    let file_size = match file.metadata().await {
        Ok(metadata) => metadata.len(),
        Err(_) => return error_json(StatusCode::INTERNAL_SERVER_ERROR, "Failed to stat file"),
    };

    let range = headers
        .get(header::RANGE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| parse_range(value, file_size));

    let (status, start, end) = match range {
        Some((start, end)) => (StatusCode::PARTIAL_CONTENT, start, end),
        None => (StatusCode::OK, 0, file_size.saturating_sub(1)),
    };

    if file_size == 0 || start > end {
        return error_json(StatusCode::RANGE_NOT_SATISFIABLE, "Invalid range");
    }

    if start > 0 {
        if file.seek(std::io::SeekFrom::Start(start)).await.is_err() {
            return error_json(StatusCode::INTERNAL_SERVER_ERROR, "Seek failed");
        }
    }

    let mut remaining = end - start + 1;
    let content_length = remaining;

    let body_stream = async_stream::stream! {
        let mut buf = vec![0u8; STREAM_CHUNK_SIZE];
        while remaining > 0 {
            let to_read = remaining.min(STREAM_CHUNK_SIZE as u64) as usize;
            match file.read(&mut buf[..to_read]).await {
                Ok(0) => break,
                Ok(n) => {
                    remaining -= n as u64;
                    yield Ok::<_, std::io::Error>(Bytes::copy_from_slice(&buf[..n]));
                }
                Err(e) => {
                    yield Err(e);
                    break;
                }
            }
        }
    };

    let mut response = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "video/mp4")
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::CONTENT_LENGTH, content_length);

    if status == StatusCode::PARTIAL_CONTENT {
        response = response.header(
            header::CONTENT_RANGE,
            format!("bytes {start}-{end}/{file_size}"),
        );
    }

    response
        .body(Body::from_stream(body_stream))
        .unwrap_or_else(|_| {
            error_json(StatusCode::INTERNAL_SERVER_ERROR, "Failed to build response")
        })
}

/// Parse "bytes=start-end" (either bound optional) into inclusive offsets
fn parse_range(value: &str, file_size: u64) -> Option<(u64, u64)> {
    let spec = value.strip_prefix("bytes=")?;
    let (start_str, end_str) = spec.split_once('-')?;

    if start_str.is_empty() {
        // Suffix range: last N bytes
        let suffix: u64 = end_str.parse().ok()?;
        if suffix == 0 || file_size == 0 {
            return None;
        }
        let start = file_size.saturating_sub(suffix);
        return Some((start, file_size - 1));
    }

    let start: u64 = start_str.parse().ok()?;
    if start >= file_size {
        return None;
    }
    let end = if end_str.is_empty() {
        file_size - 1
    } else {
        end_str.parse::<u64>().ok()?.min(file_size - 1)
    };

    if start > end {
        return None;
    }
    Some((start, end))
}

// ============================================================================
// Preview Handlers
// ============================================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PreviewStartRequest {
    session_id: String,
    video_path: String,
}

async fn preview_start(
    State(state): State<AppState>,
    Json(request): Json<PreviewStartRequest>,
) -> Response {
    let source = PathBuf::from(&request.video_path);
    match state
        .preview_manager
        .begin_session(&request.session_id, &source)
        .await
    {
        Ok(outcome) => ok_json(json!({ "status": outcome })),
        Err(err) => job_error_response(&err),
    }
}

#[derive(Deserialize)]
struct PreviewSessionQuery {
    session: String,
}

async fn preview_status(
    State(state): State<AppState>,
    Query(params): Query<PreviewSessionQuery>,
) -> Response {
    let status = state.preview_manager.poll_status(&params.session);
    let strategy = state.preview_manager.strategy(&params.session);
    ok_json(json!({ "status": status, "strategy": strategy }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PreviewStopRequest {
    session_id: String,
}

async fn preview_stop(
    State(state): State<AppState>,
    Json(request): Json<PreviewStopRequest>,
) -> Response {
    state.preview_manager.end_session(&request.session_id);
    ok_json(json!({}))
}

// ============================================================================
// Stream Handlers
// ============================================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamStartRequest {
    path: String,
    #[serde(default)]
    start_offset: f64,
    #[serde(default)]
    end_offset: f64,
    #[serde(default = "default_speed")]
    speed: f64,
    #[serde(default, rename = "loop")]
    loop_playback: bool,
}

fn default_speed() -> f64 {
    1.0
}

async fn stream_start(
    State(state): State<AppState>,
    Json(request): Json<StreamStartRequest>,
) -> Response {
    let options = PlaybackOptions {
        speed: request.speed,
        end_offset: request.end_offset,
        loop_playback: request.loop_playback,
    };

    match state
        .stream_controller
        .start(
            &PathBuf::from(&request.path),
            request.start_offset,
            options,
        )
        .await
    {
        Ok(address) => ok_json(json!({ "address": address })),
        Err(err) => job_error_response(&err),
    }
}

async fn stream_stop(State(state): State<AppState>) -> Response {
    state.stream_controller.stop().await;
    ok_json(json!({}))
}

async fn stream_pause(State(state): State<AppState>) -> Response {
    match state.stream_controller.pause().await {
        Ok(()) => ok_json(json!({})),
        Err(err) => job_error_response(&err),
    }
}

async fn stream_resume(State(state): State<AppState>) -> Response {
    match state.stream_controller.resume().await {
        Ok(address) => ok_json(json!({ "address": address })),
        Err(err) => job_error_response(&err),
    }
}

#[derive(Deserialize)]
struct SeekRequest {
    offset: f64,
}

async fn stream_seek(
    State(state): State<AppState>,
    Json(request): Json<SeekRequest>,
) -> Response {
    match state.stream_controller.seek(request.offset).await {
        Ok(()) => ok_json(json!({})),
        Err(err) => job_error_response(&err),
    }
}

async fn stream_status(State(state): State<AppState>) -> Response {
    let status = state.stream_controller.status().await;
    ok_json(json!(status))
}

// ============================================================================
// Media Server Handlers
// ============================================================================

async fn media_server_start(State(state): State<AppState>) -> Response {
    match state.media_server.start().await {
        Ok(()) => ok_json(json!({ "available": true })),
        Err(e) => error_json(StatusCode::INTERNAL_SERVER_ERROR, &e),
    }
}

async fn media_server_status(State(state): State<AppState>) -> Response {
    let available = state.media_server.health_check().await;
    ok_json(json!({ "available": available }))
}

async fn media_server_test(State(state): State<AppState>) -> Response {
    let rtmp_port = state
        .settings_manager
        .load()
        .map(|s| s.rtmp_port)
        .unwrap_or(1935);
    let result =
        tokio::task::spawn_blocking(move || test_rtmp_endpoint("127.0.0.1", rtmp_port)).await;
    match result {
        Ok(result) => ok_json(json!(result)),
        Err(e) => error_json(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}

// ============================================================================
// Batch Handlers
// ============================================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchStartRequest {
    folder_path: String,
}

async fn batch_start(
    State(state): State<AppState>,
    Json(request): Json<BatchStartRequest>,
) -> Response {
    match state
        .batch_converter
        .start(&PathBuf::from(&request.folder_path))
        .await
    {
        Ok(count) => ok_json(json!({ "count": count })),
        Err(err) => job_error_response(&err),
    }
}

async fn batch_status(State(state): State<AppState>) -> Response {
    ok_json(json!(state.batch_converter.status()))
}

async fn batch_stop(State(state): State<AppState>) -> Response {
    state.batch_converter.cancel();
    ok_json(json!({}))
}

// ============================================================================
// Clip Handlers
// ============================================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClipRequest {
    input_path: String,
    start_time: f64,
    end_time: f64,
    output_name: Option<String>,
    #[serde(default)]
    re_encode: bool,
    #[serde(default)]
    overwrite: bool,
}

async fn clip_handler(
    State(state): State<AppState>,
    Json(request): Json<ClipRequest>,
) -> Response {
    match state
        .clipper
        .clip(
            &PathBuf::from(&request.input_path),
            request.start_time,
            request.end_time,
            request.output_name.as_deref(),
            request.re_encode,
            request.overwrite,
        )
        .await
    {
        Ok(output) => ok_json(json!({ "outputPath": output.to_string_lossy() })),
        Err(err) => job_error_response(&err),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OutputNameRequest {
    input_path: String,
    output_name: Option<String>,
}

async fn check_output_handler(
    State(state): State<AppState>,
    Json(request): Json<OutputNameRequest>,
) -> Response {
    match state.clipper.check_output(
        &PathBuf::from(&request.input_path),
        request.output_name.as_deref(),
    ) {
        Ok((path, exists)) => ok_json(json!({
            "outputPath": path.to_string_lossy(),
            "exists": exists,
        })),
        Err(e) => error_json(StatusCode::INTERNAL_SERVER_ERROR, &e),
    }
}

async fn available_name_handler(
    State(state): State<AppState>,
    Json(request): Json<OutputNameRequest>,
) -> Response {
    match state.clipper.available_name(
        &PathBuf::from(&request.input_path),
        request.output_name.as_deref(),
    ) {
        Ok(path) => {
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            ok_json(json!({
                "outputPath": path.to_string_lossy(),
                "fileName": file_name,
            }))
        }
        Err(e) => error_json(StatusCode::INTERNAL_SERVER_ERROR, &e),
    }
}

async fn open_output_handler(State(state): State<AppState>) -> Response {
    let output_dir = match state.settings_manager.output_dir() {
        Ok(dir) => dir,
        Err(e) => return error_json(StatusCode::INTERNAL_SERVER_ERROR, &e),
    };

    match opener::open(&output_dir) {
        Ok(()) => ok_json(json!({ "path": output_dir.to_string_lossy() })),
        Err(e) => error_json(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}

// ============================================================================
// WebSocket Handler
// ============================================================================

#[derive(Deserialize)]
struct AuthQuery {
    token: Option<String>,
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<AuthQuery>,
) -> impl IntoResponse {
    let authenticated = state.auth_token.is_none()
        || query.token.as_deref().is_some_and(|token| {
            state
                .auth_token
                .as_deref()
                .is_some_and(|expected| verify_token(expected, token))
        });

    if !authenticated {
        return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
    }

    ws.on_upgrade(move |socket| handle_socket(socket, state.event_bus.subscribe()))
}

async fn handle_socket(mut socket: WebSocket, mut receiver: broadcast::Receiver<ServerEvent>) {
    while let Ok(event) = receiver.recv().await {
        if let Ok(payload) = serde_json::to_string(&event) {
            if socket.send(Message::Text(payload)).await.is_err() {
                break;
            }
        }
    }
}

// ============================================================================
// Shutdown
// ============================================================================

async fn shutdown_signal(state: AppState) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    log::info!("Shutdown signal received, stopping services...");

    // Stop services in dependency order
    state.stream_controller.stop().await;
    state.batch_converter.cancel();
    state.media_server.stop().await;

    log::info!("All services stopped, server shutting down");
}

// ============================================================================
// Main
// ============================================================================

fn parse_host(host: &str) -> IpAddr {
    host.parse()
        .unwrap_or(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration from environment
    let data_dir = env::var("VODCAST_DATA_DIR").unwrap_or_else(|_| "data".to_string());
    let log_dir = env::var("VODCAST_LOG_DIR").unwrap_or_else(|_| format!("{data_dir}/logs"));
    let ui_dir = env::var("VODCAST_UI_DIR").unwrap_or_else(|_| "public".to_string());
    let env_host = env::var("VODCAST_HOST").ok();
    let env_port: Option<u16> = env::var("VODCAST_PORT")
        .ok()
        .and_then(|value| value.parse().ok());
    let auth_token = env::var("VODCAST_API_TOKEN").ok().and_then(|value| {
        let trimmed = value.trim().to_string();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed)
        }
    });

    let app_data_dir = PathBuf::from(&data_dir);
    let log_dir_path = PathBuf::from(&log_dir);
    std::fs::create_dir_all(&app_data_dir)?;
    std::fs::create_dir_all(&log_dir_path)?;

    // Event bus + logger first so service construction is visible
    let event_bus = EventBus::new();
    let logger = ServerLogger::new(log_dir_path.clone(), event_bus.clone());
    log::set_boxed_logger(Box::new(logger))?;
    log::set_max_level(LevelFilter::Info);

    // Services
    let settings_manager = Arc::new(SettingsManager::new(app_data_dir.clone()));
    let settings = settings_manager.load().unwrap_or_default();
    prune_logs(&log_dir_path, settings.log_retention_days);

    let locator = Arc::new(FfmpegLocator::new(Arc::clone(&settings_manager)));
    let probe = Arc::new(MediaProbe::new(Arc::clone(&locator)));
    let pipeline = Arc::new(PreviewPipeline::new(Arc::clone(&locator)));
    let preview_manager = Arc::new(PreviewManager::new(
        app_data_dir.join("temp"),
        Arc::clone(&probe),
        Arc::clone(&pipeline),
    )?);
    let media_server = Arc::new(MediaServer::new(Arc::clone(&settings_manager)));
    let stream_controller = Arc::new(StreamController::new(
        Arc::clone(&locator),
        Arc::clone(&media_server),
        app_data_dir.join("temp"),
        Arc::new(event_bus.clone()),
    ));
    let batch_converter = Arc::new(BatchConverter::new(
        Arc::clone(&probe),
        Arc::clone(&pipeline),
    ));
    let clipper = Arc::new(Clipper::new(
        Arc::clone(&locator),
        Arc::clone(&settings_manager),
    ));

    // Stale working files from a previous run are unreachable; remove them
    preview_manager.clean_stale_files();
    let _ = preview_manager.spawn_sweeper();

    // Bring the media server up if its binary can be found; streaming start
    // will report a clear error otherwise
    if let Err(e) = media_server.start().await {
        log::warn!("Media server not started: {e}");
    }

    let state = AppState {
        settings_manager: Arc::clone(&settings_manager),
        locator,
        probe,
        preview_manager,
        stream_controller,
        batch_converter,
        clipper,
        media_server,
        event_bus: event_bus.clone(),
        home_dir: dirs_next::home_dir(),
        auth_token,
    };

    // Host/port: env vars override settings; remote access disabled forces
    // loopback
    let (host, port) = {
        let settings_host = if settings.backend_remote_enabled {
            settings.backend_host.clone()
        } else {
            "127.0.0.1".to_string()
        };
        (
            env_host.unwrap_or(settings_host),
            env_port.unwrap_or(if settings.backend_port != 0 {
                settings.backend_port
            } else {
                DEFAULT_PORT
            }),
        )
    };

    let protected_routes = Router::new()
        .route("/api/config", get(get_config).post(update_config))
        .route("/api/save-browse-path", post(save_browse_path))
        .route("/api/test-ffmpeg", get(test_ffmpeg_handler))
        .route("/api/browse", get(files_browse))
        .route("/api/video-info", get(video_info_handler))
        .route("/api/video-stream", get(video_stream_handler))
        .route("/ws", get(ws_handler))
        // Preview sessions
        .route("/api/preview/start", post(preview_start))
        .route("/api/preview/status", get(preview_status))
        .route("/api/preview/stop", post(preview_stop))
        // Re-broadcast stream
        .route("/api/stream/start", post(stream_start))
        .route("/api/stream/stop", post(stream_stop))
        .route("/api/stream/pause", post(stream_pause))
        .route("/api/stream/resume", post(stream_resume))
        .route("/api/stream/seek", post(stream_seek))
        .route("/api/stream/status", get(stream_status))
        // Media server lifecycle
        .route("/api/media-server/start", post(media_server_start))
        .route("/api/media-server/status", get(media_server_status))
        .route("/api/media-server/test", get(media_server_test))
        // Batch conversion
        .route("/api/batch/start", post(batch_start))
        .route("/api/batch/status", get(batch_status))
        .route("/api/batch/stop", post(batch_stop))
        // Clips
        .route("/api/clip", post(clip_handler))
        .route("/api/check-output", post(check_output_handler))
        .route("/api/available-name", post(available_name_handler))
        .route("/api/open-output", post(open_output_handler))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    let public_routes = Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready));

    let mut app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state.clone())
        .layer(build_cors_layer());

    // Serve the player UI when present
    let ui_path = PathBuf::from(ui_dir);
    if ui_path.exists() {
        app = app.fallback_service(
            ServeDir::new(&ui_path).fallback(ServeFile::new(ui_path.join("index.html"))),
        );
    }

    let address = SocketAddr::new(parse_host(&host), port);
    println!("VodCast server starting on http://{address}");
    log::info!("VodCast backend listening on http://{address}");
    if state.auth_token.is_some() {
        log::info!("  Authentication: enabled");
    } else {
        log::info!("  Authentication: disabled (no token configured)");
    }

    let listener = tokio::net::TcpListener::bind(address).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state))
        .await?;

    Ok(())
}
