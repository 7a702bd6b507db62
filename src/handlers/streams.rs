//! HTTP handlers for stream lifecycle, artifacts, and viewer moderation

use crate::broadcast;
use crate::error::AppError;
use crate::hls::{is_segment_filename, MANIFEST_FILENAME};
use crate::state::AppState;
use crate::stream::{self, EndOutcome, JoinViewerRequest, StartResponse};
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::sync::Arc;
use uuid::Uuid;

pub async fn start_stream(
    State(state): State<Arc<AppState>>,
    Path(stream_id): Path<String>,
) -> Result<(StatusCode, Json<StartResponse>), AppError> {
    let started = stream::create(&state, &stream_id).await?;
    Ok((StatusCode::CREATED, Json(started)))
}

pub async fn ingest_chunk(
    State(state): State<Arc<AppState>>,
    Path(stream_id): Path<String>,
    body: Bytes,
) -> Result<Json<serde_json::Value>, AppError> {
    let index = stream::ingest_chunk(&state, &stream_id, &body).await?;
    Ok(Json(serde_json::json!({ "segment_index": index })))
}

pub async fn end_stream(
    State(state): State<Arc<AppState>>,
    Path(stream_id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let status = match stream::end(&state, &stream_id).await? {
        EndOutcome::Ended => "ended",
        EndOutcome::AlreadyEnded => "already-ended",
    };
    Ok(Json(serde_json::json!({ "status": status })))
}

/// Tag-only signal for externally managed metadata edits.
pub async fn announce_stream_update(
    State(state): State<Arc<AppState>>,
    Path(_stream_id): Path<String>,
) -> Json<serde_json::Value> {
    broadcast::stream_updated(&state).await;
    Json(serde_json::json!({ "status": "broadcast" }))
}

/// Manifest serving reads straight from disk; it works even with the
/// persistent store down.
pub async fn get_playlist(
    State(state): State<Arc<AppState>>,
    Path(stream_id): Path<String>,
) -> Result<Response, AppError> {
    serve_artifact(&state, &stream_id, MANIFEST_FILENAME, "application/vnd.apple.mpegurl").await
}

pub async fn get_segment(
    State(state): State<Arc<AppState>>,
    Path((stream_id, filename)): Path<(String, String)>,
) -> Result<Response, AppError> {
    if !is_segment_filename(&filename) {
        return Err(AppError::Validation("invalid segment name".to_string()));
    }
    serve_artifact(&state, &stream_id, &filename, "video/mp2t").await
}

async fn serve_artifact(
    state: &AppState,
    stream_id: &str,
    filename: &str,
    content_type: &'static str,
) -> Result<Response, AppError> {
    stream::validate_stream_id(stream_id)?;
    let path = state.segments.stream_dir(stream_id).join(filename);
    let data = tokio::fs::read(&path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            AppError::NotActive
        } else {
            AppError::from(e)
        }
    })?;
    Ok(([(header::CONTENT_TYPE, content_type)], data).into_response())
}

pub async fn join_viewer(
    State(state): State<Arc<AppState>>,
    Path(stream_id): Path<String>,
    Json(request): Json<JoinViewerRequest>,
) -> Result<(StatusCode, Json<stream::ViewerSession>), AppError> {
    let session = stream::join_viewer(&state, &stream_id, request).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

pub async fn kick_viewer(
    State(state): State<Arc<AppState>>,
    Path((stream_id, session_id)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, AppError> {
    stream::kick_viewer(&state, &stream_id, &session_id).await?;
    Ok(Json(serde_json::json!({ "status": "kicked" })))
}

pub async fn ban_viewer(
    State(state): State<Arc<AppState>>,
    Path((stream_id, session_id)): Path<(String, String)>,
) -> Result<Json<stream::ViewerSession>, AppError> {
    let session = stream::set_viewer_banned(&state, &stream_id, &session_id, true).await?;
    Ok(Json(session))
}

pub async fn unban_viewer(
    State(state): State<Arc<AppState>>,
    Path((stream_id, session_id)): Path<(String, String)>,
) -> Result<Json<stream::ViewerSession>, AppError> {
    let session = stream::set_viewer_banned(&state, &stream_id, &session_id, false).await?;
    Ok(Json(session))
}

/// External collaborators push notification signals through here; the
/// fan-out itself stays inside this service.
pub async fn notify_user(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<Uuid>,
) -> Json<serde_json::Value> {
    broadcast::notification(&state, user_id).await;
    Json(serde_json::json!({ "status": "sent" }))
}
