//! Thin Axum surface over [`crate::transcode::TranscodeService`]. Carries
//! none of the teacher's auth/social/chat machinery — it exists to exercise
//! the facade end to end over HTTP, translating facade results into status
//! codes the caller (a music server, not a browser) can act on.

use std::path::PathBuf;

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use futures::StreamExt;
use serde::Deserialize;
use tokio_stream::wrappers::ReceiverStream;

use crate::error::{AppError, Result};
use crate::transcode::{Intent, QualityPreset, TranscodeRequest};
use crate::utils::{serve_partial_file, validate_filename};
use crate::AppState;

pub fn create_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .route("/stream/:song_id/:preset", get(stream_handler))
        .route("/download/:song_id/:preset", get(download_handler))
        .route("/cache/invalidate/:song_id", post(invalidate_handler))
        .route("/cache/clear", post(clear_cache_handler))
        .route("/cache/size", get(cache_size_handler))
}

#[derive(Deserialize)]
struct SourceQuery {
    source: PathBuf,
}

fn parse_preset(raw: &str) -> Result<QualityPreset> {
    QualityPreset::parse(raw).ok_or_else(|| AppError::Validation(format!("unknown preset: {raw}")))
}

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.health.check().await;
    let http_status = match status.status {
        crate::health::ServiceStatus::Healthy => StatusCode::OK,
        crate::health::ServiceStatus::Degraded => StatusCode::OK,
        crate::health::ServiceStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (http_status, Json(status))
}

async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    let mut snapshot = state.metrics.get_metrics();
    if let Some(map) = snapshot.as_object_mut() {
        map.insert("pools".to_string(), state.transcode.pool_occupancy());
    }
    Json(snapshot)
}

/// Streams a transcode of `song_id` at `preset`. Tries the durable cache
/// first, then falls back to a live transcode; if neither can proceed right
/// now the caller is told via `503` to serve the original file itself.
async fn stream_handler(
    Path((song_id, preset)): Path<(String, String)>,
    Query(query): Query<SourceQuery>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response> {
    let song_id = validate_filename(&song_id)?;
    let preset = parse_preset(&preset)?;
    let req = TranscodeRequest {
        source: &query.source,
        song_id: &song_id,
        preset,
    };

    if let Some(cached) = state.transcode.get_cached_transcode(&req, Intent::Stream).await {
        state.transcode.mark_in_use(&song_id, preset);
        let response = serve_partial_file(
            cached.path,
            headers,
            state.config.server.max_range_bytes,
            cached.mime_type,
        )
        .await;
        state.transcode.release_in_use(&song_id, preset);
        return response;
    }

    if let Some(live) = state.transcode.start_live_transcode(&req).await {
        state.transcode.mark_in_use(&song_id, preset);
        let song_id_for_release = song_id.clone();
        let transcode = state.transcode.clone();
        let stream = ReceiverStream::new(live.bytes).map(Ok::<_, std::io::Error>);
        let body = Body::from_stream(stream);
        let eventual_file = live.eventual_file;
        tokio::spawn(async move {
            let _ = eventual_file.await;
            transcode.release_in_use(&song_id_for_release, preset);
        });
        return Ok((
            StatusCode::OK,
            [(axum::http::header::CONTENT_TYPE, live.mime_type)],
            body,
        )
            .into_response());
    }

    Err(AppError::ServiceUnavailable(
        "transcode unavailable, serve the original file".to_string(),
    ))
}

/// One-shot transcode for a full download, deleted once served.
async fn download_handler(
    Path((song_id, preset)): Path<(String, String)>,
    Query(query): Query<SourceQuery>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response> {
    let song_id = validate_filename(&song_id)?;
    let preset = parse_preset(&preset)?;
    let req = TranscodeRequest {
        source: &query.source,
        song_id: &song_id,
        preset,
    };

    let ephemeral = state
        .transcode
        .get_ephemeral_transcode(&req)
        .await
        .ok_or_else(|| AppError::ServiceUnavailable("transcode unavailable, serve the original file".to_string()))?;

    let response = serve_partial_file(
        ephemeral.path.clone(),
        headers,
        state.config.server.max_range_bytes,
        ephemeral.mime_type,
    )
    .await;
    let _ = tokio::fs::remove_file(&ephemeral.path).await;
    response
}

async fn invalidate_handler(Path(song_id): Path<String>, State(state): State<AppState>) -> Result<impl IntoResponse> {
    let song_id = validate_filename(&song_id)?;
    state.transcode.invalidate_song(&song_id).await;
    Ok(StatusCode::NO_CONTENT)
}

async fn clear_cache_handler(State(state): State<AppState>) -> Result<impl IntoResponse> {
    state.transcode.clear_cache().await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn cache_size_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({ "size_bytes": state.transcode.cache_size_bytes() }))
}
