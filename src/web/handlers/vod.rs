use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::VodTask;
use crate::web::AppState;

#[derive(Debug, Deserialize)]
pub struct StartSttRequest {
    #[serde(default)]
    pub video_url: Option<String>,
}

/// Kicks off VOD caption generation for a meeting. 409 while a task for
/// the same meeting is still active, 422 without a video URL.
pub async fn start_meeting_stt(
    Path(meeting_id): Path<Uuid>,
    State(state): State<AppState>,
    Json(request): Json<StartSttRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let video_url = match request.video_url {
        Some(url) if !url.trim().is_empty() => url,
        _ => return Err(AppError::validation("video_url is required")),
    };

    info!("VOD STT requested for meeting {}: {}", meeting_id, video_url);
    let task_id = state.vod.start_task(meeting_id, video_url)?;
    Ok(Json(json!({
        "task_id": task_id,
        "meeting_id": meeting_id,
        "status": "pending",
    })))
}

pub async fn meeting_stt_status(
    Path(meeting_id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<VodTask>, AppError> {
    state
        .vod
        .task_status(meeting_id)
        .map(Json)
        .ok_or_else(|| AppError::not_found("Caption task for meeting", meeting_id.to_string()))
}
