use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::response::sse::{Event, Sse};
use axum::Json;
use futures::Stream;
use serde_json::json;
use tracing::info;

use crate::catalog;
use crate::errors::AppError;
use crate::status::{ChangeReceiver, StatusService};
use crate::web::AppState;

pub async fn list_channels() -> Json<&'static [catalog::Channel]> {
    Json(catalog::all())
}

pub async fn get_channel(
    Path(channel_id): Path<String>,
) -> Result<Json<&'static catalog::Channel>, AppError> {
    catalog::by_id(&channel_id)
        .map(Json)
        .ok_or_else(|| AppError::not_found("Channel", &channel_id))
}

/// Full catalog with live broadcast state and per-channel worker state.
/// Side effect: channels broadcasting without a worker are reconciled in
/// the background.
pub async fn channels_status(
    State(state): State<AppState>,
) -> Json<Vec<crate::models::ChannelStatusEntry>> {
    let mut entries = state.status.channels_with_status().await;
    for entry in &mut entries {
        entry.stt_running = state.stt.is_running(&entry.id).await;
    }

    if state.supervisor.enabled() {
        let supervisor = state.supervisor.clone();
        tokio::spawn(async move {
            supervisor.ensure_workers_for_live_channels().await;
        });
    }

    Json(entries)
}

struct SseContext {
    status: StatusService,
    rx: ChangeReceiver,
    sent_initial: bool,
}

/// SSE stream: the enriched channel list on connect, `status_change`
/// events on every diff batch, and keepalive comments on idle ticks
/// (each idle tick also refreshes the poller cache).
pub async fn stream_channel_status(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (_subscriber_id, rx) = state.status.subscribe().await;
    let ctx = SseContext {
        status: state.status.clone(),
        rx,
        sent_initial: false,
    };

    let stream = futures::stream::unfold(ctx, |mut ctx| async move {
        if !ctx.sent_initial {
            ctx.sent_initial = true;
            let channels = ctx.status.channels_with_status().await;
            let data = serde_json::to_string(&channels).unwrap_or_else(|_| "[]".to_string());
            return Some((Ok::<_, Infallible>(Event::default().data(data)), ctx));
        }

        match tokio::time::timeout(Duration::from_secs(5), ctx.rx.recv()).await {
            Ok(Some(changes)) => {
                let channels = ctx.status.channels_with_status().await;
                let payload = json!({"channels": channels, "changes": changes});
                let event = Event::default()
                    .event("status_change")
                    .data(payload.to_string());
                Some((Ok(event), ctx))
            }
            // Queue closed: this subscriber was evicted as a slow consumer.
            Ok(None) => None,
            Err(_) => {
                // Idle tick doubles as the polling trigger.
                ctx.status.fetch_snapshot().await;
                Some((Ok(Event::default().comment("keepalive")), ctx))
            }
        }
    });

    Sse::new(stream)
}

pub async fn start_channel_stt(
    Path(channel_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let channel = catalog::by_id(&channel_id)
        .ok_or_else(|| AppError::not_found("Channel", &channel_id))?;

    if state.stt.is_running(&channel_id).await {
        info!("STT start requested for {}: already running", channel_id);
        return Ok(Json(
            json!({"status": "already_running", "channel_id": channel_id}),
        ));
    }

    info!("STT start requested for {}: starting...", channel_id);
    state.stt.start(channel.id, channel.stream_url).await?;
    Ok(Json(json!({"status": "started", "channel_id": channel_id})))
}

pub async fn stop_channel_stt(
    Path(channel_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    if catalog::by_id(&channel_id).is_none() {
        return Err(AppError::not_found("Channel", &channel_id));
    }

    if !state.stt.is_running(&channel_id).await {
        info!("STT stop requested for {}: not running", channel_id);
        return Ok(Json(
            json!({"status": "not_running", "channel_id": channel_id}),
        ));
    }

    info!("STT stop requested for {}: stopping...", channel_id);
    state.stt.stop(&channel_id).await;
    Ok(Json(json!({"status": "stopped", "channel_id": channel_id})))
}

pub async fn channel_stt_status(
    Path(channel_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    if catalog::by_id(&channel_id).is_none() {
        return Err(AppError::not_found("Channel", &channel_id));
    }
    let running = state.stt.is_running(&channel_id).await;
    Ok(Json(json!({"running": running, "channel_id": channel_id})))
}

pub async fn channel_stt_debug(
    Path(channel_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    if catalog::by_id(&channel_id).is_none() {
        return Err(AppError::not_found("Channel", &channel_id));
    }
    let info = state.stt.debug_info(&channel_id).await;
    let active_rooms = state.hub.active_rooms().await;
    Ok(Json(json!({
        "worker": info,
        "active_rooms": active_rooms,
    })))
}
