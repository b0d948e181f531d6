//! Live speech-to-text
//!
//! One worker per broadcasting channel drives the pipeline
//! `m3u8 poll -> new segment fetch -> TS download -> provider websocket
//! -> sentence assembly -> room broadcast`. The registry enforces at most
//! one worker per channel id.

pub mod live;
pub mod messages;
pub mod prerecorded;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Instant;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::{AsrConfig, SttConfig};
use crate::dictionary::Dictionary;
use crate::errors::AsrError;
use crate::hub::SubscriberHub;
use crate::models::WorkerDebugInfo;
use crate::refiner::RefinerHandle;
use crate::spacing::SpacingEngine;

/// Shared state a worker exposes for introspection.
pub struct WorkerStats {
    last_activity: StdMutex<Instant>,
    captions_emitted: AtomicU64,
    reconnect_count: AtomicU64,
    last_error: StdMutex<Option<String>>,
    buffer_preview: StdMutex<Option<String>>,
}

impl WorkerStats {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            last_activity: StdMutex::new(Instant::now()),
            captions_emitted: AtomicU64::new(0),
            reconnect_count: AtomicU64::new(0),
            last_error: StdMutex::new(None),
            buffer_preview: StdMutex::new(None),
        })
    }

    pub fn touch_activity(&self) {
        *self.last_activity.lock().unwrap() = Instant::now();
    }

    pub fn secs_since_activity(&self) -> f64 {
        self.last_activity.lock().unwrap().elapsed().as_secs_f64()
    }

    pub fn record_caption(&self) {
        self.captions_emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconnect(&self) {
        self.reconnect_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_last_error(&self, error: impl Into<String>) {
        *self.last_error.lock().unwrap() = Some(error.into());
    }

    pub fn set_buffer_preview(&self, preview: Option<String>) {
        *self.buffer_preview.lock().unwrap() = preview;
    }
}

/// Everything a worker needs besides its channel identity.
#[derive(Clone)]
pub struct WorkerContext {
    pub hub: SubscriberHub,
    pub dictionary: Arc<Dictionary>,
    pub spacing: Arc<SpacingEngine>,
    pub refiner: Option<RefinerHandle>,
    pub asr: AsrConfig,
    pub stt: SttConfig,
}

struct WorkerHandle {
    task: tokio::task::JoinHandle<()>,
    cancel: CancellationToken,
    stats: Arc<WorkerStats>,
}

/// Registry of live caption workers, keyed by channel id.
#[derive(Clone)]
pub struct LiveCaptionService {
    ctx: WorkerContext,
    workers: Arc<RwLock<HashMap<String, WorkerHandle>>>,
}

impl LiveCaptionService {
    pub fn new(ctx: WorkerContext) -> Self {
        Self {
            ctx,
            workers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Starts captioning a channel. An already-running worker for the
    /// same channel is stopped first, so at most one exists per channel.
    pub async fn start(&self, channel_id: &str, stream_url: &str) -> Result<(), AsrError> {
        if self.ctx.asr.api_key.is_empty() {
            return Err(AsrError::MissingCredential);
        }

        if self.is_running(channel_id).await {
            self.stop(channel_id).await;
        }

        info!("Starting STT for channel {}: {}", channel_id, stream_url);

        let cancel = CancellationToken::new();
        let stats = WorkerStats::new();
        let task = tokio::spawn(live::run_worker(
            self.ctx.clone(),
            channel_id.to_string(),
            stream_url.to_string(),
            cancel.clone(),
            stats.clone(),
        ));

        let mut workers = self.workers.write().await;
        workers.insert(
            channel_id.to_string(),
            WorkerHandle {
                task,
                cancel,
                stats,
            },
        );
        Ok(())
    }

    /// Stops a channel's worker: cancels the reconnect loop, drops the
    /// in-flight sentence buffer without emitting, clears room history.
    pub async fn stop(&self, channel_id: &str) {
        let handle = {
            let mut workers = self.workers.write().await;
            workers.remove(channel_id)
        };

        if let Some(handle) = handle {
            handle.cancel.cancel();
            let _ = handle.task.await;
        }

        self.ctx.hub.clear_history(channel_id).await;
        info!("Stopped STT for channel {}", channel_id);
    }

    pub async fn stop_all(&self) {
        let channel_ids: Vec<String> = {
            let workers = self.workers.read().await;
            workers.keys().cloned().collect()
        };
        for channel_id in &channel_ids {
            self.stop(channel_id).await;
        }
        info!("Stopped all STT channels ({})", channel_ids.len());
    }

    pub async fn is_running(&self, channel_id: &str) -> bool {
        let workers = self.workers.read().await;
        workers
            .get(channel_id)
            .map(|h| !h.task.is_finished())
            .unwrap_or(false)
    }

    pub async fn running_channels(&self) -> Vec<String> {
        let workers = self.workers.read().await;
        workers
            .iter()
            .filter(|(_, h)| !h.task.is_finished())
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub async fn debug_info(&self, channel_id: &str) -> WorkerDebugInfo {
        let workers = self.workers.read().await;
        match workers.get(channel_id) {
            Some(handle) => WorkerDebugInfo {
                channel_id: channel_id.to_string(),
                task_alive: !handle.task.is_finished(),
                last_provider_activity_secs_ago: Some(handle.stats.secs_since_activity()),
                captions_emitted: handle.stats.captions_emitted.load(Ordering::Relaxed),
                buffer_preview: handle.stats.buffer_preview.lock().unwrap().clone(),
                last_error: handle.stats.last_error.lock().unwrap().clone(),
                reconnect_count: handle.stats.reconnect_count.load(Ordering::Relaxed),
            },
            None => WorkerDebugInfo {
                channel_id: channel_id.to_string(),
                task_alive: false,
                last_provider_activity_secs_ago: None,
                captions_emitted: 0,
                buffer_preview: None,
                last_error: None,
                reconnect_count: 0,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn context_without_credential() -> WorkerContext {
        let config = Config::default();
        WorkerContext {
            hub: SubscriberHub::new(),
            dictionary: Arc::new(Dictionary::with_parliament_defaults()),
            spacing: Arc::new(SpacingEngine::disabled()),
            refiner: None,
            asr: config.asr.clone(),
            stt: config.stt.clone(),
        }
    }

    #[tokio::test]
    async fn start_without_credential_is_rejected() {
        let service = LiveCaptionService::new(context_without_credential());
        let result = service
            .start("ch14", "https://cdn.example/live/ch14/playlist.m3u8")
            .await;
        assert!(matches!(result, Err(AsrError::MissingCredential)));
        assert!(!service.is_running("ch14").await);
    }

    #[tokio::test]
    async fn debug_info_for_unknown_channel_is_inert() {
        let service = LiveCaptionService::new(context_without_credential());
        let info = service.debug_info("ch14").await;
        assert!(!info.task_alive);
        assert_eq!(info.captions_emitted, 0);
        assert!(info.last_provider_activity_secs_ago.is_none());
    }

    #[tokio::test]
    async fn stop_clears_room_history() {
        let ctx = context_without_credential();
        let hub = ctx.hub.clone();
        let service = LiveCaptionService::new(ctx);

        hub.broadcast_created(
            "ch14",
            crate::models::Subtitle {
                id: uuid::Uuid::new_v4(),
                room_id: "ch14".to_string(),
                text: "안녕하세요".to_string(),
                start_time_sec: 0.0,
                end_time_sec: 1.0,
                confidence: 0.9,
                speaker_label: None,
                created_at: chrono::Utc::now(),
                original_text: None,
            },
        )
        .await;

        service.stop("ch14").await;
        assert!(hub.history("ch14").await.is_empty());
    }
}
