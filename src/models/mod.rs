use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A finalized caption line as delivered to subscribers and persisted for
/// VOD meetings. `room_id` is a channel id for live captions and a meeting
/// id for VOD captions.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Subtitle {
    pub id: Uuid,
    pub room_id: String,
    pub text: String,
    pub start_time_sec: f64,
    pub end_time_sec: f64,
    pub confidence: f64,
    pub speaker_label: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Set only on history entries patched by a correction event.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[sqlx(default)]
    pub original_text: Option<String>,
}

/// Broadcast state of a channel as reported by the on-air endpoint.
///
/// Upstream reports integer codes; they are mapped here at the edge so the
/// rest of the engine never sees raw numbers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum BroadcastState {
    Pre,
    Live,
    Recess,
    Ended,
    #[serde(rename = "none")]
    NoBroadcast,
    Unknown,
}

impl BroadcastState {
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => Self::Pre,
            1 => Self::Live,
            2 => Self::Recess,
            3 => Self::Ended,
            4 => Self::NoBroadcast,
            _ => Self::Unknown,
        }
    }

    pub fn text(&self) -> &'static str {
        match self {
            Self::Pre => "방송전",
            Self::Live => "방송중",
            Self::Recess => "정회중",
            Self::Ended => "종료",
            Self::NoBroadcast => "생중계없음",
            Self::Unknown => "알수없음",
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self, Self::Live)
    }
}

/// Session identifiers attached to a channel's broadcast schedule.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ScheduleInfo {
    pub session_no: i64,
    pub session_order: i64,
}

/// A single state transition detected by the live-status poller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusChange {
    pub code: String,
    pub old_status: Option<BroadcastState>,
    pub new_status: Option<BroadcastState>,
    pub old_text: Option<String>,
    pub new_text: Option<String>,
}

/// Catalog entry enriched with live broadcast state, returned by the
/// channel status endpoint and the SSE stream.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelStatusEntry {
    pub id: String,
    pub name: String,
    pub code: String,
    pub stream_url: String,
    pub livestatus: BroadcastState,
    pub status_text: String,
    pub has_schedule: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_no: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_order: Option<i64>,
    pub stt_running: bool,
}

/// Lifecycle states of a VOD caption-generation task.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VodTaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl VodTaskStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Running)
    }
}

/// In-memory state of one VOD caption-generation task, keyed by meeting id.
#[derive(Debug, Clone, Serialize)]
pub struct VodTask {
    pub task_id: Uuid,
    pub meeting_id: Uuid,
    pub status: VodTaskStatus,
    /// 0.0 ..= 1.0
    pub progress: f32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Meeting lifecycle states the engine writes to the durable store.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MeetingStatus {
    Processing,
    Ended,
}

impl MeetingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::Ended => "ended",
        }
    }
}

/// Messages delivered to room subscribers over the WebSocket.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload")]
pub enum RoomMessage {
    #[serde(rename = "subtitle_history")]
    History { subtitles: Vec<Subtitle> },
    #[serde(rename = "subtitle_interim")]
    Interim { text: String, channel_id: String },
    #[serde(rename = "subtitle_created")]
    Created { subtitle: Subtitle },
    #[serde(rename = "subtitle_corrected")]
    Corrected { id: Uuid, corrected_text: String },
}

/// Debug snapshot of one live caption worker.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerDebugInfo {
    pub channel_id: String,
    pub task_alive: bool,
    pub last_provider_activity_secs_ago: Option<f64>,
    pub captions_emitted: u64,
    pub buffer_preview: Option<String>,
    pub last_error: Option<String>,
    pub reconnect_count: u64,
}
