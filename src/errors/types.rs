//! Error type definitions for the caption engine
//!
//! This module defines all error types used throughout the application,
//! providing a hierarchical error system that makes debugging and error
//! handling more straightforward.

use thiserror::Error;

/// Top-level application error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Live-status poller errors
    #[error("Status error: {0}")]
    Status(#[from] StatusError),

    /// ASR provider errors
    #[error("ASR error: {0}")]
    Asr(#[from] AsrError),

    /// VOD pipeline errors
    #[error("VOD error: {0}")]
    Vod(#[from] VodError),

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Validation errors
    #[error("Validation error: {message}")]
    Validation { message: String },

    /// Resource not found errors
    #[error("{resource} {id} not found")]
    NotFound { resource: String, id: String },

    /// HTTP client errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Live-status poller specific errors
#[derive(Error, Debug)]
pub enum StatusError {
    /// Upstream returned something that is not the expected JSON array
    #[error("Unexpected on-air response: {message}")]
    UnexpectedResponse { message: String },

    /// Network failure talking to the on-air endpoint
    #[error("On-air request failed: {0}")]
    Request(#[from] reqwest::Error),
}

/// ASR provider specific errors
#[derive(Error, Debug)]
pub enum AsrError {
    /// No provider credential configured
    #[error("ASR provider key not configured")]
    MissingCredential,

    /// WebSocket transport failure
    #[error("ASR websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Provider frame that could not be decoded
    #[error("Invalid ASR frame: {0}")]
    InvalidFrame(#[from] serde_json::Error),

    /// Pre-recorded API call failed
    #[error("ASR API error: status {status} - {message}")]
    Api { status: u16, message: String },

    /// Network failure on the pre-recorded path
    #[error("ASR request failed: {0}")]
    Request(#[from] reqwest::Error),
}

/// VOD pipeline specific errors
#[derive(Error, Debug)]
pub enum VodError {
    /// Another task for the same meeting is still pending or running
    #[error("Caption task already active for meeting {meeting_id}")]
    TaskAlreadyActive { meeting_id: String },

    /// MP4 origin could not be resolved to a direct media URL
    #[error("VOD origin resolution failed: {message}")]
    OriginResolution { message: String },

    /// MP4 download failed
    #[error("VOD download failed: {message}")]
    Download { message: String },

    /// ASR transcription of the asset failed
    #[error("VOD transcription failed: {0}")]
    Transcription(#[from] AsrError),

    /// Durable store write failed
    #[error("VOD persistence failed: {0}")]
    Persistence(#[from] sqlx::Error),

    /// Scratch-file handling failed
    #[error("VOD scratch file error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn not_found<R: Into<String>, I: Into<String>>(resource: R, id: I) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: id.into(),
        }
    }
}

/// Maps engine errors onto the HTTP boundary. User-level failures keep
/// their 4xx class; everything else is a 500 with the message preserved.
impl axum::response::IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;

        let status = match &self {
            AppError::NotFound { .. } => StatusCode::NOT_FOUND,
            AppError::Validation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Vod(VodError::TaskAlreadyActive { .. }) => StatusCode::CONFLICT,
            AppError::Asr(AsrError::MissingCredential)
            | AppError::Vod(VodError::Transcription(AsrError::MissingCredential)) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            AppError::Configuration { .. } => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = axum::Json(serde_json::json!({"detail": self.to_string()}));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;

    #[test]
    fn user_level_errors_keep_their_status_class() {
        let resp = AppError::not_found("Channel", "ch99").into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = AppError::validation("video_url is required").into_response();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let resp = AppError::Vod(VodError::TaskAlreadyActive {
            meeting_id: "m1".to_string(),
        })
        .into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let resp = AppError::Asr(AsrError::MissingCredential).into_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
