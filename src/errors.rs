use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;

use crate::uploader::queue::QueueState;
use crate::uploader::QueueEvent;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid API URL: {url}")]
    InvalidApiUrl { url: String },

    #[error("File not found: {path}")]
    FileNotFound { path: String },

    #[error("Invalid file type: {path}. Only aac, mp3, ogg, wav, flac and mpeg files are supported.")]
    InvalidFileType { path: String },

    #[error("File too large: {path}. Maximum size is {max_mb}MB.")]
    FileTooLarge { path: String, max_mb: u64 },

    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    #[error("Server responded with {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Authentication rejected by server: {message}")]
    Unauthorized { message: String },

    #[error("Not logged in. Run `soundfleet-uploader login` first.")]
    NotAuthenticated,

    #[error("Upload failed: {reason}")]
    UploadFailed { reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Custom result type
pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn validation(field: &str, message: &str) -> Self {
        Self::Validation {
            field: field.to_string(),
            message: message.to_string(),
        }
    }

    pub fn file_not_found(path: &str) -> Self {
        Self::FileNotFound {
            path: path.to_string(),
        }
    }

    pub fn invalid_file_type(path: &str) -> Self {
        Self::InvalidFileType {
            path: path.to_string(),
        }
    }

    pub fn file_too_large(path: &str, max_bytes: u64) -> Self {
        Self::FileTooLarge {
            path: path.to_string(),
            max_mb: max_bytes / (1024 * 1024),
        }
    }

    pub fn invalid_api_url(url: &str) -> Self {
        Self::InvalidApiUrl {
            url: url.to_string(),
        }
    }

    pub fn api(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        if status == 401 {
            Self::Unauthorized { message }
        } else {
            Self::Api { status, message }
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Network(_) | AppError::Io(_) | AppError::UploadFailed { .. } => true,
            AppError::Api { status, .. } => matches!(status, 429 | 500 | 502 | 503 | 504),
            _ => false,
        }
    }
}

/// Queue state shared between the controller, its worker and progress callbacks
pub type SharedQueue = Arc<Mutex<QueueState>>;

/// Event channel the controller publishes queue transitions on
pub type EventSink = UnboundedSender<QueueEvent>;

/// Safe queue state update
pub fn safe_state_update<F, R>(state: &SharedQueue, operation: &str, f: F) -> Option<R>
where
    F: FnOnce(&mut QueueState) -> R,
{
    match state.lock() {
        Ok(mut queue) => Some(f(&mut queue)),
        Err(e) => {
            log::error!(
                "Failed to acquire queue lock for {} (non-critical): {}",
                operation,
                e
            );
            None
        }
    }
}

pub fn safe_state_read<F, R>(state: &SharedQueue, operation: &str, f: F) -> Option<R>
where
    F: FnOnce(&QueueState) -> R,
{
    match state.lock() {
        Ok(queue) => Some(f(&queue)),
        Err(e) => {
            log::error!(
                "Failed to acquire queue lock for {} (non-critical): {}",
                operation,
                e
            );
            None
        }
    }
}

/// Publish a queue event; a closed channel only means nobody is listening
pub fn safe_emit_event(events: Option<&EventSink>, event: QueueEvent) -> bool {
    let Some(sink) = events else {
        return false;
    };

    let name = event.name();
    match sink.send(event) {
        Ok(_) => {
            log::trace!("Emitted queue event '{}'", name);
            true
        }
        Err(e) => {
            log::warn!("Failed to emit event '{}' (non-critical): {}", name, e);
            false
        }
    }
}
