use serde::Serialize;

use crate::errors::{safe_emit_event, safe_state_update, EventSink, SharedQueue};
use crate::models::AudioTrack;

/// State transitions published by the upload controller
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum QueueEvent {
    FilesQueued { filenames: Vec<String> },
    FileRemoved { filename: String },
    QueueStarted { run_id: String, pending: usize },
    UploadStarted { filename: String, size: u64 },
    UploadProgress { filename: String, progress: u8 },
    UploadSucceeded { filename: String, size: u64, track: AudioTrack },
    UploadFailed { filename: String, size: u64, error: String },
    QueueCancelled { filename: String },
    QueueFinished { uploaded: usize },
}

impl QueueEvent {
    pub fn name(&self) -> &'static str {
        match self {
            QueueEvent::FilesQueued { .. } => "files-queued",
            QueueEvent::FileRemoved { .. } => "file-removed",
            QueueEvent::QueueStarted { .. } => "queue-started",
            QueueEvent::UploadStarted { .. } => "upload-started",
            QueueEvent::UploadProgress { .. } => "upload-progress",
            QueueEvent::UploadSucceeded { .. } => "upload-succeeded",
            QueueEvent::UploadFailed { .. } => "upload-failed",
            QueueEvent::QueueCancelled { .. } => "queue-cancelled",
            QueueEvent::QueueFinished { .. } => "queue-finished",
        }
    }
}

/// Whole-percent progress, floored. An empty body reports 0.
pub fn compute_progress(bytes_sent: u64, bytes_total: u64) -> u8 {
    if bytes_total == 0 {
        return 0;
    }
    let percent = (bytes_sent.min(bytes_total) as u128 * 100) / bytes_total as u128;
    percent as u8
}

/// Write a progress report back into the queue through a whole-record update.
///
/// Reports for an upload that is no longer in flight (finished, cancelled or
/// superseded by a newer run) are dropped. Returns the new percentage when it
/// changed.
pub fn update_file_progress(
    state: &SharedQueue,
    events: Option<&EventSink>,
    filename: &str,
    generation: u64,
    bytes_sent: u64,
    bytes_total: u64,
) -> Option<u8> {
    let progress = compute_progress(bytes_sent, bytes_total);

    let changed = safe_state_update(state, "progress update", |queue| {
        if !queue.is_current(filename, generation) {
            return false;
        }
        let Some(mut file) = queue.get(filename).cloned() else {
            return false;
        };
        if file.upload_progress == progress {
            return false;
        }
        file.upload_progress = progress;
        queue.update(file)
    })
    .unwrap_or(false);

    if !changed {
        return None;
    }

    log::debug!(
        "Progress: {} {}% ({}/{} bytes)",
        filename,
        progress,
        bytes_sent,
        bytes_total
    );
    safe_emit_event(
        events,
        QueueEvent::UploadProgress {
            filename: filename.to_string(),
            progress,
        },
    );
    Some(progress)
}
