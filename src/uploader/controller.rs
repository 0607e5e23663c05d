use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::errors::{
    safe_emit_event, safe_state_read, safe_state_update, AppError, EventSink, SharedQueue,
};
use crate::models::AudioTrack;
use crate::security::InputValidator;

use super::progress_tracker::{update_file_progress, QueueEvent};
use super::queue::{InFlight, QueueState, QueuedFile};
use super::transport::{ProgressCallback, TrackUpload, UploadTransport};

type Claimed = (QueuedFile, InFlight, watch::Receiver<bool>);

/// How a queue run ended
#[derive(Debug, Clone, PartialEq)]
pub enum QueueOutcome {
    /// Every queued file was uploaded
    Completed { uploaded: usize },
    /// A file failed; the run halted with it and everything behind it still queued
    Failed {
        filename: String,
        error: String,
        uploaded: usize,
    },
    /// The user cancelled while `filename` was in flight
    Cancelled { filename: String, uploaded: usize },
}

impl QueueOutcome {
    pub fn uploaded(&self) -> usize {
        match self {
            QueueOutcome::Completed { uploaded }
            | QueueOutcome::Failed { uploaded, .. }
            | QueueOutcome::Cancelled { uploaded, .. } => *uploaded,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, QueueOutcome::Failed { .. })
    }
}

enum FileResult {
    Uploaded(AudioTrack),
    Failed(AppError),
    Cancelled,
}

enum Advance {
    Next(Claimed),
    Finished,
    Superseded,
}

/// Serialises uploads of queued files, one request in flight at a time
pub struct UploadController<T: UploadTransport> {
    state: SharedQueue,
    transport: Arc<T>,
    events: Option<EventSink>,
}

impl<T: UploadTransport> UploadController<T> {
    pub fn new(transport: T) -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState::new())),
            transport: Arc::new(transport),
            events: None,
        }
    }

    pub fn with_events(transport: T, events: EventSink) -> Self {
        Self {
            events: Some(events),
            ..Self::new(transport)
        }
    }

    pub fn state(&self) -> SharedQueue {
        self.state.clone()
    }

    pub fn files(&self) -> Vec<QueuedFile> {
        safe_state_read(&self.state, "list files", |queue| queue.files().to_vec())
            .unwrap_or_default()
    }

    pub fn get(&self, filename: &str) -> Option<QueuedFile> {
        safe_state_read(&self.state, "get file", |queue| queue.get(filename).cloned()).flatten()
    }

    pub fn is_running(&self) -> bool {
        safe_state_read(&self.state, "running check", |queue| queue.is_running())
            .unwrap_or(false)
    }

    pub fn current_filename(&self) -> Option<String> {
        safe_state_read(&self.state, "current file", |queue| {
            queue.current_filename().map(str::to_string)
        })
        .flatten()
    }

    /// Add files under their filenames with default metadata; same name overwrites
    pub fn enqueue(&self, files: Vec<QueuedFile>) -> usize {
        let filenames: Vec<String> = files.iter().map(|f| f.filename.clone()).collect();
        let added = safe_state_update(&self.state, "enqueue", |queue| {
            for file in files {
                queue.enqueue(file);
            }
            filenames.len()
        })
        .unwrap_or(0);

        if added > 0 {
            log::info!("Queued {} file(s) for upload", added);
            safe_emit_event(self.events.as_ref(), QueueEvent::FilesQueued { filenames });
        }
        added
    }

    /// Validate selected paths and queue the acceptable ones.
    ///
    /// Rejected paths are returned with the reason and never touch the queue.
    pub fn enqueue_paths(&self, paths: &[String], max_bytes: u64) -> Vec<(String, AppError)> {
        let mut accepted = Vec::new();
        let mut rejected = Vec::new();

        for path in paths {
            match InputValidator::validate_audio_file(path, max_bytes) {
                Ok(size) => accepted.push(QueuedFile::new(path.as_str(), size)),
                Err(e) => {
                    log::warn!("Rejected {}: {}", path, e);
                    rejected.push((path.clone(), e));
                }
            }
        }

        self.enqueue(accepted);
        rejected
    }

    /// Replace a queued record wholesale. False when the filename is not queued.
    pub fn update(&self, file: QueuedFile) -> bool {
        let filename = file.filename.clone();
        let updated =
            safe_state_update(&self.state, "update file", |queue| queue.update(file))
                .unwrap_or(false);
        if !updated {
            log::debug!("Ignoring update for {}: not queued", filename);
        }
        updated
    }

    /// Apply an edit to a queued file's record
    pub fn edit<F>(&self, filename: &str, f: F) -> bool
    where
        F: FnOnce(&mut QueuedFile),
    {
        match self.get(filename) {
            Some(mut file) => {
                f(&mut file);
                self.update(file)
            }
            None => false,
        }
    }

    /// Drop a file from the queue; absent filenames are ignored
    pub fn remove(&self, filename: &str) -> bool {
        let removed = safe_state_update(&self.state, "remove file", |queue| {
            queue.remove(filename).is_some()
        })
        .unwrap_or(false);

        if removed {
            safe_emit_event(
                self.events.as_ref(),
                QueueEvent::FileRemoved {
                    filename: filename.to_string(),
                },
            );
        }
        removed
    }

    /// Start uploading. Returns the worker handle, or None when the queue is
    /// already running or has nothing to upload.
    pub fn start(&self) -> Option<JoinHandle<QueueOutcome>> {
        let (claimed, pending) = safe_state_update(&self.state, "start", |queue| {
            if queue.is_running() {
                return None;
            }
            let pending = (queue.len(), queue.total_bytes());
            queue.claim_next().map(|claimed| (claimed, pending))
        })
        .flatten()?;
        let (pending, total_bytes) = pending;

        let run_id = uuid::Uuid::new_v4().to_string();
        log::info!(
            "Starting upload run {} with {} file(s), {} bytes",
            run_id,
            pending,
            total_bytes
        );
        safe_emit_event(
            self.events.as_ref(),
            QueueEvent::QueueStarted {
                run_id: run_id.clone(),
                pending,
            },
        );

        Some(tokio::spawn(process_upload_queue(
            self.state.clone(),
            self.transport.clone(),
            self.events.clone(),
            run_id,
            claimed,
        )))
    }

    /// Abort the in-flight upload and stop the queue. No-op when nothing is uploading.
    pub fn cancel(&self) -> bool {
        let cancelled = safe_state_update(&self.state, "cancel", |queue| queue.cancel_current())
            .flatten();

        match cancelled {
            Some(in_flight) => {
                log::info!("Cancelled upload of {}", in_flight.filename);
                safe_emit_event(
                    self.events.as_ref(),
                    QueueEvent::QueueCancelled {
                        filename: in_flight.filename,
                    },
                );
                true
            }
            None => {
                log::debug!("Cancel requested with no upload in flight");
                false
            }
        }
    }
}

/// Worker loop: uploads claimed files one by one until the queue drains,
/// a file fails, or the run is cancelled
async fn process_upload_queue<T: UploadTransport>(
    state: SharedQueue,
    transport: Arc<T>,
    events: Option<EventSink>,
    run_id: String,
    first: Claimed,
) -> QueueOutcome {
    let mut uploaded = 0;
    let mut next = Some(first);

    while let Some((file, in_flight, cancel_rx)) = next.take() {
        let generation = in_flight.generation;
        log::info!(
            "[{}] Uploading {} ({:.2} MB)",
            run_id,
            file.filename,
            file.size_mb()
        );
        safe_emit_event(
            events.as_ref(),
            QueueEvent::UploadStarted {
                filename: file.filename.clone(),
                size: file.size,
            },
        );

        match upload_file(&state, transport.as_ref(), events.as_ref(), &file, generation, cancel_rx)
            .await
        {
            FileResult::Uploaded(track) => {
                let advance = safe_state_update(&state, "upload success", |queue| {
                    if !queue.complete_current(generation) {
                        return Advance::Superseded;
                    }
                    match queue.claim_next() {
                        Some(claimed) => Advance::Next(claimed),
                        None => Advance::Finished,
                    }
                })
                .unwrap_or(Advance::Superseded);

                if let Advance::Superseded = advance {
                    log::info!(
                        "[{}] {} finished after the run was cancelled; leaving it queued",
                        run_id,
                        file.filename
                    );
                    return QueueOutcome::Cancelled {
                        filename: file.filename,
                        uploaded,
                    };
                }

                uploaded += 1;
                log::info!(
                    "[{}] Uploaded {} as track #{}",
                    run_id,
                    file.filename,
                    track.id
                );
                safe_emit_event(
                    events.as_ref(),
                    QueueEvent::UploadSucceeded {
                        filename: file.filename.clone(),
                        size: file.size,
                        track,
                    },
                );

                match advance {
                    Advance::Next(claimed) => next = Some(claimed),
                    _ => {
                        log::info!("[{}] Queue drained, {} file(s) uploaded", run_id, uploaded);
                        safe_emit_event(events.as_ref(), QueueEvent::QueueFinished { uploaded });
                        return QueueOutcome::Completed { uploaded };
                    }
                }
            }
            FileResult::Failed(error) => {
                let message = error.to_string();
                let halted = safe_state_update(&state, "upload failure", |queue| {
                    queue.fail_current(generation, &message)
                })
                .unwrap_or(false);

                if !halted {
                    return QueueOutcome::Cancelled {
                        filename: file.filename,
                        uploaded,
                    };
                }

                log::error!(
                    "[{}] Upload of {} failed, stopping queue: {}",
                    run_id,
                    file.filename,
                    message
                );
                if error.is_retryable() {
                    log::info!(
                        "[{}] {} may succeed if the queue is started again",
                        run_id,
                        file.filename
                    );
                }
                safe_emit_event(
                    events.as_ref(),
                    QueueEvent::UploadFailed {
                        filename: file.filename.clone(),
                        size: file.size,
                        error: message.clone(),
                    },
                );
                return QueueOutcome::Failed {
                    filename: file.filename,
                    error: message,
                    uploaded,
                };
            }
            FileResult::Cancelled => {
                log::info!("[{}] Run stopped while uploading {}", run_id, file.filename);
                return QueueOutcome::Cancelled {
                    filename: file.filename,
                    uploaded,
                };
            }
        }
    }

    QueueOutcome::Completed { uploaded }
}

async fn upload_file<T: UploadTransport>(
    state: &SharedQueue,
    transport: &T,
    events: Option<&EventSink>,
    file: &QueuedFile,
    generation: u64,
    mut cancel_rx: watch::Receiver<bool>,
) -> FileResult {
    let progress_state = state.clone();
    let progress_events = events.cloned();
    let filename = file.filename.clone();
    let on_progress: ProgressCallback = Arc::new(move |sent, total| {
        update_file_progress(
            &progress_state,
            progress_events.as_ref(),
            &filename,
            generation,
            sent,
            total,
        );
    });

    let upload = TrackUpload::from_queued(file);

    tokio::select! {
        biased;
        _ = wait_for_cancel(&mut cancel_rx) => FileResult::Cancelled,
        result = transport.upload(upload, on_progress) => match result {
            Ok(track) => FileResult::Uploaded(track),
            Err(e) => FileResult::Failed(e),
        },
    }
}

async fn wait_for_cancel(cancel_rx: &mut watch::Receiver<bool>) {
    loop {
        if *cancel_rx.borrow_and_update() {
            return;
        }
        if cancel_rx.changed().await.is_err() {
            // Handle dropped without cancelling: this upload can no longer be cancelled
            std::future::pending::<()>().await;
        }
    }
}
