use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;

use crate::models::TrackType;

/// A file waiting in (or moving through) the upload queue
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueuedFile {
    pub filename: String,
    pub path: PathBuf,
    pub size: u64,
    pub track_type: TrackType,
    pub artist: String,
    pub title: String,
    pub genre: String,
    pub upload_progress: u8,
    pub error: Option<String>,
}

impl QueuedFile {
    /// New queue entry with default metadata
    pub fn new(path: impl Into<PathBuf>, size: u64) -> Self {
        let path = path.into();
        let filename = filename_of(&path);
        Self {
            filename,
            path,
            size,
            track_type: TrackType::Music,
            artist: String::new(),
            title: String::new(),
            genre: String::new(),
            upload_progress: 0,
            error: None,
        }
    }

    pub fn size_mb(&self) -> f64 {
        self.size as f64 / (1024.0 * 1024.0)
    }
}

pub fn filename_of(path: &Path) -> String {
    path.file_name()
        .unwrap_or_default()
        .to_string_lossy()
        .to_string()
}

/// Abort handle for the request currently in flight
#[derive(Debug, Clone)]
pub struct CancelHandle {
    sender: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (sender, receiver) = watch::channel(false);
        (
            Self {
                sender: Arc::new(sender),
            },
            receiver,
        )
    }

    pub fn cancel(&self) {
        // The worker may already have dropped its receiver
        self.sender.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }
}

/// The upload that currently owns the network
#[derive(Debug, Clone)]
pub struct InFlight {
    pub filename: String,
    pub generation: u64,
    pub cancel: CancelHandle,
}

/// Ordered queue contents plus the running/current-upload bookkeeping.
///
/// Invariant: `running` implies `current.is_some()`. The controller claims the
/// next file in the same critical section that sets `running`, and clears
/// `running` in the same section that finds the queue empty.
#[derive(Debug, Default)]
pub struct QueueState {
    files: Vec<QueuedFile>,
    current: Option<InFlight>,
    running: bool,
    generation: u64,
}

impl QueueState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite by filename. An overwritten entry keeps its position.
    pub fn enqueue(&mut self, file: QueuedFile) {
        match self.position(&file.filename) {
            Some(index) => self.files[index] = file,
            None => self.files.push(file),
        }
    }

    /// Whole-record replacement. Returns false when the filename is not queued.
    pub fn update(&mut self, file: QueuedFile) -> bool {
        match self.position(&file.filename) {
            Some(index) => {
                self.files[index] = file;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, filename: &str) -> Option<QueuedFile> {
        self.position(filename).map(|index| self.files.remove(index))
    }

    pub fn get(&self, filename: &str) -> Option<&QueuedFile> {
        self.files.iter().find(|f| f.filename == filename)
    }

    pub fn get_mut(&mut self, filename: &str) -> Option<&mut QueuedFile> {
        self.files.iter_mut().find(|f| f.filename == filename)
    }

    pub fn files(&self) -> &[QueuedFile] {
        &self.files
    }

    pub fn filenames(&self) -> Vec<String> {
        self.files.iter().map(|f| f.filename.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn current(&self) -> Option<&InFlight> {
        self.current.as_ref()
    }

    pub fn current_filename(&self) -> Option<&str> {
        self.current.as_ref().map(|c| c.filename.as_str())
    }

    pub fn is_current(&self, filename: &str, generation: u64) -> bool {
        self.current
            .as_ref()
            .is_some_and(|c| c.generation == generation && c.filename == filename)
    }

    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }

    /// Claim the first queued file for upload.
    ///
    /// Returns None (and stops running) when the queue is empty. Does nothing
    /// while another upload is in flight. Error and progress left on the claimed
    /// file by an earlier attempt are reset.
    pub fn claim_next(&mut self) -> Option<(QueuedFile, InFlight, watch::Receiver<bool>)> {
        if self.current.is_some() {
            return None;
        }

        let Some(first) = self.files.first_mut() else {
            self.running = false;
            return None;
        };
        first.error = None;
        first.upload_progress = 0;
        let first = first.clone();

        self.generation += 1;
        let (cancel, receiver) = CancelHandle::new();
        let in_flight = InFlight {
            filename: first.filename.clone(),
            generation: self.generation,
            cancel,
        };

        self.running = true;
        self.current = Some(in_flight.clone());
        Some((first, in_flight, receiver))
    }

    /// Successful upload of the in-flight file: drop it from the queue and free the slot.
    ///
    /// Returns false only when `generation` no longer owns the slot. The entry
    /// may already have been removed by the user while it was uploading.
    pub fn complete_current(&mut self, generation: u64) -> bool {
        let Some(current) = self.take_current(generation) else {
            return false;
        };
        self.remove(&current.filename);
        true
    }

    /// Failed upload: record the error on the file and halt the whole queue
    pub fn fail_current(&mut self, generation: u64, error: &str) -> bool {
        let Some(current) = self.take_current(generation) else {
            return false;
        };
        if let Some(file) = self.get_mut(&current.filename) {
            file.error = Some(error.to_string());
        }
        self.running = false;
        true
    }

    /// Abort the in-flight upload and stop. The file stays queued untouched.
    pub fn cancel_current(&mut self) -> Option<InFlight> {
        let current = self.current.take()?;
        current.cancel.cancel();
        self.running = false;
        Some(current)
    }

    fn position(&self, filename: &str) -> Option<usize> {
        self.files.iter().position(|f| f.filename == filename)
    }

    fn take_current(&mut self, generation: u64) -> Option<InFlight> {
        if self.current.as_ref().is_some_and(|c| c.generation == generation) {
            self.current.take()
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str) -> QueuedFile {
        QueuedFile::new(format!("/music/{}", name), 1024)
    }

    #[test]
    fn test_enqueue_uses_defaults() {
        let mut state = QueueState::new();
        for name in ["a.mp3", "b.wav", "c.flac"] {
            state.enqueue(file(name));
        }

        assert_eq!(state.len(), 3);
        for queued in state.files() {
            assert_eq!(queued.upload_progress, 0);
            assert_eq!(queued.track_type, TrackType::Music);
            assert!(queued.artist.is_empty() && queued.title.is_empty() && queued.genre.is_empty());
            assert!(queued.error.is_none());
        }
        assert!(!state.is_running());
        assert!(state.current().is_none());
    }

    #[test]
    fn test_enqueue_same_filename_overwrites_in_place() {
        let mut state = QueueState::new();
        state.enqueue(file("a.mp3"));
        state.enqueue(file("b.mp3"));

        let replacement = QueuedFile::new("/other/a.mp3", 4096);
        state.enqueue(replacement);

        assert_eq!(state.filenames(), vec!["a.mp3", "b.mp3"]);
        assert_eq!(state.get("a.mp3").unwrap().size, 4096);
    }

    #[test]
    fn test_update_replaces_whole_record() {
        let mut state = QueueState::new();
        let mut queued = file("a.mp3");
        queued.artist = "Old".to_string();
        state.enqueue(queued);

        let mut edited = file("a.mp3");
        edited.title = "New title".to_string();
        edited.track_type = TrackType::Ad;
        assert!(state.update(edited));

        let stored = state.get("a.mp3").unwrap();
        assert_eq!(stored.artist, "");
        assert_eq!(stored.title, "New title");
        assert_eq!(stored.track_type, TrackType::Ad);

        assert!(!state.update(file("ghost.mp3")));
        assert_eq!(state.len(), 1);
    }

    #[test]
    fn test_remove_absent_is_noop() {
        let mut state = QueueState::new();
        state.enqueue(file("a.mp3"));

        assert!(state.remove("missing.mp3").is_none());
        assert_eq!(state.filenames(), vec!["a.mp3"]);
    }

    #[test]
    fn test_claim_next_takes_first_and_blocks_second_claim() {
        let mut state = QueueState::new();
        state.enqueue(file("a.mp3"));
        state.enqueue(file("b.mp3"));

        let (first, in_flight, _rx) = state.claim_next().unwrap();
        assert_eq!(first.filename, "a.mp3");
        assert_eq!(state.current_filename(), Some("a.mp3"));
        assert!(state.is_running());

        assert!(state.claim_next().is_none());

        assert!(state.complete_current(in_flight.generation));
        assert_eq!(state.filenames(), vec!["b.mp3"]);
        assert!(state.current().is_none());
    }

    #[test]
    fn test_complete_after_removal_frees_slot() {
        let mut state = QueueState::new();
        state.enqueue(file("a.mp3"));
        state.enqueue(file("b.mp3"));

        let (_, in_flight, _rx) = state.claim_next().unwrap();
        state.remove("a.mp3");

        assert!(state.complete_current(in_flight.generation));
        assert!(state.current().is_none());
        assert_eq!(state.filenames(), vec!["b.mp3"]);

        let (next, _, _rx) = state.claim_next().unwrap();
        assert_eq!(next.filename, "b.mp3");
    }

    #[test]
    fn test_claim_on_empty_queue_stops_running() {
        let mut state = QueueState::new();
        assert!(state.claim_next().is_none());
        assert!(!state.is_running());
    }

    #[test]
    fn test_fail_current_halts_and_keeps_file() {
        let mut state = QueueState::new();
        state.enqueue(file("a.mp3"));
        state.enqueue(file("b.mp3"));

        let (_, in_flight, _rx) = state.claim_next().unwrap();
        assert!(state.fail_current(in_flight.generation, "HTTP 500"));

        assert!(!state.is_running());
        assert!(state.current().is_none());
        assert_eq!(state.len(), 2);
        assert_eq!(state.get("a.mp3").unwrap().error.as_deref(), Some("HTTP 500"));
    }

    #[test]
    fn test_cancel_current_signals_handle() {
        let mut state = QueueState::new();
        state.enqueue(file("a.mp3"));
        let (_, in_flight, rx) = state.claim_next().unwrap();

        let cancelled = state.cancel_current().unwrap();
        assert_eq!(cancelled.filename, "a.mp3");
        assert!(*rx.borrow());
        assert!(in_flight.cancel.is_cancelled());
        assert!(!state.is_running());
        assert_eq!(state.get("a.mp3").unwrap(), &file("a.mp3"));

        assert!(state.cancel_current().is_none());
    }

    #[test]
    fn test_stale_generation_is_ignored() {
        let mut state = QueueState::new();
        state.enqueue(file("a.mp3"));

        let (_, stale, _rx) = state.claim_next().unwrap();
        state.cancel_current();
        let (_, fresh, _rx2) = state.claim_next().unwrap();

        assert!(!state.complete_current(stale.generation));
        assert!(!state.fail_current(stale.generation, "late"));
        assert!(state.is_current("a.mp3", fresh.generation));
        assert!(state.get("a.mp3").unwrap().error.is_none());
    }
}
