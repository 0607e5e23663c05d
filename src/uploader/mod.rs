// Upload queue module - holds selected audio files and sends them to the
// backend one at a time

pub mod controller;
pub mod progress_tracker;
pub mod queue;
pub mod transport;

pub use controller::{QueueOutcome, UploadController};
pub use progress_tracker::QueueEvent;
pub use queue::{QueueState, QueuedFile};
pub use transport::{ProgressCallback, TrackUpload, UploadTransport};
