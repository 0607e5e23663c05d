pub mod api_client;
pub mod config;
pub mod database;
pub mod errors;
pub mod models;
pub mod pagination;
pub mod security;
pub mod session;
pub mod uploader;

pub use api_client::SoundfleetClient;
pub use errors::{AppError, AppResult};
pub use uploader::{QueueEvent, QueueOutcome, QueuedFile, UploadController};
