use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::io::ReaderStream;

use crate::errors::AppResult;
use crate::models::AudioTrack;

use super::queue::QueuedFile;

/// Bytes handed to the socket per body chunk
pub const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

/// Called with `(bytes_sent, bytes_total)` as the body is consumed
pub type ProgressCallback = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// Everything the network layer needs to send one queued file
#[derive(Debug, Clone, PartialEq)]
pub struct TrackUpload {
    pub filename: String,
    pub path: PathBuf,
    pub size: u64,
    pub fields: Vec<(&'static str, String)>,
}

impl TrackUpload {
    /// Multipart text fields for a queued file; empty optional metadata is left out
    pub fn from_queued(file: &QueuedFile) -> Self {
        let mut fields = vec![("track_type", file.track_type.to_string())];
        for (name, value) in [
            ("artist", &file.artist),
            ("title", &file.title),
            ("genre", &file.genre),
        ] {
            if !value.is_empty() {
                fields.push((name, value.clone()));
            }
        }

        Self {
            filename: file.filename.clone(),
            path: file.path.clone(),
            size: file.size,
            fields,
        }
    }
}

/// Network side of the upload queue.
///
/// Dropping the returned future must abort the transfer; the controller
/// cancels uploads that way.
pub trait UploadTransport: Send + Sync + 'static {
    fn upload(
        &self,
        upload: TrackUpload,
        on_progress: ProgressCallback,
    ) -> impl Future<Output = AppResult<AudioTrack>> + Send;
}

/// Body stream over `reader` that reports cumulative bytes as chunks are pulled.
///
/// At most `total` bytes are read.
pub fn progress_stream<R>(
    reader: R,
    total: u64,
    on_progress: ProgressCallback,
) -> impl Stream<Item = std::io::Result<Bytes>> + Send + Sync + 'static
where
    R: AsyncRead + Send + Sync + Unpin + 'static,
{
    let sent = Arc::new(AtomicU64::new(0));

    ReaderStream::with_capacity(reader.take(total), UPLOAD_CHUNK_SIZE).map(move |chunk| {
        if let Ok(bytes) = &chunk {
            let now_sent = sent.fetch_add(bytes.len() as u64, Ordering::Relaxed) + bytes.len() as u64;
            on_progress(now_sent, total);
        }
        chunk
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TrackType;
    use std::sync::Mutex;

    #[test]
    fn test_fields_omit_empty_metadata() {
        let mut file = QueuedFile::new("/music/jingle.mp3", 10);
        file.track_type = TrackType::Ad;
        file.title = "Spring sale".to_string();

        let upload = TrackUpload::from_queued(&file);
        assert_eq!(upload.filename, "jingle.mp3");
        assert_eq!(
            upload.fields,
            vec![
                ("track_type", "ad".to_string()),
                ("title", "Spring sale".to_string()),
            ]
        );
    }

    #[test]
    fn test_fields_include_all_metadata() {
        let mut file = QueuedFile::new("/music/song.flac", 10);
        file.artist = "Nina".to_string();
        file.title = "Sun".to_string();
        file.genre = "jazz".to_string();

        let names: Vec<&str> = TrackUpload::from_queued(&file)
            .fields
            .iter()
            .map(|(name, _)| *name)
            .collect();
        assert_eq!(names, vec!["track_type", "artist", "title", "genre"]);
    }

    #[tokio::test]
    async fn test_progress_stream_reports_cumulative_bytes() {
        let reports = Arc::new(Mutex::new(Vec::new()));
        let sink = reports.clone();
        let callback: ProgressCallback = Arc::new(move |sent, total| {
            sink.lock().unwrap().push((sent, total));
        });

        let total = (UPLOAD_CHUNK_SIZE * 2 + 10) as u64;
        let data = std::io::Cursor::new(vec![7u8; total as usize]);
        let chunks: Vec<Bytes> = progress_stream(data, total, callback)
            .map(|chunk| chunk.unwrap())
            .collect()
            .await;

        assert!(chunks.len() > 1);
        assert_eq!(chunks.iter().map(|c| c.len() as u64).sum::<u64>(), total);

        let reports = reports.lock().unwrap();
        assert_eq!(reports.len(), chunks.len());
        assert!(reports.windows(2).all(|w| w[0].0 < w[1].0));
        assert!(reports.iter().all(|(_, t)| *t == total));
        assert_eq!(reports.last(), Some(&(total, total)));
    }

    #[tokio::test]
    async fn test_progress_stream_stops_at_declared_length() {
        let callback: ProgressCallback = Arc::new(|_, _| {});
        let data = std::io::Cursor::new(vec![1u8; 500]);

        let chunks: Vec<Bytes> = progress_stream(data, 200, callback)
            .map(|chunk| chunk.unwrap())
            .collect()
            .await;

        assert_eq!(chunks.iter().map(|c| c.len()).sum::<usize>(), 200);
    }
}
