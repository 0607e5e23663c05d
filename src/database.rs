use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::path::Path;

use crate::config::get_data_directory;
use crate::errors::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    Success,
    Failed,
    Cancelled,
}

impl UploadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadStatus::Success => "success",
            UploadStatus::Failed => "failed",
            UploadStatus::Cancelled => "cancelled",
        }
    }

    fn parse(value: &str) -> AppResult<Self> {
        match value {
            "success" => Ok(UploadStatus::Success),
            "failed" => Ok(UploadStatus::Failed),
            "cancelled" => Ok(UploadStatus::Cancelled),
            other => Err(AppError::Internal(format!(
                "Unknown upload status in history: {}",
                other
            ))),
        }
    }
}

/// One finished upload attempt
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadRecord {
    pub id: i64,
    pub run_id: String,
    pub file_name: String,
    pub track_type: String,
    pub file_size: u64,
    pub status: UploadStatus,
    pub error_message: Option<String>,
    pub track_id: Option<i64>,
    pub uploaded_at: DateTime<Utc>,
}

/// Fields for a new history row
#[derive(Debug, Clone)]
pub struct NewUpload<'a> {
    pub run_id: &'a str,
    pub file_name: &'a str,
    pub track_type: &'a str,
    pub file_size: u64,
    pub status: UploadStatus,
    pub error_message: Option<&'a str>,
    pub track_id: Option<i64>,
}

/// Per-run totals
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub total_files: i64,
    pub successful_uploads: i64,
    pub failed_uploads: i64,
    pub run_status: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Local upload history
#[derive(Debug, Clone)]
pub struct HistoryStore {
    pool: SqlitePool,
}

impl HistoryStore {
    /// Open (creating if needed) the history database in the app data directory
    pub async fn open_default() -> AppResult<Self> {
        let data_dir = get_data_directory()?;
        std::fs::create_dir_all(&data_dir)?;
        log::info!("Database directory: {}", data_dir.display());
        Self::open(&data_dir.join("UploadHistory.db")).await
    }

    pub async fn open(db_path: &Path) -> AppResult<Self> {
        log::info!("Database path: {}", db_path.display());
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.init_tables().await?;
        Ok(store)
    }

    /// Private database that lives as long as the store
    pub async fn in_memory() -> AppResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None::<std::time::Duration>)
            .max_lifetime(None::<std::time::Duration>)
            .connect("sqlite::memory:")
            .await?;

        let store = Self { pool };
        store.init_tables().await?;
        Ok(store)
    }

    async fn init_tables(&self) -> AppResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS upload_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id TEXT NOT NULL,
                file_name TEXT NOT NULL,
                track_type TEXT NOT NULL,
                file_size INTEGER NOT NULL DEFAULT 0,
                upload_status TEXT NOT NULL,
                error_message TEXT,
                track_id INTEGER,
                uploaded_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS upload_runs (
                id TEXT PRIMARY KEY,
                total_files INTEGER NOT NULL,
                successful_uploads INTEGER NOT NULL DEFAULT 0,
                failed_uploads INTEGER NOT NULL DEFAULT 0,
                run_status TEXT NOT NULL DEFAULT 'active',
                started_at TEXT NOT NULL,
                completed_at TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_upload_history_date ON upload_history(uploaded_at)")
            .execute(&self.pool)
            .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_upload_history_run ON upload_history(run_id)")
            .execute(&self.pool)
            .await?;

        log::debug!("History tables ready");
        Ok(())
    }

    pub async fn record_upload(&self, upload: NewUpload<'_>) -> AppResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO upload_history
            (run_id, file_name, track_type, file_size, upload_status, error_message, track_id, uploaded_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(upload.run_id)
        .bind(upload.file_name)
        .bind(upload.track_type)
        .bind(upload.file_size as i64)
        .bind(upload.status.as_str())
        .bind(upload.error_message)
        .bind(upload.track_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        match upload.status {
            UploadStatus::Success => self.bump_run(upload.run_id, "successful_uploads").await?,
            UploadStatus::Failed => self.bump_run(upload.run_id, "failed_uploads").await?,
            UploadStatus::Cancelled => {}
        }

        Ok(result.last_insert_rowid())
    }

    /// Newest first
    pub async fn recent_uploads(&self, limit: u32) -> AppResult<Vec<UploadRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, run_id, file_name, track_type, file_size, upload_status,
                   error_message, track_id, uploaded_at
            FROM upload_history
            ORDER BY uploaded_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let status: String = row.get("upload_status");
            let file_size: i64 = row.get("file_size");
            records.push(UploadRecord {
                id: row.get("id"),
                run_id: row.get("run_id"),
                file_name: row.get("file_name"),
                track_type: row.get("track_type"),
                file_size: file_size.max(0) as u64,
                status: UploadStatus::parse(&status)?,
                error_message: row.get("error_message"),
                track_id: row.get("track_id"),
                uploaded_at: row.get("uploaded_at"),
            });
        }

        Ok(records)
    }

    pub async fn cleanup_old_history(&self, days: u32) -> AppResult<u64> {
        let cutoff = Utc::now() - Duration::days(days as i64);

        let result = sqlx::query("DELETE FROM upload_history WHERE uploaded_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        sqlx::query("DELETE FROM upload_runs WHERE started_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() > 0 {
            log::info!(
                "Removed {} history entries older than {} days",
                result.rows_affected(),
                days
            );
        }
        Ok(result.rows_affected())
    }

    pub async fn start_run(&self, run_id: &str, total_files: usize) -> AppResult<()> {
        sqlx::query("INSERT INTO upload_runs (id, total_files, started_at) VALUES (?, ?, ?)")
            .bind(run_id)
            .bind(total_files as i64)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Close a run with its final status (`completed`, `failed` or `cancelled`)
    pub async fn finish_run(&self, run_id: &str, status: &str) -> AppResult<()> {
        sqlx::query("UPDATE upload_runs SET run_status = ?, completed_at = ? WHERE id = ?")
            .bind(status)
            .bind(Utc::now())
            .bind(run_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn run_summary(&self, run_id: &str) -> AppResult<Option<RunSummary>> {
        let row = sqlx::query(
            r#"
            SELECT id, total_files, successful_uploads, failed_uploads, run_status,
                   started_at, completed_at
            FROM upload_runs WHERE id = ?
            "#,
        )
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| RunSummary {
            run_id: row.get("id"),
            total_files: row.get("total_files"),
            successful_uploads: row.get("successful_uploads"),
            failed_uploads: row.get("failed_uploads"),
            run_status: row.get("run_status"),
            started_at: row.get("started_at"),
            completed_at: row.get("completed_at"),
        }))
    }

    async fn bump_run(&self, run_id: &str, column: &'static str) -> AppResult<()> {
        let sql = format!(
            "UPDATE upload_runs SET {column} = {column} + 1 WHERE id = ?",
            column = column
        );
        sqlx::query(&sql).bind(run_id).execute(&self.pool).await?;
        Ok(())
    }
}
