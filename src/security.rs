use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

use crate::errors::{AppError, AppResult};

/// Extensions accepted for upload, matching the dashboard's dropzone
pub const SUPPORTED_EXTENSIONS: [&str; 6] = ["aac", "mp3", "ogg", "wav", "flac", "mpeg"];

static API_URL_PATTERN: OnceLock<Regex> = OnceLock::new();
static UNSAFE_FILENAME_CHARS: OnceLock<Regex> = OnceLock::new();

fn cached_regex(cell: &'static OnceLock<Regex>, pattern: &str) -> AppResult<&'static Regex> {
    if let Some(regex) = cell.get() {
        return Ok(regex);
    }
    let compiled = Regex::new(pattern).map_err(|e| AppError::Internal(e.to_string()))?;
    Ok(cell.get_or_init(|| compiled))
}

pub struct InputValidator;

impl InputValidator {
    pub fn validate_api_url(url: &str) -> AppResult<()> {
        let trimmed = url.trim();

        if trimmed.is_empty() {
            return Err(AppError::validation("api_url", "API URL cannot be empty"));
        }

        if trimmed.len() > 500 {
            return Err(AppError::validation("api_url", "API URL too long"));
        }

        let pattern = cached_regex(
            &API_URL_PATTERN,
            r"^https?://[A-Za-z0-9\-\.]+(:\d{1,5})?(/[\w\-\./]*)?$",
        )?;
        if !pattern.is_match(trimmed) {
            return Err(AppError::invalid_api_url(trimmed));
        }

        Ok(())
    }

    pub fn validate_credentials(username: &str, password: &str) -> AppResult<()> {
        if username.trim().is_empty() {
            return Err(AppError::validation("username", "Username is required"));
        }
        if password.is_empty() {
            return Err(AppError::validation("password", "Password is required"));
        }
        Ok(())
    }

    pub fn validate_metadata_field(field: &str, value: &str) -> AppResult<()> {
        if value.chars().count() > 255 {
            return Err(AppError::validation(field, "Must be 255 characters or fewer"));
        }
        if value.chars().any(|c| c.is_control()) {
            return Err(AppError::validation(field, "Contains control characters"));
        }
        Ok(())
    }

    pub fn validate_file_path(path: &str) -> AppResult<()> {
        if path.trim().is_empty() {
            return Err(AppError::validation("file_path", "File path cannot be empty"));
        }

        let path_obj = Path::new(path);

        if path_obj
            .components()
            .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Err(AppError::validation("file_path", "Invalid file path detected"));
        }

        match path_obj.extension() {
            Some(extension) => {
                let ext = extension.to_string_lossy().to_lowercase();
                if !SUPPORTED_EXTENSIONS.contains(&ext.as_str()) {
                    return Err(AppError::invalid_file_type(path));
                }
            }
            None => {
                return Err(AppError::validation("file_path", "File must have an extension"));
            }
        }

        if !path_obj.exists() {
            return Err(AppError::file_not_found(path));
        }

        if !path_obj.is_file() {
            return Err(AppError::validation("file_path", "Path is not a file"));
        }

        Ok(())
    }

    /// Selection-time check; files failing it never reach the queue
    pub fn validate_audio_file(path: &str, max_bytes: u64) -> AppResult<u64> {
        Self::validate_file_path(path)?;

        let size = std::fs::metadata(path)?.len();
        if size > max_bytes {
            return Err(AppError::file_too_large(path, max_bytes));
        }

        Ok(size)
    }

    pub fn sanitize_filename(filename: &str) -> String {
        let sanitized = match cached_regex(&UNSAFE_FILENAME_CHARS, r#"[<>:"/\\|?*\x00-\x1f]"#) {
            Ok(unsafe_chars) => unsafe_chars.replace_all(filename.trim(), "_").to_string(),
            Err(_) => filename.trim().to_string(),
        };

        if sanitized.chars().count() > 255 {
            let truncated: String = sanitized.chars().take(252).collect();
            format!("{}...", truncated)
        } else {
            sanitized
        }
    }
}

/// MIME type sent for an accepted extension
pub fn mime_type_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .as_deref()
    {
        Some("aac") => "audio/aac",
        Some("mp3") | Some("mpeg") => "audio/mpeg",
        Some("ogg") => "audio/ogg",
        Some("wav") => "audio/wav",
        Some("flac") => "audio/flac",
        _ => "application/octet-stream",
    }
}
