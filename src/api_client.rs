use reqwest::{multipart, Body, Client, Method, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::time::Duration;

use crate::errors::{AppError, AppResult};
use crate::models::{AudioTrack, Page, TrackUpdate, User};
use crate::pagination::TrackFilters;
use crate::security::{mime_type_for, InputValidator};
use crate::uploader::transport::progress_stream;
use crate::uploader::{ProgressCallback, TrackUpload, UploadTransport};

/// Token pair returned by `/auth/get-token/`
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct TokenResponse {
    pub access: String,
    #[serde(default)]
    pub refresh: Option<String>,
    #[serde(default)]
    pub user: Option<User>,
}

/// Client for the Soundfleet REST backend
#[derive(Debug, Clone)]
pub struct SoundfleetClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl SoundfleetClient {
    pub fn new(base_url: &str, timeout: Duration) -> AppResult<Self> {
        InputValidator::validate_api_url(base_url)?;

        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("soundfleet-uploader/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: None,
        })
    }

    /// Same client, authenticated with a bearer token
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.client.request(method, self.endpoint(path));
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    pub async fn obtain_token(&self, username: &str, password: &str) -> AppResult<TokenResponse> {
        InputValidator::validate_credentials(username, password)?;

        let response = self
            .request(Method::POST, "/auth/get-token/")
            .json(&serde_json::json!({ "username": username, "password": password }))
            .send()
            .await?;

        let tokens: TokenResponse = parse_json(response).await?;
        log::info!("Obtained access token for {}", username);
        Ok(tokens)
    }

    /// True when the backend still accepts `token`
    pub async fn verify_token(&self, token: &str) -> AppResult<bool> {
        let response = self
            .request(Method::POST, "/auth/verify-token/")
            .json(&serde_json::json!({ "token": token }))
            .send()
            .await?;

        match check_status(response).await {
            Ok(_) => Ok(true),
            Err(AppError::Unauthorized { message }) => {
                log::info!("Stored token rejected: {}", message);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn list_audio_tracks(&self, filters: &TrackFilters) -> AppResult<Page<AudioTrack>> {
        let response = self
            .request(Method::GET, "/media/audio-tracks/")
            .query(&filters.to_query())
            .send()
            .await?;

        let page: Page<AudioTrack> = parse_json(response).await?;
        log::debug!(
            "Fetched {} of {} audio track(s)",
            page.results.len(),
            page.count
        );
        Ok(page)
    }

    /// PATCH only the fields set on `update`
    pub async fn update_audio_track(&self, id: i64, update: &TrackUpdate) -> AppResult<AudioTrack> {
        let response = self
            .request(Method::PATCH, &format!("/media/audio-tracks/{}/", id))
            .json(update)
            .send()
            .await?;

        let track: AudioTrack = parse_json(response).await?;
        log::info!("Updated audio track #{}", id);
        Ok(track)
    }

    pub async fn delete_audio_track(&self, id: i64) -> AppResult<()> {
        let response = self
            .request(Method::DELETE, &format!("/media/audio-tracks/{}/", id))
            .send()
            .await?;

        check_status(response).await?;
        log::info!("Deleted audio track #{}", id);
        Ok(())
    }

    /// Multipart upload of one audio file to `/media/upload/`
    pub async fn upload_track(
        &self,
        upload: TrackUpload,
        on_progress: ProgressCallback,
    ) -> AppResult<AudioTrack> {
        let file = tokio::fs::File::open(&upload.path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AppError::file_not_found(&upload.path.to_string_lossy())
            } else {
                AppError::Io(e)
            }
        })?;
        let length = file.metadata().await?.len();

        let file_part = multipart::Part::stream_with_length(
            Body::wrap_stream(progress_stream(file, length, on_progress)),
            length,
        )
        .file_name(InputValidator::sanitize_filename(&upload.filename))
        .mime_str(mime_type_for(&upload.path))?;

        let mut form = multipart::Form::new().part("file", file_part);
        for (name, value) in upload.fields {
            form = form.text(name, value);
        }

        log::debug!(
            "POST {} ({} bytes)",
            self.endpoint("/media/upload/"),
            length
        );

        let response = self
            .request(Method::POST, "/media/upload/")
            .multipart(form)
            .send()
            .await?;

        parse_json(response).await.map_err(|e| match e {
            AppError::Json(e) => AppError::UploadFailed {
                reason: format!("Unexpected response from server: {}", e),
            },
            other => other,
        })
    }
}

impl UploadTransport for SoundfleetClient {
    fn upload(
        &self,
        upload: TrackUpload,
        on_progress: ProgressCallback,
    ) -> impl Future<Output = AppResult<AudioTrack>> + Send {
        self.upload_track(upload, on_progress)
    }
}

async fn check_status(response: Response) -> AppResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    let message = describe_error_body(&body)
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("Request failed").to_string());

    log::warn!("Request failed with {}: {}", status, message);
    Err(AppError::api(status.as_u16(), message))
}

async fn parse_json<T: serde::de::DeserializeOwned>(response: Response) -> AppResult<T> {
    let response = check_status(response).await?;
    let body = response.text().await?;
    Ok(serde_json::from_str(&body)?)
}

/// Human-readable message from an error response body.
///
/// Handles `{"detail": ...}`, `{"field": ["message", ...]}`,
/// `{"non_field_errors": [...]}` and bare string lists. None when the body
/// carries nothing usable.
pub fn describe_error_body(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }

    let value: Value = match serde_json::from_str(trimmed) {
        Ok(value) => value,
        Err(_) => {
            // HTML error pages are not worth echoing
            if trimmed.starts_with('<') {
                return None;
            }
            return Some(trimmed.chars().take(300).collect());
        }
    };

    match &value {
        Value::Object(map) => {
            if let Some(detail) = map.get("detail").and_then(flatten_messages) {
                return Some(detail);
            }
            let parts: Vec<String> = map
                .iter()
                .filter_map(|(field, messages)| {
                    let text = flatten_messages(messages)?;
                    Some(if field == "non_field_errors" {
                        text
                    } else {
                        format!("{}: {}", field, text)
                    })
                })
                .collect();
            (!parts.is_empty()).then(|| parts.join("; "))
        }
        other => flatten_messages(other),
    }
}

fn flatten_messages(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().filter_map(flatten_messages).collect();
            (!parts.is_empty()).then(|| parts.join(" "))
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> SoundfleetClient {
        SoundfleetClient::new("http://localhost:8000/", Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_endpoint_joins_paths() {
        let client = client();
        assert_eq!(client.base_url(), "http://localhost:8000");
        assert_eq!(
            client.endpoint("/media/upload/"),
            "http://localhost:8000/media/upload/"
        );
        assert_eq!(
            client.endpoint("auth/get-token/"),
            "http://localhost:8000/auth/get-token/"
        );
    }

    #[test]
    fn test_rejects_invalid_base_url() {
        assert!(matches!(
            SoundfleetClient::new("ftp://example.com", Duration::from_secs(5)),
            Err(AppError::InvalidApiUrl { .. })
        ));
    }

    #[test]
    fn test_describe_detail_error() {
        assert_eq!(
            describe_error_body(r#"{"detail": "Given token not valid for any token type"}"#)
                .as_deref(),
            Some("Given token not valid for any token type")
        );
    }

    #[test]
    fn test_describe_field_errors() {
        let body = r#"{"file": ["Unsupported file extension."], "track_type": ["\"jingle\" is not a valid choice."]}"#;
        let message = describe_error_body(body).unwrap();
        assert!(message.contains("file: Unsupported file extension."));
        assert!(message.contains("track_type: \"jingle\" is not a valid choice."));

        assert_eq!(
            describe_error_body(r#"{"non_field_errors": ["Unable to log in."]}"#).as_deref(),
            Some("Unable to log in.")
        );
        assert_eq!(
            describe_error_body(r#"["Quota exceeded"]"#).as_deref(),
            Some("Quota exceeded")
        );
    }

    #[test]
    fn test_describe_unusable_bodies() {
        assert_eq!(describe_error_body(""), None);
        assert_eq!(describe_error_body("<html><body>502</body></html>"), None);
        assert_eq!(describe_error_body("{}"), None);
        assert_eq!(
            describe_error_body("Service unavailable").as_deref(),
            Some("Service unavailable")
        );
    }

    #[test]
    fn test_token_response_without_refresh() {
        let tokens: TokenResponse = serde_json::from_str(r#"{"access": "abc"}"#).unwrap();
        assert_eq!(tokens.access, "abc");
        assert!(tokens.refresh.is_none());
        assert!(tokens.user.is_none());
    }
}
