use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::api_client::{SoundfleetClient, TokenResponse};
use crate::config::get_config_directory;
use crate::errors::{AppError, AppResult};
use crate::models::User;

/// Logged-in state kept between runs
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Session {
    #[serde(default)]
    pub user: Option<User>,
    pub access: String,
    #[serde(default)]
    pub refresh: Option<String>,
}

impl Session {
    /// Overlay a fresh token response on this session. Fields the server
    /// left out keep their stored values.
    pub fn merge(self, tokens: TokenResponse) -> Session {
        Session {
            user: tokens.user.or(self.user),
            access: tokens.access,
            refresh: tokens.refresh.or(self.refresh),
        }
    }

    pub fn username(&self) -> Option<&str> {
        self.user.as_ref().map(|u| u.username.as_str())
    }
}

/// JSON file holding the current session
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `session.json` next to the config file
    pub fn default_location() -> AppResult<Self> {
        Ok(Self::new(get_config_directory()?.join("session.json")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> AppResult<Option<Session>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&self.path)?;
        match serde_json::from_str::<Session>(&content) {
            Ok(session) if !session.access.is_empty() => Ok(Some(session)),
            Ok(_) => Ok(None),
            Err(e) => {
                log::warn!("Discarding unreadable session file: {}", e);
                Ok(None)
            }
        }
    }

    pub fn save(&self, session: &Session) -> AppResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(session)?;
        fs::write(&self.path, content)?;
        log::debug!("Session saved to {}", self.path.display());
        Ok(())
    }

    /// Remove the stored session. Returns false when there was none.
    pub fn clear(&self) -> AppResult<bool> {
        if !self.path.exists() {
            return Ok(false);
        }
        fs::remove_file(&self.path)?;
        Ok(true)
    }
}

/// Obtain a token and store it over whatever session was already saved
pub async fn login(
    client: &SoundfleetClient,
    store: &SessionStore,
    username: &str,
    password: &str,
) -> AppResult<Session> {
    let tokens = client.obtain_token(username, password).await?;

    let mut session = store.load()?.unwrap_or_default().merge(tokens);
    if session.user.is_none() {
        session.user = Some(User {
            id: 0,
            username: username.to_string(),
            email: None,
            first_name: None,
            last_name: None,
        });
    }

    store.save(&session)?;
    log::info!("Logged in as {}", username);
    Ok(session)
}

pub fn logout(store: &SessionStore) -> AppResult<bool> {
    let removed = store.clear()?;
    if removed {
        log::info!("Logged out");
    }
    Ok(removed)
}

/// Load the stored session and make sure the backend still accepts it.
///
/// A rejected token clears the session.
pub async fn require_session(
    client: &SoundfleetClient,
    store: &SessionStore,
) -> AppResult<Session> {
    let session = store.load()?.ok_or(AppError::NotAuthenticated)?;

    if !client.verify_token(&session.access).await? {
        logout(store)?;
        return Err(AppError::NotAuthenticated);
    }

    Ok(session)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn user(name: &str) -> User {
        User {
            id: 7,
            username: name.to_string(),
            email: Some(format!("{}@example.com", name)),
            first_name: None,
            last_name: None,
        }
    }

    #[test]
    fn test_merge_keeps_fields_server_omitted() {
        let stored = Session {
            user: Some(user("dj")),
            access: "old-access".to_string(),
            refresh: Some("old-refresh".to_string()),
        };

        let merged = stored.merge(TokenResponse {
            access: "new-access".to_string(),
            refresh: None,
            user: None,
        });

        assert_eq!(merged.access, "new-access");
        assert_eq!(merged.refresh.as_deref(), Some("old-refresh"));
        assert_eq!(merged.username(), Some("dj"));
    }

    #[test]
    fn test_merge_prefers_new_fields() {
        let merged = Session::default().merge(TokenResponse {
            access: "a".to_string(),
            refresh: Some("r".to_string()),
            user: Some(user("ops")),
        });
        assert_eq!(merged.refresh.as_deref(), Some("r"));
        assert_eq!(merged.username(), Some("ops"));
    }

    #[test]
    fn test_store_round_trip_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("nested").join("session.json"));

        assert!(store.load().unwrap().is_none());
        assert!(!store.clear().unwrap());

        let session = Session {
            user: Some(user("dj")),
            access: "token".to_string(),
            refresh: None,
        };
        store.save(&session).unwrap();
        assert_eq!(store.load().unwrap(), Some(session));

        assert!(logout(&store).unwrap());
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_corrupt_session_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        fs::write(&path, "{not json").unwrap();

        assert!(SessionStore::new(&path).load().unwrap().is_none());

        fs::write(&path, r#"{"access": ""}"#).unwrap();
        assert!(SessionStore::new(&path).load().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_require_session_without_login() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("session.json"));
        let client = SoundfleetClient::new("http://localhost:8000", Duration::from_secs(1)).unwrap();

        assert!(matches!(
            require_session(&client, &store).await,
            Err(AppError::NotAuthenticated)
        ));
    }
}
