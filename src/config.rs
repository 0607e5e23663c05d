use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::errors::{AppError, AppResult};
use crate::models::TrackType;
use crate::security::InputValidator;

const APP_DIR_NAME: &str = "Soundfleet Uploader";

/// Overrides `api_url` from the environment, like the dashboard's build-time API URL
pub const API_URL_ENV: &str = "SOUNDFLEET_API_URL";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub api_url: String,
    pub default_track_type: TrackType,
    pub request_timeout_secs: u64,
    pub max_file_size_mb: u64,
    pub page_size: u32,
    pub log_level: String,
    pub keep_history: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8000".to_string(),
            default_track_type: TrackType::Music,
            request_timeout_secs: 300,
            max_file_size_mb: 500,
            page_size: 10,
            log_level: "info".to_string(),
            keep_history: true,
        }
    }
}

impl Config {
    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb * 1024 * 1024
    }
}

pub fn get_config_directory() -> AppResult<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| AppError::Config("Could not find config directory".to_string()))?
        .join(APP_DIR_NAME);

    fs::create_dir_all(&config_dir)?;
    Ok(config_dir)
}

pub fn get_config_path() -> AppResult<PathBuf> {
    Ok(get_config_directory()?.join("config.json"))
}

pub fn get_data_directory() -> AppResult<PathBuf> {
    let data_dir = dirs::data_dir()
        .ok_or_else(|| AppError::Config("Could not find data directory".to_string()))?
        .join(APP_DIR_NAME);

    fs::create_dir_all(&data_dir)?;
    Ok(data_dir)
}

/// Config file contents. Call `apply_env_overrides` once logging is up.
pub fn load_config() -> AppResult<Config> {
    load_config_at(&get_config_path()?)
}

pub fn load_config_at(config_path: &Path) -> AppResult<Config> {
    if config_path.exists() {
        let config_str = fs::read_to_string(config_path)?;
        let config: Config = serde_json::from_str(&config_str).unwrap_or_else(|e| {
            log::warn!("Failed to parse config file: {}. Using defaults.", e);
            Config::default()
        });

        validate_config(&config)?;
        Ok(config)
    } else {
        let default_config = Config::default();
        save_config_internal(config_path, &default_config)?;
        Ok(default_config)
    }
}

pub fn apply_env_overrides(config: &mut Config) {
    apply_api_url_override(config, std::env::var(API_URL_ENV).ok().as_deref());
}

/// Invalid values are logged and ignored
fn apply_api_url_override(config: &mut Config, api_url: Option<&str>) {
    let Some(api_url) = api_url else {
        return;
    };

    match InputValidator::validate_api_url(api_url) {
        Ok(()) => {
            log::debug!("Using API URL from {}: {}", API_URL_ENV, api_url);
            config.api_url = api_url.trim().to_string();
        }
        Err(e) => {
            log::warn!(
                "Ignoring {}: {}. Using {} from the config file.",
                API_URL_ENV,
                e,
                config.api_url
            );
        }
    }
}

pub fn save_config(config: &Config) -> AppResult<()> {
    save_config_at(&get_config_path()?, config)
}

pub fn save_config_at(config_path: &Path, config: &Config) -> AppResult<()> {
    validate_config(config)?;
    save_config_internal(config_path, config)
}

fn save_config_internal(config_path: &Path, config: &Config) -> AppResult<()> {
    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent)?;
    }

    if config_path.exists() {
        let backup_path = config_path.with_extension("json.bak");
        if let Err(e) = fs::copy(config_path, &backup_path) {
            log::warn!("Failed to create config backup: {}", e);
        }
    }

    let config_str = serde_json::to_string_pretty(config)?;
    fs::write(config_path, config_str)?;

    log::info!("Configuration saved to {}", config_path.display());
    Ok(())
}

pub fn validate_config(config: &Config) -> AppResult<()> {
    InputValidator::validate_api_url(&config.api_url)?;

    if config.request_timeout_secs == 0 || config.request_timeout_secs > 3600 {
        return Err(AppError::validation(
            "request_timeout_secs",
            "Must be between 1 and 3600",
        ));
    }

    if config.max_file_size_mb == 0 {
        return Err(AppError::validation("max_file_size_mb", "Must be greater than 0"));
    }

    if config.page_size == 0 || config.page_size > 100 {
        return Err(AppError::validation("page_size", "Must be between 1 and 100"));
    }

    let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
    if !valid_log_levels.contains(&config.log_level.as_str()) {
        return Err(AppError::validation("log_level", "Must be a valid log level"));
    }

    Ok(())
}

pub fn migrate_config() -> AppResult<()> {
    migrate_config_at(&get_config_path()?)
}

/// Replaces an unreadable config with defaults, keeping the old file as `.json.old`
pub fn migrate_config_at(config_path: &Path) -> AppResult<()> {
    if !config_path.exists() {
        return Ok(());
    }

    let config_str = fs::read_to_string(config_path)?;
    if serde_json::from_str::<Config>(&config_str).is_ok() {
        return Ok(());
    }

    log::info!("Migrating configuration to new format");

    let backup_path = config_path.with_extension("json.old");
    fs::copy(config_path, &backup_path)?;

    save_config_internal(config_path, &Config::default())?;

    log::info!("Old configuration backed up to {}", backup_path.display());
    Ok(())
}

pub fn reset_config() -> AppResult<Config> {
    reset_config_at(&get_config_path()?)
}

pub fn reset_config_at(config_path: &Path) -> AppResult<Config> {
    if config_path.exists() {
        let backup_path = config_path.with_extension("json.reset_backup");
        fs::copy(config_path, &backup_path)?;
        log::info!("Existing config backed up to {}", backup_path.display());
    }

    let default_config = Config::default();
    save_config_internal(config_path, &default_config)?;

    log::info!("Configuration reset to defaults");
    Ok(default_config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_config_is_created_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let config = load_config_at(&path).unwrap();
        assert_eq!(config, Config::default());
        assert!(path.exists());
    }

    #[test]
    fn test_save_writes_backup_of_previous_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        load_config_at(&path).unwrap();

        let updated = Config {
            api_url: "https://api.soundfleet.io".to_string(),
            page_size: 25,
            ..Config::default()
        };
        save_config_at(&path, &updated).unwrap();

        assert!(path.with_extension("json.bak").exists());
        assert_eq!(load_config_at(&path).unwrap(), updated);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"api_url": "https://dash.example.com", "default_track_type": "ad"}"#)
            .unwrap();

        let config = load_config_at(&path).unwrap();
        assert_eq!(config.api_url, "https://dash.example.com");
        assert_eq!(config.default_track_type, TrackType::Ad);
        assert_eq!(config.page_size, 10);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let bad_level = Config {
            log_level: "verbose".to_string(),
            ..Config::default()
        };
        assert!(validate_config(&bad_level).is_err());

        let bad_page = Config {
            page_size: 0,
            ..Config::default()
        };
        assert!(validate_config(&bad_page).is_err());

        let bad_url = Config {
            api_url: "not a url".to_string(),
            ..Config::default()
        };
        assert!(save_config_at(Path::new("unused.json"), &bad_url).is_err());
    }

    #[test]
    fn test_api_url_override() {
        let file_config = Config {
            api_url: "https://dash.example.com".to_string(),
            ..Config::default()
        };

        let mut config = file_config.clone();
        apply_api_url_override(&mut config, None);
        assert_eq!(config, file_config);

        apply_api_url_override(&mut config, Some("not a url"));
        assert_eq!(config.api_url, "https://dash.example.com");
        apply_api_url_override(&mut config, Some("ftp://files.example.com"));
        assert_eq!(config.api_url, "https://dash.example.com");

        apply_api_url_override(&mut config, Some(" https://staging.example.com "));
        assert_eq!(config.api_url, "https://staging.example.com");
    }

    #[test]
    fn test_migrate_replaces_unparsable_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ this is not json").unwrap();

        migrate_config_at(&path).unwrap();

        assert!(path.with_extension("json.old").exists());
        assert_eq!(load_config_at(&path).unwrap(), Config::default());
    }

    #[test]
    fn test_reset_backs_up_and_restores_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let custom = Config {
            max_file_size_mb: 50,
            ..Config::default()
        };
        save_config_at(&path, &custom).unwrap();

        let reset = reset_config_at(&path).unwrap();
        assert_eq!(reset, Config::default());
        assert!(path.with_extension("json.reset_backup").exists());
    }
}
