use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TrackType {
    #[default]
    Music,
    Ad,
}

impl TrackType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackType::Music => "music",
            TrackType::Ad => "ad",
        }
    }
}

impl fmt::Display for TrackType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for TrackType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "music" => Ok(TrackType::Music),
            "ad" => Ok(TrackType::Ad),
            _ => Err(AppError::validation("track_type", "Must be 'music' or 'ad'")),
        }
    }
}

/// Audio track as returned by the media endpoints
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AudioTrack {
    pub id: i64,
    #[serde(default)]
    pub artist: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub genre: String,
    pub track_type: TrackType,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub length: f64,
    #[serde(default)]
    pub url: String,
}

impl AudioTrack {
    pub fn display_name(&self) -> String {
        match (self.artist.is_empty(), self.title.is_empty()) {
            (false, false) => format!("{} - {}", self.artist, self.title),
            (true, false) => self.title.clone(),
            (false, true) => self.artist.clone(),
            (true, true) => format!("Track #{}", self.id),
        }
    }

    pub fn size_mb(&self) -> f64 {
        self.size as f64 / (1024.0 * 1024.0)
    }
}

/// Partial edit of an audio track. Unset fields are left out of the request body.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct TrackUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub genre: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track_type: Option<TrackType>,
}

impl TrackUpdate {
    pub fn is_empty(&self) -> bool {
        self.artist.is_none()
            && self.title.is_none()
            && self.genre.is_none()
            && self.track_type.is_none()
    }
}

/// Paginated list envelope used by every list endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub count: u64,
    #[serde(default)]
    pub next: Option<String>,
    #[serde(default)]
    pub previous: Option<String>,
    pub results: Vec<T>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: i64,
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_type_parsing() {
        assert_eq!("music".parse::<TrackType>().unwrap(), TrackType::Music);
        assert_eq!(" AD ".parse::<TrackType>().unwrap(), TrackType::Ad);
        assert!("jingle".parse::<TrackType>().is_err());
        assert_eq!(TrackType::default(), TrackType::Music);
    }

    #[test]
    fn test_audio_track_page_deserializes() {
        let body = r#"{
            "count": 2,
            "next": null,
            "previous": null,
            "results": [
                {"id": 1, "artist": "Nina", "title": "Sun", "genre": "pop",
                 "track_type": "music", "size": 2097152, "length": 182.5,
                 "url": "https://cdn.example.com/1.mp3"},
                {"id": 2, "artist": "", "title": "", "genre": "",
                 "track_type": "ad", "size": 0, "length": 30.0, "url": ""}
            ]
        }"#;

        let page: Page<AudioTrack> = serde_json::from_str(body).unwrap();
        assert_eq!(page.count, 2);
        assert_eq!(page.results[0].display_name(), "Nina - Sun");
        assert_eq!(page.results[0].size_mb(), 2.0);
        assert_eq!(page.results[1].track_type, TrackType::Ad);
        assert_eq!(page.results[1].display_name(), "Track #2");
    }

    #[test]
    fn test_track_update_omits_unset_fields() {
        let update = TrackUpdate {
            artist: Some("Nina".to_string()),
            track_type: Some(TrackType::Ad),
            ..TrackUpdate::default()
        };
        assert!(!update.is_empty());
        assert_eq!(
            serde_json::to_value(&update).unwrap(),
            serde_json::json!({"artist": "Nina", "track_type": "ad"})
        );

        let cleared = TrackUpdate {
            genre: Some(String::new()),
            ..TrackUpdate::default()
        };
        assert_eq!(serde_json::to_string(&cleared).unwrap(), r#"{"genre":""}"#);
        assert!(TrackUpdate::default().is_empty());
    }
}
