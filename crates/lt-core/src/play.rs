//! Normalized plays handed over by source adapters.

use serde::{Deserialize, Serialize};

/// Track identity and descriptive metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    /// Source-stable track identifier, when the source has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
}

/// A play as normalized by a source adapter.
///
/// Once passed to a tracker the play is owned by the session; the tracker
/// never mutates it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Play {
    pub track: Track,
    /// Track duration in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    /// Arbitrary source metadata, carried through untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Key used to decide whether two plays are the same track.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TrackKey {
    Id(String),
    Descriptive {
        artist: String,
        title: String,
        album: String,
    },
}

fn fold(value: &str) -> String {
    value.trim().to_lowercase()
}

impl Play {
    /// Creates a play for a titled track with a known duration.
    pub fn new(title: impl Into<String>, duration: Option<f64>) -> Self {
        Self {
            track: Track {
                id: None,
                title: title.into(),
                artist: None,
                album: None,
            },
            duration,
            metadata: None,
        }
    }

    #[must_use]
    pub fn with_artist(mut self, artist: impl Into<String>) -> Self {
        self.track.artist = Some(artist.into());
        self
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.track.id = Some(id.into());
        self
    }

    /// Returns the identity key of this play's track.
    ///
    /// The source id wins when present; otherwise artist, title and album are
    /// compared case-insensitively.
    pub fn key(&self) -> TrackKey {
        if let Some(id) = self.track.id.as_deref().filter(|id| !id.trim().is_empty()) {
            return TrackKey::Id(id.trim().to_string());
        }
        TrackKey::Descriptive {
            artist: self.track.artist.as_deref().map(fold).unwrap_or_default(),
            title: fold(&self.track.title),
            album: self.track.album.as_deref().map(fold).unwrap_or_default(),
        }
    }

    /// Returns true when both plays refer to the same track.
    pub fn same_track(&self, other: &Self) -> bool {
        self.key() == other.key()
    }

    /// Known, usable duration in seconds.
    pub fn known_duration(&self) -> Option<f64> {
        self.duration.filter(|d| d.is_finite() && *d > 0.0)
    }
}

impl std::fmt::Display for Play {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.track.artist {
            Some(artist) => write!(f, "{artist} - {}", self.track.title),
            None => f.write_str(&self.track.title),
        }
    }
}
