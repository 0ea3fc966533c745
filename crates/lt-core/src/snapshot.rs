//! Normalized snapshots delivered by source adapters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::play::Play;
use crate::types::{PlatformId, PlaybackEvent, PlaybackStatus};

/// One observation of a player, as produced by a source adapter.
///
/// Every field other than the identity and timestamp is optional because
/// sources differ in what they report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub platform: PlatformId,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<PlaybackStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub play: Option<Play>,
    /// Reported position in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position_percent: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<PlaybackEvent>,
}

impl Snapshot {
    pub const fn new(platform: PlatformId, timestamp: DateTime<Utc>) -> Self {
        Self {
            platform,
            timestamp,
            status: None,
            play: None,
            position: None,
            position_percent: None,
            event: None,
        }
    }

    #[must_use]
    pub fn with_status(mut self, status: PlaybackStatus) -> Self {
        self.status = Some(status);
        self
    }

    #[must_use]
    pub fn with_play(mut self, play: Play) -> Self {
        self.play = Some(play);
        self
    }

    #[must_use]
    pub fn with_position(mut self, position: f64) -> Self {
        self.position = Some(position);
        self
    }

    #[must_use]
    pub fn with_position_percent(mut self, percent: f64) -> Self {
        self.position_percent = Some(percent);
        self
    }

    #[must_use]
    pub fn with_event(mut self, event: PlaybackEvent) -> Self {
        self.event = Some(event);
        self
    }
}
