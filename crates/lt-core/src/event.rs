//! Events emitted by trackers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::play::Play;
use crate::types::PlatformId;

/// Why a session was finalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EndReason {
    /// A different track started on the same player.
    TrackChanged,
    /// The same track started over.
    Repeat,
    /// No qualifying update arrived within the grace period.
    Orphaned,
    /// The source reported playback stopped with nothing loaded.
    Stopped,
    /// The player disappeared from its source.
    Removed,
}

impl EndReason {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::TrackChanged => "trackChanged",
            Self::Repeat => "repeat",
            Self::Orphaned => "orphaned",
            Self::Stopped => "stopped",
            Self::Removed => "removed",
        }
    }
}

impl std::fmt::Display for EndReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A contiguous span of a track that was actually played, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ListenRange {
    pub start: f64,
    pub end: f64,
}

impl ListenRange {
    pub fn duration(&self) -> f64 {
        (self.end - self.start).max(0.0)
    }
}

/// A finalized listening session.
///
/// Emitted exactly once per session. Whether it counts as a scrobble is for
/// the consumer to decide from `listened_seconds` and
/// `track_duration_seconds`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCompleted {
    pub platform: PlatformId,
    pub session_id: Uuid,
    pub play: Play,
    pub listened_seconds: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_duration_seconds: Option<f64>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub end_reason: EndReason,
    #[serde(default)]
    pub listen_ranges: Vec<ListenRange>,
}

/// The virtual clock was resynchronized to a reported position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriftCorrection {
    pub platform: PlatformId,
    pub session_id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// Clock estimate before resynchronizing, in seconds.
    pub estimated: f64,
    /// Position reported by the source, in seconds.
    pub reported: f64,
}

impl DriftCorrection {
    /// Signed drift in seconds; positive when the source is ahead.
    pub fn drift(&self) -> f64 {
        self.reported - self.estimated
    }
}

/// Everything a tracker can emit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TrackerEvent {
    SessionCompleted(SessionCompleted),
    ClockResynced(DriftCorrection),
}

impl TrackerEvent {
    pub const fn platform(&self) -> &PlatformId {
        match self {
            Self::SessionCompleted(completed) => &completed.platform,
            Self::ClockResynced(correction) => &correction.platform,
        }
    }

    pub const fn as_completed(&self) -> Option<&SessionCompleted> {
        match self {
            Self::SessionCompleted(completed) => Some(completed),
            Self::ClockResynced(_) => None,
        }
    }
}
