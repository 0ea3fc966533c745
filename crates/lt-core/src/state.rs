//! Read-only projections of tracker state for status consumers.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::clock::ClockState;
use crate::event::ListenRange;
use crate::play::Play;
use crate::policy::PolicyKind;
use crate::types::{PlatformId, PlaybackStatus};

/// Lifecycle of the session held by a tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Nothing is being listened to.
    NoSession,
    /// Updates are arriving.
    Active,
    /// No update for the stale interval; the grace period is running.
    Stale,
    /// Grace period exceeded; the next sweep finalizes the session.
    Orphaned,
}

impl SessionState {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NoSession => "no_session",
            Self::Active => "active",
            Self::Stale => "stale",
            Self::Orphaned => "orphaned",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of one tracker, safe to hand to dashboards.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerState {
    pub platform: PlatformId,
    pub policy: PolicyKind,
    pub session_state: SessionState,
    pub reported_status: PlaybackStatus,
    pub calculated_status: PlaybackStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub play: Option<Play>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_started_at: Option<DateTime<Utc>>,
    pub listened_seconds: f64,
    /// Estimated position from the virtual clock, while a session exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<f64>,
    pub clock: ClockState,
    pub last_seen: DateTime<Utc>,
    pub stale_after_seconds: f64,
    pub orphaned_after_seconds: f64,
    pub listen_ranges: Vec<ListenRange>,
}
