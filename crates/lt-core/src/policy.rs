//! Source-specific tracking policies.
//!
//! Sources disagree on how they signal playback. A [`TrackerPolicy`] captures
//! the two decisions that differ between them, "is this session still
//! playing?" and "when does a silent session time out?", as plain data that
//! the tracker consults. The state machine itself never changes.
//!
//! | Kind | Still playing | Timeouts |
//! |---|---|---|
//! | `positional` | status `playing` and position advancing within drift | fixed |
//! | `radio` | status `playing`, positions ignored | fixed plus a graceful end buffer |
//! | `now_playing` | a play is present | derived from track duration |
//! | `media_server` | as `positional` | fixed; repeat also on duration overrun |
//! | `event_driven` | as `positional`, status inferred from the event | fixed |

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::progress::Progress;
use crate::tracker::TrackerConfig;
use crate::types::{PlaybackEvent, PlaybackStatus, ValidationError};

/// Extra grace added to duration-derived orphan intervals.
pub const DEFAULT_ORPHAN_EPSILON: Duration = Duration::from_secs(10);

/// Listened time beyond this share of the track duration counts as a repeat
/// for media servers that never report one.
pub const OVERRUN_REPEAT_RATIO: f64 = 1.05;

/// Built-in policy variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    #[default]
    Positional,
    Radio,
    NowPlaying,
    MediaServer,
    EventDriven,
}

impl PolicyKind {
    pub const ALL: [Self; 5] = [
        Self::Positional,
        Self::Radio,
        Self::NowPlaying,
        Self::MediaServer,
        Self::EventDriven,
    ];

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Positional => "positional",
            Self::Radio => "radio",
            Self::NowPlaying => "now_playing",
            Self::MediaServer => "media_server",
            Self::EventDriven => "event_driven",
        }
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PolicyKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ValidationError::InvalidPolicyKind {
                value: s.to_string(),
            })
    }
}

/// How a tracker decides that elapsed time should be credited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayingRule {
    /// Status is `playing` and, when both sides report a position, the
    /// position moved forward by no more than wall time plus allowed drift.
    ReportedAndAdvancing,
    /// Status is `playing`; positions are ignored.
    ReportedStatus,
    /// Any update about the current play counts as playing.
    PlayPresent,
}

/// How stale and orphan intervals are computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutRule {
    /// Intervals straight from [`TrackerConfig`].
    Fixed,
    /// Fixed intervals, each extended by the allowed drift.
    GracefulEnd,
    /// Stale after the track duration, orphaned after half of it plus
    /// `epsilon`. Falls back to fixed intervals without a duration.
    TrackDuration { epsilon: Duration },
}

/// How a tracker detects that the same track started over.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RepeatRule {
    /// The session never restarts on its own; continuous streams.
    Never,
    /// Position moved backwards by more than the backward tolerance.
    Backward,
    /// Backward, or listened time exceeded `ratio` times the duration.
    BackwardOrOverrun { ratio: f64 },
}

/// Resolved stale and orphan intervals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub stale: Duration,
    pub orphaned: Duration,
}

/// Inputs to [`TrackerPolicy::still_playing`].
#[derive(Debug, Clone, Copy)]
pub struct PlayingContext<'a> {
    /// Effective status of the incoming update.
    pub status: PlaybackStatus,
    pub previous: &'a Progress,
    pub current: &'a Progress,
}

/// Inputs to [`TrackerPolicy::is_repeat`].
#[derive(Debug, Clone, Copy)]
pub struct RepeatContext {
    pub last_position: Option<f64>,
    pub position: Option<f64>,
    /// Listened seconds including time pending since the last update.
    pub listened: f64,
    pub duration: Option<f64>,
    pub backward_tolerance: f64,
}

/// A source-specific policy value consulted by the tracker.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerPolicy {
    pub kind: PolicyKind,
    pub playing: PlayingRule,
    pub timeouts: TimeoutRule,
    pub repeat: RepeatRule,
    /// Infer the status from the snapshot's event when no status is reported.
    pub infer_status_from_event: bool,
    /// Divergence between reported and estimated position tolerated before
    /// the clock is resynchronized.
    pub allowed_drift: Duration,
}

impl Default for TrackerPolicy {
    fn default() -> Self {
        Self::positional()
    }
}

impl TrackerPolicy {
    /// Generic streaming services and media servers reporting position.
    pub const fn positional() -> Self {
        Self {
            kind: PolicyKind::Positional,
            playing: PlayingRule::ReportedAndAdvancing,
            timeouts: TimeoutRule::Fixed,
            repeat: RepeatRule::Backward,
            infer_status_from_event: false,
            allowed_drift: Duration::from_secs(3),
        }
    }

    /// Continuous streams with no seek or position semantics.
    pub const fn radio() -> Self {
        Self {
            kind: PolicyKind::Radio,
            playing: PlayingRule::ReportedStatus,
            timeouts: TimeoutRule::GracefulEnd,
            repeat: RepeatRule::Never,
            infer_status_from_event: false,
            allowed_drift: Duration::from_secs(10),
        }
    }

    /// Push-only "now playing" sources that never send a stop.
    pub const fn now_playing() -> Self {
        Self {
            kind: PolicyKind::NowPlaying,
            playing: PlayingRule::PlayPresent,
            timeouts: TimeoutRule::TrackDuration {
                epsilon: DEFAULT_ORPHAN_EPSILON,
            },
            repeat: RepeatRule::Backward,
            infer_status_from_event: false,
            allowed_drift: Duration::from_secs(3),
        }
    }

    /// Media servers that never signal a repeat explicitly.
    pub const fn media_server() -> Self {
        Self {
            kind: PolicyKind::MediaServer,
            repeat: RepeatRule::BackwardOrOverrun {
                ratio: OVERRUN_REPEAT_RATIO,
            },
            ..Self::positional()
        }
    }

    /// Sources pushing explicit events that may lack a status field.
    pub const fn event_driven() -> Self {
        Self {
            kind: PolicyKind::EventDriven,
            infer_status_from_event: true,
            ..Self::positional()
        }
    }

    pub const fn for_kind(kind: PolicyKind) -> Self {
        match kind {
            PolicyKind::Positional => Self::positional(),
            PolicyKind::Radio => Self::radio(),
            PolicyKind::NowPlaying => Self::now_playing(),
            PolicyKind::MediaServer => Self::media_server(),
            PolicyKind::EventDriven => Self::event_driven(),
        }
    }

    #[must_use]
    pub const fn with_allowed_drift(mut self, allowed_drift: Duration) -> Self {
        self.allowed_drift = allowed_drift;
        self
    }

    /// Whether reported positions mean anything to this policy. Streams
    /// without seek semantics are tracked by wall time alone.
    pub fn uses_position(&self) -> bool {
        self.playing != PlayingRule::ReportedStatus
    }

    /// Resolves the status of an update, inferring it from the event when the
    /// policy allows and the source sent none.
    pub fn effective_status(
        &self,
        reported: Option<PlaybackStatus>,
        event: Option<PlaybackEvent>,
    ) -> PlaybackStatus {
        match (reported, event) {
            (Some(status), _) if status != PlaybackStatus::Unknown => status,
            (_, Some(event)) if self.infer_status_from_event => event.implied_status(),
            (reported, _) => reported.unwrap_or_default(),
        }
    }

    /// Whether time elapsed since the previous update should be credited.
    pub fn still_playing(&self, ctx: &PlayingContext<'_>) -> bool {
        match self.playing {
            PlayingRule::PlayPresent => true,
            PlayingRule::ReportedStatus => ctx.status.is_playing(),
            PlayingRule::ReportedAndAdvancing => {
                if !ctx.status.is_playing() {
                    return false;
                }
                match (ctx.current.position(), ctx.previous.position()) {
                    (Some(_), Some(_)) => {
                        let advanced = ctx.current.elapsed_since(ctx.previous);
                        let wall = ctx.current.wall_elapsed_since(ctx.previous);
                        advanced >= 0.0 && advanced <= wall + self.allowed_drift.as_secs_f64()
                    }
                    _ => true,
                }
            }
        }
    }

    /// Whether playback looped back to the start of the same track.
    pub fn is_repeat(&self, ctx: &RepeatContext) -> bool {
        let backward = match (ctx.last_position, ctx.position) {
            (Some(last), Some(now)) => last - now > ctx.backward_tolerance,
            _ => false,
        };
        match self.repeat {
            RepeatRule::Never => false,
            RepeatRule::Backward => backward,
            RepeatRule::BackwardOrOverrun { ratio } => {
                backward || ctx.duration.is_some_and(|d| ctx.listened > d * ratio)
            }
        }
    }

    /// Stale and orphan intervals for a session with the given track duration.
    pub fn timeouts(&self, config: &TrackerConfig, duration: Option<f64>) -> Timeouts {
        let fixed = config.fixed_timeouts();
        match self.timeouts {
            TimeoutRule::Fixed => fixed,
            TimeoutRule::GracefulEnd => Timeouts {
                stale: fixed.stale.saturating_add(self.allowed_drift),
                orphaned: fixed.orphaned.saturating_add(self.allowed_drift),
            },
            TimeoutRule::TrackDuration { epsilon } => {
                match duration.filter(|d| d.is_finite() && *d > 0.0) {
                    Some(d) => Timeouts {
                        stale: Duration::try_from_secs_f64(d).unwrap_or(Duration::MAX),
                        orphaned: Duration::try_from_secs_f64(d / 2.0)
                            .unwrap_or(Duration::MAX)
                            .saturating_add(epsilon),
                    },
                    None => fixed,
                }
            }
        }
    }
}
