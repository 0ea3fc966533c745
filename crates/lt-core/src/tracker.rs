//! Per-player listening session state machine.
//!
//! A [`SessionTracker`] consumes the snapshots of a single player and decides
//! when the current listening session started, how much of it was actually
//! listened to, and when it ended. Session boundaries are:
//!
//! 1. A different track appears (`trackChanged`)
//! 2. The same track starts over (`repeat`)
//! 3. Nothing is heard for the orphan interval (`orphaned`)
//! 4. The source reports `stopped` with nothing loaded (`stopped`)
//!
//! Source quirks are isolated in the [`TrackerPolicy`] the tracker is built
//! with; this module only does the shared bookkeeping.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::clock::VirtualClock;
use crate::event::{DriftCorrection, EndReason, ListenRange, SessionCompleted, TrackerEvent};
use crate::play::Play;
use crate::policy::{PlayingContext, PlayingRule, RepeatContext, Timeouts, TrackerPolicy};
use crate::progress::{Progress, seconds};
use crate::snapshot::Snapshot;
use crate::state::{PlayerState, SessionState};
use crate::types::{PlatformId, PlaybackStatus};

/// Poll interval the fixed timeouts are scaled from.
const DEFAULT_POLL_INTERVAL_MS: u64 = 10_000;

/// Configuration shared by the trackers of a registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Silence after which a session is considered stale.
    /// Default: 100000 (10 poll intervals of 10 s).
    pub stale_after_ms: u64,

    /// Silence after which a stale session is finalized as orphaned.
    /// Never shorter than `stale_after_ms`. Default: 200000.
    pub orphaned_after_ms: u64,

    /// Backward position movement tolerated before the track is considered
    /// to have started over. Default: 2000.
    pub backward_tolerance_ms: u64,

    /// Fixed virtual clock tick. Default: 500.
    pub clock_tick_ms: u64,

    /// Consecutive updates needed before an inferred downgrade from
    /// `playing` changes the calculated status. Default: 2.
    pub status_confirmations: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            stale_after_ms: DEFAULT_POLL_INTERVAL_MS * 10,
            orphaned_after_ms: DEFAULT_POLL_INTERVAL_MS * 20,
            backward_tolerance_ms: 2_000,
            clock_tick_ms: 500,
            status_confirmations: 2,
        }
    }
}

impl TrackerConfig {
    /// Stale and orphan intervals used when the policy does not derive its own.
    pub fn fixed_timeouts(&self) -> Timeouts {
        let stale = Duration::from_millis(self.stale_after_ms);
        Timeouts {
            stale,
            orphaned: Duration::from_millis(self.orphaned_after_ms).max(stale),
        }
    }

    /// Backward tolerance in seconds.
    pub fn backward_tolerance(&self) -> f64 {
        Duration::from_millis(self.backward_tolerance_ms).as_secs_f64()
    }

    pub const fn clock_tick(&self) -> Duration {
        Duration::from_millis(self.clock_tick_ms)
    }
}

/// The session currently credited by a tracker.
#[derive(Debug)]
struct Session {
    id: Uuid,
    play: Play,
    started_at: DateTime<Utc>,
    listened: f64,
    /// Last observation applied to this session.
    last_progress: Progress,
    timeouts: Timeouts,
    ranges: Vec<ListenRange>,
    open_range: Option<ListenRange>,
}

impl Session {
    /// Extends the open listen range up to `current`, opening one if needed.
    fn extend_range(&mut self, current: &Progress, credit: f64) {
        let start = self
            .last_progress
            .position()
            .or_else(|| self.ranges.last().map(|r| r.end))
            .unwrap_or(0.0);
        let range = self
            .open_range
            .get_or_insert(ListenRange { start, end: start });
        range.end = current
            .position()
            .filter(|p| *p >= range.start)
            .unwrap_or(range.end + credit);
    }

    fn close_range(&mut self) {
        if let Some(range) = self.open_range.take() {
            if range.duration() > 0.0 {
                self.ranges.push(range);
            }
        }
    }

    fn ranges_snapshot(&self) -> Vec<ListenRange> {
        self.ranges
            .iter()
            .copied()
            .chain(self.open_range.filter(|r| r.duration() > 0.0))
            .collect()
    }
}

/// Tracks listening sessions for one player.
#[derive(Debug)]
pub struct SessionTracker {
    platform: PlatformId,
    policy: TrackerPolicy,
    config: TrackerConfig,
    reported_status: PlaybackStatus,
    calculated_status: PlaybackStatus,
    /// Inferred status awaiting confirmation, with the number of sightings.
    pending_status: Option<(PlaybackStatus, u32)>,
    session: Option<Session>,
    state: SessionState,
    last_seen: DateTime<Utc>,
    last_position: Option<f64>,
    clock: VirtualClock,
    invariant_violations: u64,
}

impl SessionTracker {
    /// Creates an idle tracker for `platform`, first seen at `first_seen`.
    pub fn new(
        platform: PlatformId,
        policy: TrackerPolicy,
        config: TrackerConfig,
        first_seen: DateTime<Utc>,
    ) -> Self {
        let clock = VirtualClock::new(config.clock_tick());
        Self {
            platform,
            policy,
            config,
            reported_status: PlaybackStatus::Unknown,
            calculated_status: PlaybackStatus::Unknown,
            pending_status: None,
            session: None,
            state: SessionState::NoSession,
            last_seen: first_seen,
            last_position: None,
            clock,
            invariant_violations: 0,
        }
    }

    pub const fn platform(&self) -> &PlatformId {
        &self.platform
    }

    pub const fn policy(&self) -> &TrackerPolicy {
        &self.policy
    }

    pub const fn reported_status(&self) -> PlaybackStatus {
        self.reported_status
    }

    pub const fn calculated_status(&self) -> PlaybackStatus {
        self.calculated_status
    }

    pub const fn last_seen(&self) -> DateTime<Utc> {
        self.last_seen
    }

    pub fn current_play(&self) -> Option<&Play> {
        self.session.as_ref().map(|s| &s.play)
    }

    pub fn session_id(&self) -> Option<Uuid> {
        self.session.as_ref().map(|s| s.id)
    }

    pub const fn has_session(&self) -> bool {
        self.session.is_some()
    }

    /// Snapshots that arrived out of order for this identity.
    pub const fn invariant_violations(&self) -> u64 {
        self.invariant_violations
    }

    /// Seconds credited to the current session.
    pub fn listened(&self) -> f64 {
        self.session.as_ref().map_or(0.0, |s| s.listened)
    }

    /// Applies a raw snapshot: sanitizes its input, resolves its status
    /// through the policy, then runs [`Self::set_state`].
    pub fn apply(&mut self, snapshot: Snapshot) -> Vec<TrackerEvent> {
        let Snapshot {
            platform,
            timestamp,
            status,
            play,
            position,
            position_percent,
            event,
        } = snapshot;

        if platform != self.platform {
            self.invariant_violations += 1;
            error!(
                platform = %self.platform,
                received = %platform,
                "snapshot routed to the wrong tracker"
            );
        }

        let duration = match &play {
            Some(play) => play.known_duration(),
            None => self.session.as_ref().and_then(|s| s.play.known_duration()),
        };
        let (progress, corrections) =
            Progress::sanitized(timestamp, position, position_percent, duration);
        for correction in corrections {
            warn!(platform = %self.platform, %correction, "clamped invalid snapshot input");
        }

        let status = self.policy.effective_status(status, event);
        self.set_state(status, play, progress)
    }

    /// Folds one update into the tracker.
    ///
    /// Returns the events produced by the update, in order. Never fails: bad
    /// input degrades to "no credit" rather than an error. An update older
    /// than the previous one is applied at the previous update's time.
    pub fn set_state(
        &mut self,
        status: PlaybackStatus,
        play: Option<Play>,
        progress: Progress,
    ) -> Vec<TrackerEvent> {
        let mut progress = if self.policy.uses_position() {
            progress
        } else {
            progress.without_position()
        };
        if progress.timestamp() < self.last_seen {
            self.invariant_violations += 1;
            error!(
                platform = %self.platform,
                last_seen = %self.last_seen,
                timestamp = %progress.timestamp(),
                "snapshot older than the previous update; applying it at the previous time"
            );
            progress = progress.not_before(self.last_seen);
        }
        let now = progress.timestamp();
        let mut events = Vec::new();

        let has_play = play.is_some() || self.session.is_some();
        let comparable = play.as_ref().is_none_or(|p| {
            self.session
                .as_ref()
                .is_some_and(|s| s.play.same_track(p))
        });
        let logical = self.logical_status(status, has_play, comparable, &progress);

        match play {
            Some(play)
                if self
                    .session
                    .as_ref()
                    .is_some_and(|s| !s.play.same_track(&play)) =>
            {
                self.credit_until(now);
                events.extend(self.finalize(EndReason::TrackChanged, now));
                self.update_status(status, logical);
                self.start_session(play, progress);
            }
            Some(play) if self.session.is_none() => {
                self.update_status(status, logical);
                self.start_session(play, progress);
            }
            None if status == PlaybackStatus::Stopped => {
                self.update_status(status, logical);
                events.extend(self.finalize(EndReason::Stopped, now));
                self.clock.stop();
            }
            _ => {
                self.update_status(status, logical);
                if self.session.is_some() {
                    self.continue_session(status, progress, &mut events);
                }
            }
        }

        self.last_seen = now;
        self.last_position = progress.position();
        self.state = if self.session.is_some() {
            SessionState::Active
        } else {
            SessionState::NoSession
        };
        events
    }

    /// Whether the reported position means the current track started over.
    pub fn is_session_repeat(
        &self,
        position: Option<f64>,
        reported_at: Option<DateTime<Utc>>,
    ) -> bool {
        let Some(session) = &self.session else {
            return false;
        };
        let credits_pending = self.policy.playing == PlayingRule::PlayPresent
            || self.calculated_status.is_playing();
        let pending = match reported_at {
            Some(at) if credits_pending => seconds(at - session.last_progress.timestamp()).max(0.0),
            _ => 0.0,
        };
        self.policy.is_repeat(&RepeatContext {
            last_position: session.last_progress.position(),
            position,
            listened: session.listened + pending,
            duration: session.play.known_duration(),
            backward_tolerance: self.config.backward_tolerance(),
        })
    }

    /// Stale and orphan intervals for the current session.
    pub fn timeouts(&self) -> Timeouts {
        self.session.as_ref().map_or_else(
            || self.policy.timeouts(&self.config, None),
            |s| s.timeouts,
        )
    }

    pub fn stale_interval(&self) -> Duration {
        self.timeouts().stale
    }

    pub fn orphaned_interval(&self) -> Duration {
        self.timeouts().orphaned
    }

    /// Whether nothing has been heard for the orphan interval.
    pub fn is_dead(&self, now: DateTime<Utc>) -> bool {
        self.silence(now) >= self.orphaned_interval()
    }

    /// Applies stale and orphan timeouts as of `now`.
    pub fn check_timeouts(&mut self, now: DateTime<Utc>) -> Vec<TrackerEvent> {
        let Some(timeouts) = self.session.as_ref().map(|s| s.timeouts) else {
            self.state = SessionState::NoSession;
            return Vec::new();
        };
        let silent = self.silence(now);

        if silent >= timeouts.orphaned {
            info!(
                platform = %self.platform,
                silent_secs = silent.as_secs(),
                "no update within grace period, session orphaned"
            );
            self.state = SessionState::Orphaned;
            let events: Vec<TrackerEvent> = self
                .finalize(EndReason::Orphaned, self.last_seen)
                .into_iter()
                .collect();
            self.clock.stop();
            return events;
        }

        if silent >= timeouts.stale && self.state != SessionState::Stale {
            debug!(
                platform = %self.platform,
                silent_secs = silent.as_secs(),
                "session stale"
            );
            self.state = SessionState::Stale;
            self.clock.pause();
        }
        Vec::new()
    }

    /// Ends the current session, if any, and returns its completion event.
    pub fn finalize(&mut self, reason: EndReason, ended_at: DateTime<Utc>) -> Option<TrackerEvent> {
        let mut session = self.session.take()?;
        session.close_range();
        self.state = SessionState::NoSession;

        info!(
            platform = %self.platform,
            session_id = %session.id,
            track = %session.play,
            listened_secs = session.listened,
            reason = %reason,
            "session finished"
        );

        let track_duration_seconds = session.play.known_duration();
        Some(TrackerEvent::SessionCompleted(SessionCompleted {
            platform: self.platform.clone(),
            session_id: session.id,
            play: session.play,
            listened_seconds: session.listened,
            track_duration_seconds,
            started_at: session.started_at,
            ended_at,
            end_reason: reason,
            listen_ranges: session.ranges,
        }))
    }

    /// Advances the virtual clock by one tick.
    pub fn tick_clock(&mut self) {
        self.clock.tick();
    }

    pub fn advance_clock(&mut self, delta: Duration) {
        self.clock.advance(delta);
    }

    /// Read-only projection of the tracker as of `now`.
    pub fn api_state(&self, now: DateTime<Utc>) -> PlayerState {
        let timeouts = self.timeouts();
        let session_state = match &self.session {
            None => SessionState::NoSession,
            Some(_) => {
                let silent = self.silence(now);
                if silent >= timeouts.orphaned {
                    SessionState::Orphaned
                } else if silent >= timeouts.stale {
                    SessionState::Stale
                } else {
                    SessionState::Active
                }
            }
        };

        PlayerState {
            platform: self.platform.clone(),
            policy: self.policy.kind,
            session_state,
            reported_status: self.reported_status,
            calculated_status: self.calculated_status,
            play: self.session.as_ref().map(|s| s.play.clone()),
            session_id: self.session_id(),
            session_started_at: self.session.as_ref().map(|s| s.started_at),
            listened_seconds: self.listened(),
            position: self.session.as_ref().map(|_| self.clock.position()),
            clock: self.clock.state(),
            last_seen: self.last_seen,
            stale_after_seconds: timeouts.stale.as_secs_f64(),
            orphaned_after_seconds: timeouts.orphaned.as_secs_f64(),
            listen_ranges: self
                .session
                .as_ref()
                .map(Session::ranges_snapshot)
                .unwrap_or_default(),
        }
    }

    fn silence(&self, now: DateTime<Utc>) -> Duration {
        (now - self.last_seen).to_std().unwrap_or_default()
    }

    fn start_session(&mut self, play: Play, progress: Progress) {
        let timeouts = self.policy.timeouts(&self.config, play.known_duration());
        let playing =
            self.policy.playing == PlayingRule::PlayPresent || self.calculated_status.is_playing();

        self.clock.stop();
        if let Some(position) = progress.position() {
            self.clock.seek(position);
        }
        if playing {
            self.clock.play(None);
        }

        let id = Uuid::new_v4();
        info!(
            platform = %self.platform,
            session_id = %id,
            track = %play,
            "session started"
        );

        let start = progress.position().unwrap_or(0.0);
        self.session = Some(Session {
            id,
            play,
            started_at: progress.timestamp(),
            listened: 0.0,
            last_progress: progress,
            timeouts,
            ranges: Vec::new(),
            open_range: playing.then_some(ListenRange { start, end: start }),
        });
        self.state = SessionState::Active;
    }

    fn continue_session(
        &mut self,
        status: PlaybackStatus,
        progress: Progress,
        events: &mut Vec<TrackerEvent>,
    ) {
        if self.is_session_repeat(progress.position(), Some(progress.timestamp())) {
            let Some(play) = self.session.as_ref().map(|s| s.play.clone()) else {
                return;
            };
            debug!(platform = %self.platform, track = %play, "track started over");
            events.extend(self.finalize(EndReason::Repeat, progress.timestamp()));
            self.start_session(play, progress);
            return;
        }

        let Some(still_playing) = self.session.as_ref().map(|session| {
            self.policy.still_playing(&PlayingContext {
                status,
                previous: &session.last_progress,
                current: &progress,
            })
        }) else {
            return;
        };

        if let Some(reported) = progress.position() {
            self.resync_clock(reported, progress.timestamp(), events);
        }
        if still_playing {
            self.clock.play(None);
        } else {
            self.clock.pause();
        }

        let Some(session) = self.session.as_mut() else {
            return;
        };
        if still_playing {
            let credit = progress.elapsed_since(&session.last_progress).max(0.0);
            session.listened += credit;
            session.extend_range(&progress, credit);
        } else {
            session.close_range();
        }
        session.last_progress = progress;
    }

    /// Credits the wall time since the last update to a session that is
    /// about to be replaced, capped at what is left of the track.
    fn credit_until(&mut self, now: DateTime<Utc>) {
        let playing = self.policy.playing == PlayingRule::PlayPresent
            || self.calculated_status.is_playing();
        if !playing {
            return;
        }
        let Some(session) = self.session.as_mut() else {
            return;
        };

        let gap = seconds(now - session.last_progress.timestamp()).max(0.0);
        let played = session
            .last_progress
            .position()
            .unwrap_or(session.listened);
        let credit = session
            .play
            .known_duration()
            .map_or(gap, |d| gap.min((d - played).max(0.0)));
        if credit > 0.0 {
            session.listened += credit;
            let closing = Progress::at(now);
            session.extend_range(&closing, credit);
        }
    }

    fn resync_clock(
        &mut self,
        reported: f64,
        timestamp: DateTime<Utc>,
        events: &mut Vec<TrackerEvent>,
    ) {
        let Some(session_id) = self.session_id() else {
            return;
        };
        let estimated = self.clock.position();
        let drift = self.clock.drift_from(reported);
        if drift.abs() <= self.policy.allowed_drift.as_secs_f64() {
            return;
        }

        debug!(
            platform = %self.platform,
            estimated,
            reported,
            drift,
            "clock drift beyond tolerance, resynchronizing"
        );
        self.clock.seek(reported);
        events.push(TrackerEvent::ClockResynced(DriftCorrection {
            platform: self.platform.clone(),
            session_id,
            timestamp,
            estimated,
            reported,
        }));
    }

    /// Derives what the player is most plausibly doing from what it reports
    /// and how its position moved since the previous update.
    fn logical_status(
        &self,
        reported: PlaybackStatus,
        has_play: bool,
        comparable: bool,
        progress: &Progress,
    ) -> PlaybackStatus {
        if self.policy.playing == PlayingRule::PlayPresent {
            return if has_play {
                PlaybackStatus::Playing
            } else {
                reported
            };
        }

        let movement = match (comparable, self.last_position, progress.position()) {
            (true, Some(before), Some(now)) => {
                Some((now - before, seconds(progress.timestamp() - self.last_seen)))
            }
            _ => None,
        };
        let drift = self.policy.allowed_drift.as_secs_f64();

        match (reported, movement) {
            (PlaybackStatus::Stopped | PlaybackStatus::Unknown, Some((moved, wall)))
                if moved > 0.0 && moved <= wall + drift =>
            {
                PlaybackStatus::Playing
            }
            (PlaybackStatus::Playing, Some((moved, wall)))
                if moved.abs() < f64::EPSILON && wall >= drift =>
            {
                PlaybackStatus::Paused
            }
            (status, _) => status,
        }
    }

    /// Moves the calculated status towards `logical`.
    ///
    /// Reported statuses apply immediately; a downgrade from `playing` that
    /// was only inferred must be seen `status_confirmations` times in a row.
    fn update_status(&mut self, reported: PlaybackStatus, logical: PlaybackStatus) {
        self.reported_status = reported;
        if logical == self.calculated_status {
            self.pending_status = None;
            return;
        }

        let inferred_downgrade = self.calculated_status.is_playing()
            && (logical != reported || reported == PlaybackStatus::Unknown);
        let seen = match self.pending_status {
            Some((pending, count)) if inferred_downgrade && pending == logical => count + 1,
            _ => 1,
        };
        if inferred_downgrade && seen < self.config.status_confirmations {
            self.pending_status = Some((logical, seen));
            return;
        }

        debug!(
            platform = %self.platform,
            from = %self.calculated_status,
            to = %logical,
            "calculated status changed"
        );
        self.calculated_status = logical;
        self.pending_status = None;
    }
}
