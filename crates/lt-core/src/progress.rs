//! Point-in-time playback position observations.

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;

/// Converts a chrono delta to fractional seconds.
#[expect(
    clippy::cast_precision_loss,
    reason = "millisecond deltas stay far below 2^52"
)]
pub fn seconds(delta: TimeDelta) -> f64 {
    delta.num_milliseconds() as f64 / 1000.0
}

/// An immutable observation of a track's playback position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    position: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    position_percent: Option<f64>,
}

/// An adjustment made while sanitizing reported input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Correction {
    /// Position or percentage was NaN or infinite and has been dropped.
    NotFinite,
    /// Position was below zero and has been clamped to zero.
    NegativePosition { reported: f64 },
    /// Position exceeded the known duration and has been clamped to it.
    BeyondDuration { reported: f64, duration: f64 },
    /// Percentage fell outside `0..=100` and has been clamped.
    PercentOutOfRange { reported: f64 },
    /// Position and percentage disagreed; the percentage was recomputed.
    InconsistentPercent { reported: f64, expected: f64 },
}

impl std::fmt::Display for Correction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFinite => f.write_str("non-finite position dropped"),
            Self::NegativePosition { reported } => {
                write!(f, "negative position {reported}s clamped to 0")
            }
            Self::BeyondDuration { reported, duration } => {
                write!(f, "position {reported}s clamped to duration {duration}s")
            }
            Self::PercentOutOfRange { reported } => {
                write!(f, "percent {reported} clamped to 0..=100")
            }
            Self::InconsistentPercent { reported, expected } => {
                write!(f, "percent {reported} replaced by {expected:.1} derived from position")
            }
        }
    }
}

/// Tolerance, in percentage points, before a reported percentage is considered
/// inconsistent with the reported position.
const PERCENT_TOLERANCE: f64 = 1.0;

impl Progress {
    /// An observation that carries only a timestamp.
    pub const fn at(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            position: None,
            position_percent: None,
        }
    }

    /// Builds an observation from raw reported values.
    ///
    /// Invalid values are clamped into range and every adjustment is returned
    /// so the caller can log it. When the duration is known, a missing
    /// position is derived from the percentage and vice versa.
    pub fn sanitized(
        timestamp: DateTime<Utc>,
        position: Option<f64>,
        position_percent: Option<f64>,
        duration: Option<f64>,
    ) -> (Self, Vec<Correction>) {
        let mut corrections = Vec::new();
        let duration = duration.filter(|d| d.is_finite() && *d > 0.0);

        let mut position = position.and_then(|p| {
            if p.is_finite() {
                Some(p)
            } else {
                corrections.push(Correction::NotFinite);
                None
            }
        });
        if let Some(p) = position {
            if p < 0.0 {
                corrections.push(Correction::NegativePosition { reported: p });
                position = Some(0.0);
            } else if let Some(d) = duration.filter(|d| p > *d) {
                corrections.push(Correction::BeyondDuration {
                    reported: p,
                    duration: d,
                });
                position = Some(d);
            }
        }

        let mut percent = position_percent.and_then(|p| {
            if p.is_finite() {
                Some(p)
            } else {
                corrections.push(Correction::NotFinite);
                None
            }
        });
        if let Some(p) = percent.filter(|p| !(0.0..=100.0).contains(p)) {
            corrections.push(Correction::PercentOutOfRange { reported: p });
            percent = Some(p.clamp(0.0, 100.0));
        }

        if let Some(d) = duration {
            match (position, percent) {
                (Some(pos), Some(pct)) => {
                    let expected = pos / d * 100.0;
                    if (expected - pct).abs() > PERCENT_TOLERANCE {
                        corrections.push(Correction::InconsistentPercent {
                            reported: pct,
                            expected,
                        });
                        percent = Some(expected);
                    }
                }
                (Some(pos), None) => percent = Some(pos / d * 100.0),
                (None, Some(pct)) => position = Some(pct / 100.0 * d),
                (None, None) => {}
            }
        }

        (
            Self {
                timestamp,
                position,
                position_percent: percent,
            },
            corrections,
        )
    }

    /// The same observation with position and percentage dropped.
    #[must_use]
    pub const fn without_position(self) -> Self {
        Self::at(self.timestamp)
    }

    /// The same observation moved forward to `earliest` if it is older.
    #[must_use]
    pub fn not_before(mut self, earliest: DateTime<Utc>) -> Self {
        self.timestamp = self.timestamp.max(earliest);
        self
    }

    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Reported position in seconds.
    pub const fn position(&self) -> Option<f64> {
        self.position
    }

    pub const fn position_percent(&self) -> Option<f64> {
        self.position_percent
    }

    /// Seconds of wall-clock time between `earlier` and this observation.
    pub fn wall_elapsed_since(&self, earlier: &Self) -> f64 {
        seconds(self.timestamp - earlier.timestamp)
    }

    /// Playback time elapsed between `earlier` and this observation.
    ///
    /// Uses the position delta when both observations carry a position,
    /// otherwise falls back to the timestamp delta. May be negative.
    pub fn elapsed_since(&self, earlier: &Self) -> f64 {
        match (self.position, earlier.position) {
            (Some(later), Some(before)) => later - before,
            _ => self.wall_elapsed_since(earlier),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 20, 0, 0)
            .single()
            .expect("valid test timestamp")
            + TimeDelta::seconds(secs)
    }

    fn at(secs: i64, position: Option<f64>) -> Progress {
        Progress::sanitized(ts(secs), position, None, None).0
    }

    #[test]
    fn elapsed_prefers_position_delta() {
        let earlier = at(0, Some(10.0));
        let later = at(30, Some(25.0));
        assert!((later.elapsed_since(&earlier) - 15.0).abs() < f64::EPSILON);
        assert!((later.wall_elapsed_since(&earlier) - 30.0).abs() < f64::EPSILON);
    }

    #[test]
    fn elapsed_falls_back_to_timestamps() {
        let earlier = at(0, None);
        let later = at(12, Some(40.0));
        assert!((later.elapsed_since(&earlier) - 12.0).abs() < f64::EPSILON);
    }

    #[test]
    fn elapsed_can_go_backwards() {
        let earlier = at(0, Some(190.0));
        let later = at(10, Some(5.0));
        assert!(later.elapsed_since(&earlier) < 0.0);
    }

    #[test]
    fn negative_position_is_clamped() {
        let (progress, corrections) = Progress::sanitized(ts(0), Some(-4.0), None, None);
        assert_eq!(progress.position(), Some(0.0));
        assert_eq!(
            corrections,
            vec![Correction::NegativePosition { reported: -4.0 }]
        );
    }

    #[test]
    fn position_beyond_duration_is_clamped() {
        let (progress, corrections) = Progress::sanitized(ts(0), Some(250.0), None, Some(200.0));
        assert_eq!(progress.position(), Some(200.0));
        assert_eq!(progress.position_percent(), Some(100.0));
        assert_eq!(corrections.len(), 1);
    }

    #[test]
    fn percent_derives_position_when_duration_known() {
        let (progress, corrections) = Progress::sanitized(ts(0), None, Some(25.0), Some(200.0));
        assert_eq!(progress.position(), Some(50.0));
        assert!(corrections.is_empty());
    }

    #[test]
    fn inconsistent_percent_is_recomputed() {
        let (progress, corrections) =
            Progress::sanitized(ts(0), Some(100.0), Some(10.0), Some(200.0));
        assert_eq!(progress.position_percent(), Some(50.0));
        assert!(matches!(
            corrections.as_slice(),
            [Correction::InconsistentPercent { .. }]
        ));
    }

    #[test]
    fn out_of_range_percent_and_nan_are_corrected() {
        let (progress, corrections) = Progress::sanitized(ts(0), Some(f64::NAN), Some(140.0), None);
        assert_eq!(progress.position(), None);
        assert_eq!(progress.position_percent(), Some(100.0));
        assert_eq!(corrections.len(), 2);
    }

    #[test]
    fn not_before_only_moves_forward() {
        let progress = Progress::sanitized(ts(5), Some(12.0), None, None).0;
        let moved = progress.not_before(ts(10));
        assert_eq!(moved.timestamp(), ts(10));
        assert_eq!(moved.position(), Some(12.0));
        assert_eq!(progress.not_before(ts(0)), progress);
        assert_eq!(progress.without_position().position(), None);
    }
}
