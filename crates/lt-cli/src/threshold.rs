//! Scrobble threshold applied to completed sessions.

use lt_core::SessionCompleted;
use serde::{Deserialize, Serialize};

/// Decides whether a completed session counts as a scrobble.
///
/// A session counts once it was listened to for `min_seconds` or for
/// `percent` of the track, whichever comes first. Without a known duration
/// only `min_seconds` applies.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrobbleThreshold {
    /// Default: 240.
    pub min_seconds: f64,
    /// Share of the track duration, in percent. Default: 50.
    pub percent: f64,
}

impl Default for ScrobbleThreshold {
    fn default() -> Self {
        Self {
            min_seconds: 240.0,
            percent: 50.0,
        }
    }
}

impl ScrobbleThreshold {
    /// Seconds of listening required for a track of the given duration.
    pub fn required_seconds(&self, duration: Option<f64>) -> f64 {
        match duration.filter(|d| d.is_finite() && *d > 0.0) {
            Some(duration) => self
                .min_seconds
                .min(duration * self.percent.clamp(0.0, 100.0) / 100.0),
            None => self.min_seconds,
        }
    }

    pub fn is_met(&self, completed: &SessionCompleted) -> bool {
        completed.listened_seconds >= self.required_seconds(completed.track_duration_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_track_needs_half() {
        let threshold = ScrobbleThreshold::default();
        assert!((threshold.required_seconds(Some(200.0)) - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn long_track_caps_at_min_seconds() {
        let threshold = ScrobbleThreshold::default();
        assert!((threshold.required_seconds(Some(1200.0)) - 240.0).abs() < f64::EPSILON);
    }

    #[test]
    fn unknown_duration_uses_min_seconds() {
        let threshold = ScrobbleThreshold {
            min_seconds: 30.0,
            percent: 50.0,
        };
        assert!((threshold.required_seconds(None) - 30.0).abs() < f64::EPSILON);
        assert!((threshold.required_seconds(Some(f64::NAN)) - 30.0).abs() < f64::EPSILON);
    }
}
