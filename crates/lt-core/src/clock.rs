//! Virtual playback clock.
//!
//! Estimates the current position of a player between sparse position
//! reports. The clock is a plain counter: something external (the registry
//! driver) calls [`VirtualClock::tick`] on a fixed cadence.

use std::time::Duration;

use serde::Serialize;

/// Default tick applied by [`VirtualClock::tick`].
pub const DEFAULT_TICK: Duration = Duration::from_millis(500);

/// Running state of a [`VirtualClock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ClockState {
    Running,
    Paused,
    Stopped,
}

/// A ticking position estimator.
#[derive(Debug, Clone)]
pub struct VirtualClock {
    position: f64,
    state: ClockState,
    tick: Duration,
}

impl Default for VirtualClock {
    fn default() -> Self {
        Self::new(DEFAULT_TICK)
    }
}

impl VirtualClock {
    /// Creates a stopped clock at position zero.
    pub const fn new(tick: Duration) -> Self {
        Self {
            position: 0.0,
            state: ClockState::Stopped,
            tick,
        }
    }

    /// Advances the position by `delta` while running.
    pub fn advance(&mut self, delta: Duration) {
        if self.state == ClockState::Running {
            self.position += delta.as_secs_f64();
        }
    }

    /// Advances the position by one fixed tick while running.
    pub fn tick(&mut self) {
        self.advance(self.tick);
    }

    /// Starts running, resynchronizing to `position` when one is given.
    pub fn play(&mut self, position: Option<f64>) {
        if let Some(position) = position {
            self.seek(position);
        }
        self.state = ClockState::Running;
    }

    pub fn pause(&mut self) {
        if self.state == ClockState::Running {
            self.state = ClockState::Paused;
        }
    }

    /// Stops advancing and resets the position to zero.
    pub fn stop(&mut self) {
        self.state = ClockState::Stopped;
        self.position = 0.0;
    }

    /// Resynchronizes the position without touching the running state.
    pub fn seek(&mut self, position: f64) {
        if position.is_finite() {
            self.position = position.max(0.0);
        }
    }

    /// Estimated position in seconds.
    pub const fn position(&self) -> f64 {
        self.position
    }

    pub const fn state(&self) -> ClockState {
        self.state
    }

    pub const fn tick_interval(&self) -> Duration {
        self.tick
    }

    /// Signed divergence of a reported position from the estimate, in seconds.
    pub fn drift_from(&self, reported: f64) -> f64 {
        reported - self.position
    }
}
