//! Listening session tracking for scrobbling sources.
//!
//! This crate turns noisy, source-specific playback observations into a
//! single judgement per player of what is being listened to and when a
//! listen has ended:
//! - Progress and clock: position observations and a ticking estimator
//! - Tracker: the per-player session state machine
//! - Policy: source-specific "still playing?" and timeout rules
//! - Registry: live trackers keyed by platform identity, plus a driver task

mod clock;
pub mod driver;
mod event;
mod play;
pub mod policy;
mod progress;
mod registry;
mod snapshot;
mod state;
mod tracker;
mod types;

pub use clock::{ClockState, DEFAULT_TICK, VirtualClock};
pub use driver::DriverConfig;
pub use event::{DriftCorrection, EndReason, ListenRange, SessionCompleted, TrackerEvent};
pub use play::{Play, Track, TrackKey};
pub use policy::{PolicyKind, Timeouts, TrackerPolicy};
pub use progress::{Correction, Progress};
pub use registry::{RegistryStats, SweepReport, TrackerRegistry};
pub use snapshot::Snapshot;
pub use state::{PlayerState, SessionState};
pub use tracker::{SessionTracker, TrackerConfig};
pub use types::{PlatformId, PlaybackEvent, PlaybackStatus, ValidationError};
