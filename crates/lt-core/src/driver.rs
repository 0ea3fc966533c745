//! Background task that keeps a registry's clocks and timeouts moving.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::registry::TrackerRegistry;

/// Cadence of the driver's two periodic jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverConfig {
    /// Virtual clock tick. Default: 500 ms.
    pub clock_tick: Duration,
    /// Interval between registry sweeps. Default: 5 s.
    pub sweep_interval: Duration,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            clock_tick: Duration::from_millis(500),
            sweep_interval: Duration::from_secs(5),
        }
    }
}

/// Spawns the driver for `registry` on the current runtime.
///
/// The task ticks every clock on `clock_tick` and sweeps the registry on
/// `sweep_interval` until `cancel` fires.
pub fn spawn(
    registry: Arc<TrackerRegistry>,
    config: DriverConfig,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let origin = Instant::now();
        let started_at = Utc::now();
        let now = || wall_clock(started_at, origin.elapsed());

        let mut clock = tokio::time::interval(non_zero(config.clock_tick));
        clock.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut sweep = tokio::time::interval(non_zero(config.sweep_interval));
        sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);

        debug!(
            clock_tick_ms = config.clock_tick.as_millis(),
            sweep_interval_ms = config.sweep_interval.as_millis(),
            "tracker driver started"
        );

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("tracker driver shutting down");
                    break;
                }
                _ = clock.tick() => registry.tick_clocks(),
                _ = sweep.tick() => {
                    let report = registry.sweep(now());
                    if !report.is_empty() {
                        debug!(
                            finalized = report.finalized,
                            destroyed = report.destroyed.len(),
                            "registry swept"
                        );
                    }
                }
            }
        }
    })
}

/// `tokio::time::interval` panics on a zero period.
fn non_zero(period: Duration) -> Duration {
    period.max(Duration::from_millis(1))
}

/// Wall-clock time derived from the runtime clock, so paused test time
/// drives sweeps deterministically.
fn wall_clock(started_at: DateTime<Utc>, elapsed: Duration) -> DateTime<Utc> {
    started_at + TimeDelta::from_std(elapsed).unwrap_or(TimeDelta::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EndReason;
    use crate::play::Play;
    use crate::policy::TrackerPolicy;
    use crate::snapshot::Snapshot;
    use crate::tracker::TrackerConfig;
    use crate::types::{PlatformId, PlaybackStatus};

    fn platform() -> PlatformId {
        PlatformId::new("living-room").unwrap()
    }

    fn registry() -> (
        Arc<TrackerRegistry>,
        tokio::sync::mpsc::UnboundedReceiver<crate::TrackerEvent>,
    ) {
        let (registry, events) =
            TrackerRegistry::new(TrackerPolicy::positional(), TrackerConfig::default());
        (Arc::new(registry), events)
    }

    fn playing_now() -> Snapshot {
        Snapshot::new(platform(), Utc::now())
            .with_status(PlaybackStatus::Playing)
            .with_play(Play::new("Selected Ambient Works", Some(600.0)))
            .with_position(0.0)
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_clocks_while_running() {
        let (registry, _events) = registry();
        registry.ingest(playing_now());

        let cancel = CancellationToken::new();
        let handle = spawn(Arc::clone(&registry), DriverConfig::default(), cancel.clone());
        tokio::time::sleep(Duration::from_secs(5)).await;

        let state = registry.state(&platform(), Utc::now()).unwrap();
        let position = state.position.unwrap();
        assert!(
            (4.5..=6.0).contains(&position),
            "clock should follow ticks, got {position}"
        );

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn sweeps_orphaned_sessions() {
        let (registry, mut events) = registry();
        registry.ingest(playing_now());

        let cancel = CancellationToken::new();
        let handle = spawn(Arc::clone(&registry), DriverConfig::default(), cancel.clone());

        let event = tokio::time::timeout(Duration::from_secs(300), events.recv())
            .await
            .expect("orphan completion before timeout")
            .expect("event channel open");
        let completed = event.as_completed().expect("session completion");
        assert_eq!(completed.end_reason, EndReason::Orphaned);
        assert_eq!(registry.stats().live, 0);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn stops_on_cancellation() {
        let (registry, _events) = registry();
        let cancel = CancellationToken::new();
        let handle = spawn(registry, DriverConfig::default(), cancel.clone());

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("driver exits promptly")
            .unwrap();
    }

    #[test]
    fn zero_periods_are_raised() {
        assert_eq!(non_zero(Duration::ZERO), Duration::from_millis(1));
        assert_eq!(non_zero(Duration::from_secs(5)), Duration::from_secs(5));
    }
}
