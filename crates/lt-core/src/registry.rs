//! Registry of live trackers keyed by platform identity.
//!
//! The registry owns one [`SessionTracker`] per [`PlatformId`], created on
//! the first snapshot for that identity and destroyed once it is dead and
//! holds no session. Completion events leave through an unbounded channel so
//! consumers never run inside a tracker's critical section.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::event::{EndReason, TrackerEvent};
use crate::policy::TrackerPolicy;
use crate::snapshot::Snapshot;
use crate::state::PlayerState;
use crate::tracker::{SessionTracker, TrackerConfig};
use crate::types::PlatformId;

/// A tracker plus its retirement flag. Retired slots are no longer in the
/// map and must not be touched again.
#[derive(Debug)]
struct Slot {
    tracker: SessionTracker,
    retired: bool,
}

type SharedSlot = Arc<Mutex<Slot>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Outcome of a [`TrackerRegistry::sweep`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    /// Sessions finalized by a timeout during this sweep.
    pub finalized: usize,
    /// Trackers destroyed during this sweep.
    pub destroyed: Vec<PlatformId>,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.finalized == 0 && self.destroyed.is_empty()
    }
}

/// Counters describing the registry since it was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryStats {
    pub live: usize,
    pub created: u64,
    pub destroyed: u64,
    pub completions: u64,
    pub invariant_violations: u64,
}

/// Owns the live trackers of one source.
#[derive(Debug)]
pub struct TrackerRegistry {
    policy: TrackerPolicy,
    config: TrackerConfig,
    trackers: Mutex<HashMap<PlatformId, SharedSlot>>,
    events: mpsc::UnboundedSender<TrackerEvent>,
    created: AtomicU64,
    destroyed: AtomicU64,
    completions: AtomicU64,
    invariant_violations: AtomicU64,
}

impl TrackerRegistry {
    /// Creates an empty registry and the receiving end of its event stream.
    pub fn new(
        policy: TrackerPolicy,
        config: TrackerConfig,
    ) -> (Self, mpsc::UnboundedReceiver<TrackerEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let registry = Self {
            policy,
            config,
            trackers: Mutex::new(HashMap::new()),
            events,
            created: AtomicU64::new(0),
            destroyed: AtomicU64::new(0),
            completions: AtomicU64::new(0),
            invariant_violations: AtomicU64::new(0),
        };
        (registry, receiver)
    }

    pub const fn policy(&self) -> &TrackerPolicy {
        &self.policy
    }

    pub const fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Routes a snapshot to its tracker, creating the tracker if needed.
    pub fn ingest(&self, snapshot: Snapshot) {
        loop {
            let slot = self.slot_for(&snapshot.platform, snapshot.timestamp);
            let mut guard = lock(&slot);
            if guard.retired {
                debug!(
                    platform = %snapshot.platform,
                    "tracker destroyed while routing snapshot, retrying"
                );
                continue;
            }

            let before = guard.tracker.invariant_violations();
            let events = guard.tracker.apply(snapshot);
            let violations = guard.tracker.invariant_violations() - before;
            if violations > 0 {
                self.invariant_violations
                    .fetch_add(violations, Ordering::Relaxed);
            }
            self.publish(events);
            return;
        }
    }

    /// Advances every live clock by one tick.
    pub fn tick_clocks(&self) {
        for slot in self.slots() {
            let mut guard = lock(&slot);
            if !guard.retired {
                guard.tracker.tick_clock();
            }
        }
    }

    /// Advances every live clock by `delta`.
    pub fn advance_clocks(&self, delta: Duration) {
        for slot in self.slots() {
            let mut guard = lock(&slot);
            if !guard.retired {
                guard.tracker.advance_clock(delta);
            }
        }
    }

    /// Applies timeouts as of `now`, then destroys dead trackers that no
    /// longer hold a session.
    pub fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();

        for slot in self.slots() {
            let mut guard = lock(&slot);
            if guard.retired {
                continue;
            }
            let events = guard.tracker.check_timeouts(now);
            report.finalized += events
                .iter()
                .filter(|e| e.as_completed().is_some())
                .count();
            self.publish(events);
        }

        let mut trackers = lock(&self.trackers);
        trackers.retain(|platform, slot| {
            let mut guard = lock(slot);
            let dead = !guard.tracker.has_session() && guard.tracker.is_dead(now);
            if dead {
                guard.retired = true;
                debug!(platform = %platform, "tracker destroyed");
                report.destroyed.push(platform.clone());
            }
            !dead
        });
        drop(trackers);

        self.destroyed
            .fetch_add(report.destroyed.len() as u64, Ordering::Relaxed);
        report.destroyed.sort();
        report
    }

    /// The player disappeared from its source: finalizes its session with
    /// [`EndReason::Removed`] and destroys its tracker.
    ///
    /// Returns `false` when no tracker exists for `platform`.
    pub fn remove(&self, platform: &PlatformId, now: DateTime<Utc>) -> bool {
        let Some(slot) = lock(&self.trackers).remove(platform) else {
            return false;
        };

        let mut guard = lock(&slot);
        guard.retired = true;
        let event = guard.tracker.finalize(EndReason::Removed, now);
        self.publish(event.into_iter().collect());
        drop(guard);

        self.destroyed.fetch_add(1, Ordering::Relaxed);
        info!(platform = %platform, "player removed");
        true
    }

    /// Status of every live tracker, sorted by platform.
    pub fn states(&self, now: DateTime<Utc>) -> Vec<PlayerState> {
        let mut states: Vec<PlayerState> = self
            .slots()
            .iter()
            .filter_map(|slot| {
                let guard = lock(slot);
                if guard.retired {
                    None
                } else {
                    Some(guard.tracker.api_state(now))
                }
            })
            .collect();
        states.sort_by(|a, b| a.platform.cmp(&b.platform));
        states
    }

    pub fn state(&self, platform: &PlatformId, now: DateTime<Utc>) -> Option<PlayerState> {
        let slot = lock(&self.trackers).get(platform).cloned()?;
        let guard = lock(&slot);
        if guard.retired {
            None
        } else {
            Some(guard.tracker.api_state(now))
        }
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            live: lock(&self.trackers).len(),
            created: self.created.load(Ordering::Relaxed),
            destroyed: self.destroyed.load(Ordering::Relaxed),
            completions: self.completions.load(Ordering::Relaxed),
            invariant_violations: self.invariant_violations.load(Ordering::Relaxed),
        }
    }

    fn slot_for(&self, platform: &PlatformId, first_seen: DateTime<Utc>) -> SharedSlot {
        let mut trackers = lock(&self.trackers);
        let slot = trackers.entry(platform.clone()).or_insert_with(|| {
            self.created.fetch_add(1, Ordering::Relaxed);
            debug!(platform = %platform, policy = %self.policy.kind, "tracker created");
            Arc::new(Mutex::new(Slot {
                tracker: SessionTracker::new(
                    platform.clone(),
                    self.policy.clone(),
                    self.config.clone(),
                    first_seen,
                ),
                retired: false,
            }))
        });
        Arc::clone(slot)
    }

    fn slots(&self) -> Vec<SharedSlot> {
        lock(&self.trackers).values().cloned().collect()
    }

    /// Sends events in order.
    ///
    /// Callers hold the emitting tracker's lock and never the map lock, so
    /// per-identity order matches snapshot order while other identities keep
    /// flowing. The channel is unbounded: sending never waits on a consumer,
    /// and consumers handle events on their own task.
    fn publish(&self, events: Vec<TrackerEvent>) {
        for event in events {
            if event.as_completed().is_some() {
                self.completions.fetch_add(1, Ordering::Relaxed);
            }
            if self.events.send(event).is_err() {
                debug!("event receiver dropped, discarding tracker event");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::play::Play;
    use crate::types::PlaybackStatus;
    use chrono::{TimeDelta, TimeZone};
    use std::thread;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 20, 0, 0)
            .single()
            .expect("valid test timestamp")
            + TimeDelta::seconds(secs)
    }

    fn id(name: &str) -> PlatformId {
        PlatformId::new(name).unwrap()
    }

    fn registry() -> (TrackerRegistry, mpsc::UnboundedReceiver<TrackerEvent>) {
        TrackerRegistry::new(TrackerPolicy::positional(), TrackerConfig::default())
    }

    fn playing(platform: &str, secs: i64, title: &str, position: f64) -> Snapshot {
        Snapshot::new(id(platform), ts(secs))
            .with_status(PlaybackStatus::Playing)
            .with_play(Play::new(title, Some(300.0)))
            .with_position(position)
    }

    fn drain(events: &mut mpsc::UnboundedReceiver<TrackerEvent>) -> Vec<TrackerEvent> {
        let mut drained = Vec::new();
        while let Ok(event) = events.try_recv() {
            drained.push(event);
        }
        drained
    }

    fn completed_reasons(events: &[TrackerEvent]) -> Vec<EndReason> {
        events
            .iter()
            .filter_map(TrackerEvent::as_completed)
            .map(|c| c.end_reason)
            .collect()
    }

    #[test]
    fn creates_one_tracker_per_identity() {
        let (registry, _events) = registry();

        registry.ingest(playing("kitchen", 0, "Windowlicker", 0.0));
        registry.ingest(playing("office", 0, "Xtal", 0.0));
        registry.ingest(playing("kitchen", 10, "Windowlicker", 10.0));

        let stats = registry.stats();
        assert_eq!(stats.live, 2);
        assert_eq!(stats.created, 2);

        let states = registry.states(ts(10));
        let platforms: Vec<_> = states.iter().map(|s| s.platform.as_str()).collect();
        assert_eq!(platforms, vec!["kitchen", "office"]);
        assert!((states[0].listened_seconds - 10.0).abs() < 1e-6);
    }

    #[test]
    fn completions_flow_through_channel_in_order() {
        let (registry, mut events) = registry();

        registry.ingest(playing("kitchen", 0, "Windowlicker", 0.0));
        registry.ingest(playing("kitchen", 10, "Windowlicker", 10.0));
        registry.ingest(playing("kitchen", 20, "Xtal", 0.0));
        registry.ingest(playing("kitchen", 30, "Xtal", 10.0));
        registry.ingest(playing("kitchen", 40, "Xtal", 1.0));

        let received = drain(&mut events);
        assert_eq!(
            completed_reasons(&received),
            vec![EndReason::TrackChanged, EndReason::Repeat]
        );
        assert_eq!(registry.stats().completions, 2);
    }

    #[test]
    fn sweep_finalizes_then_destroys() {
        let (registry, mut events) = registry();
        registry.ingest(playing("kitchen", 0, "Windowlicker", 0.0));

        let report = registry.sweep(ts(150));
        assert!(report.is_empty());
        assert_eq!(registry.stats().live, 1);

        let report = registry.sweep(ts(200));
        assert_eq!(report.finalized, 1);
        assert_eq!(report.destroyed, vec![id("kitchen")]);
        assert_eq!(completed_reasons(&drain(&mut events)), vec![EndReason::Orphaned]);

        let stats = registry.stats();
        assert_eq!(stats.live, 0);
        assert_eq!(stats.destroyed, 1);
        assert!(registry.state(&id("kitchen"), ts(200)).is_none());
    }

    #[test]
    fn snapshot_after_destroy_recreates_tracker() {
        let (registry, _events) = registry();
        registry.ingest(playing("kitchen", 0, "Windowlicker", 0.0));
        registry.sweep(ts(300));

        registry.ingest(playing("kitchen", 310, "Windowlicker", 0.0));

        let stats = registry.stats();
        assert_eq!(stats.live, 1);
        assert_eq!(stats.created, 2);
        let state = registry.state(&id("kitchen"), ts(310)).unwrap();
        assert_eq!(state.session_started_at, Some(ts(310)));
    }

    #[test]
    fn idle_tracker_without_session_is_destroyed() {
        let (registry, mut events) = registry();
        registry.ingest(Snapshot::new(id("kitchen"), ts(0)).with_status(PlaybackStatus::Stopped));

        assert!(registry.sweep(ts(100)).destroyed.is_empty());
        assert_eq!(registry.sweep(ts(200)).destroyed, vec![id("kitchen")]);
        assert!(drain(&mut events).is_empty());
    }

    #[test]
    fn remove_finalizes_before_destroying() {
        let (registry, mut events) = registry();
        registry.ingest(playing("kitchen", 0, "Windowlicker", 0.0));
        registry.ingest(playing("kitchen", 10, "Windowlicker", 10.0));

        assert!(registry.remove(&id("kitchen"), ts(12)));
        assert!(!registry.remove(&id("kitchen"), ts(13)));

        let received = drain(&mut events);
        let completed: Vec<_> = received
            .iter()
            .filter_map(TrackerEvent::as_completed)
            .collect();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].end_reason, EndReason::Removed);
        assert_eq!(completed[0].ended_at, ts(12));
        assert_eq!(registry.stats().live, 0);
        assert_eq!(registry.stats().destroyed, 1);
    }

    #[test]
    fn out_of_order_snapshots_are_counted() {
        let (registry, _events) = registry();
        registry.ingest(playing("kitchen", 10, "Windowlicker", 10.0));
        registry.ingest(playing("kitchen", 5, "Windowlicker", 5.0));

        assert_eq!(registry.stats().invariant_violations, 1);
    }

    #[test]
    fn clock_ticks_reach_every_tracker() {
        let (registry, _events) = registry();
        registry.ingest(playing("kitchen", 0, "Windowlicker", 0.0));
        registry.ingest(playing("office", 0, "Xtal", 30.0));

        for _ in 0..4 {
            registry.tick_clocks();
        }
        registry.advance_clocks(Duration::from_secs(3));

        let positions: Vec<_> = registry
            .states(ts(5))
            .iter()
            .map(|s| s.position.unwrap())
            .collect();
        assert_eq!(positions, vec![5.0, 35.0]);
    }

    #[test]
    fn dropped_receiver_does_not_break_ingestion() {
        let (registry, events) = registry();
        drop(events);

        registry.ingest(playing("kitchen", 0, "Windowlicker", 0.0));
        registry.ingest(playing("kitchen", 10, "Xtal", 0.0));

        assert_eq!(registry.stats().completions, 1);
    }

    #[test]
    fn concurrent_ingestion_keeps_one_tracker_per_identity() {
        let (registry, mut events) = registry();
        let registry = Arc::new(registry);

        let workers: Vec<_> = (0..8)
            .map(|worker| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    let platform = format!("zone-{worker}");
                    for step in 0..50 {
                        let secs = step * 10;
                        #[expect(clippy::cast_precision_loss, reason = "small test values")]
                        let position = secs as f64;
                        registry.ingest(playing(&platform, secs, "Windowlicker", position));
                        registry.tick_clocks();
                    }
                })
            })
            .collect();
        let sweeper = {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                for _ in 0..50 {
                    registry.sweep(ts(0));
                }
            })
        };
        for worker in workers {
            worker.join().unwrap();
        }
        sweeper.join().unwrap();

        let stats = registry.stats();
        assert_eq!(stats.live, 8);
        assert_eq!(stats.created, 8);
        assert_eq!(stats.invariant_violations, 0);
        assert!(completed_reasons(&drain(&mut events)).is_empty());
    }

    #[test]
    fn remove_races_with_ingestion() {
        let (registry, mut events) = registry();
        let registry = Arc::new(registry);

        let feeder = {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                for step in 0..200 {
                    let secs = step * 10;
                    #[expect(clippy::cast_precision_loss, reason = "small test values")]
                    let position = secs as f64;
                    registry.ingest(playing("kitchen", secs, "Windowlicker", position));
                }
            })
        };
        let mut removed = 0;
        for step in 0..50 {
            if registry.remove(&id("kitchen"), ts(step * 40)) {
                removed += 1;
            }
            thread::yield_now();
        }
        feeder.join().unwrap();

        let reasons = completed_reasons(&drain(&mut events));
        assert!(reasons.iter().all(|r| *r == EndReason::Removed), "{reasons:?}");
        assert!(reasons.len() <= removed);
        let stats = registry.stats();
        assert_eq!(stats.destroyed, u64::try_from(removed).unwrap());
        assert!(stats.live <= 1);
    }
}
