//! Offline replay of recorded snapshot logs.
//!
//! A log is JSONL: one snapshot per line, each tagged with the name of the
//! source that produced it. Every source gets its own registry built with
//! the policy configured for it. Time only moves when a snapshot says so:
//! before each snapshot the source's clocks are advanced by the gap since
//! its previous snapshot and its registry is swept at the snapshot time.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use lt_core::{PlayerState, SessionCompleted, Snapshot, TrackerEvent, TrackerRegistry};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedReceiver;

use crate::config::Config;

/// Source name used for lines without a `source` field.
pub const DEFAULT_SOURCE: &str = "default";

/// One line of a snapshot log.
#[derive(Debug, Clone, Deserialize)]
pub struct LogLine {
    #[serde(default)]
    pub source: Option<String>,
    #[serde(flatten)]
    pub snapshot: Snapshot,
}

impl LogLine {
    pub fn source(&self) -> &str {
        self.source.as_deref().unwrap_or(DEFAULT_SOURCE)
    }
}

/// A completed session with the scrobble verdict applied.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Completion {
    pub source: String,
    #[serde(flatten)]
    pub session: SessionCompleted,
    pub scrobble: bool,
}

/// A player state tagged with its source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceState {
    pub source: String,
    #[serde(flatten)]
    pub state: PlayerState,
}

/// Opens a log file, or stdin for `-`.
pub fn open_input(path: &Path) -> Result<Box<dyn BufRead>> {
    if path == Path::new("-") {
        return Ok(Box::new(io::stdin().lock()));
    }
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    Ok(Box::new(BufReader::new(file)))
}

/// Parses a snapshot log, skipping blank lines.
pub fn read_log(reader: impl BufRead) -> Result<Vec<LogLine>> {
    let mut lines = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let number = index + 1;
        let line = line.with_context(|| format!("failed to read line {number}"))?;
        if line.trim().is_empty() {
            continue;
        }
        let parsed: LogLine = serde_json::from_str(&line)
            .with_context(|| format!("invalid snapshot on line {number}"))?;
        lines.push(parsed);
    }
    Ok(lines)
}

struct SourceReplay {
    registry: TrackerRegistry,
    events: UnboundedReceiver<TrackerEvent>,
    last_timestamp: Option<DateTime<Utc>>,
}

/// Drives one registry per source through a snapshot log.
pub struct Replay<'a> {
    config: &'a Config,
    sources: BTreeMap<String, SourceReplay>,
    last_timestamp: Option<DateTime<Utc>>,
    resyncs: usize,
}

impl<'a> Replay<'a> {
    pub const fn new(config: &'a Config) -> Self {
        Self {
            config,
            sources: BTreeMap::new(),
            last_timestamp: None,
            resyncs: 0,
        }
    }

    /// Latest snapshot timestamp seen so far.
    pub const fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.last_timestamp
    }

    /// Clock resynchronizations observed so far.
    pub const fn resyncs(&self) -> usize {
        self.resyncs
    }

    /// Applies one log line and returns the sessions it completed, including
    /// those that timed out before it.
    pub fn feed(&mut self, line: LogLine) -> Vec<Completion> {
        let source = line.source().to_string();
        let timestamp = line.snapshot.timestamp;
        let config = self.config;

        let replay = self.sources.entry(source.clone()).or_insert_with(|| {
            let policy = config.policy_for(&source);
            tracing::debug!(source = %source, policy = %policy.kind, "replaying source");
            let (registry, events) = TrackerRegistry::new(policy, config.tracker.clone());
            SourceReplay {
                registry,
                events,
                last_timestamp: None,
            }
        });

        if let Some(gap) = replay
            .last_timestamp
            .and_then(|last| (timestamp - last).to_std().ok())
        {
            replay.registry.advance_clocks(gap);
        }
        replay.registry.sweep(timestamp);
        replay.registry.ingest(line.snapshot);
        replay.last_timestamp = replay.last_timestamp.max(Some(timestamp));
        self.last_timestamp = self.last_timestamp.max(Some(timestamp));

        let events = drain(&mut replay.events);
        self.collect(&source, events)
    }

    /// Sweeps every source at `now`, returning sessions that timed out.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> Vec<Completion> {
        let mut completed = Vec::new();
        let mut drained = Vec::new();
        for (source, replay) in &mut self.sources {
            replay.registry.sweep(now);
            drained.push((source.clone(), drain(&mut replay.events)));
        }
        for (source, events) in drained {
            completed.extend(self.collect(&source, events));
        }
        completed
    }

    /// Player states of every source as of `now`, sorted by source then
    /// platform.
    pub fn states(&self, now: DateTime<Utc>) -> Vec<SourceState> {
        self.sources
            .iter()
            .flat_map(|(source, replay)| {
                replay
                    .registry
                    .states(now)
                    .into_iter()
                    .map(|state| SourceState {
                        source: source.clone(),
                        state,
                    })
            })
            .collect()
    }

    fn collect(&mut self, source: &str, events: Vec<TrackerEvent>) -> Vec<Completion> {
        let mut completed = Vec::new();
        for event in events {
            match event {
                TrackerEvent::SessionCompleted(session) => {
                    let scrobble = self.config.threshold.is_met(&session);
                    completed.push(Completion {
                        source: source.to_string(),
                        session,
                        scrobble,
                    });
                }
                TrackerEvent::ClockResynced(correction) => {
                    self.resyncs += 1;
                    tracing::debug!(
                        source,
                        platform = %correction.platform,
                        drift = correction.drift(),
                        "clock resynced"
                    );
                }
            }
        }
        completed
    }
}

fn drain(events: &mut UnboundedReceiver<TrackerEvent>) -> Vec<TrackerEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}

/// Replays a whole log, then sweeps at `until` when given.
pub fn replay_all<'a>(
    config: &'a Config,
    lines: Vec<LogLine>,
    until: Option<DateTime<Utc>>,
) -> (Replay<'a>, Vec<Completion>) {
    let mut replay = Replay::new(config);
    let mut completed = Vec::new();
    for line in lines {
        completed.extend(replay.feed(line));
    }
    if let Some(until) = until {
        completed.extend(replay.sweep(until));
    }
    (replay, completed)
}
