//! Status command: prints player states after replaying a snapshot log.

use std::fmt::Write as _;
use std::io::Write;
use std::path::Path;

use anyhow::Result;
use chrono::{DateTime, Utc};

use super::util::{format_seconds, format_timestamp, truncate};
use crate::config::Config;
use crate::replay::{SourceState, open_input, read_log, replay_all};

/// Formats player states for human-readable output.
pub fn format_states(states: &[SourceState], now: DateTime<Utc>) -> String {
    let mut output = String::new();

    writeln!(output, "Players at {}", format_timestamp(now)).unwrap();
    writeln!(output).unwrap();

    if states.is_empty() {
        writeln!(output, "No players seen.").unwrap();
        return output;
    }

    writeln!(
        output,
        "{:<16}  {:<12}  {:<10}  {:<8}  {:<30}  {:>8}  {:>8}",
        "Player", "Policy", "Session", "Status", "Track", "Listened", "Position"
    )
    .unwrap();

    for entry in states {
        let state = &entry.state;
        let player = format!("{}/{}", entry.source, state.platform);
        let track = state
            .play
            .as_ref()
            .map_or_else(|| "-".to_string(), ToString::to_string);
        let position = state
            .position
            .map_or_else(|| "-".to_string(), format_seconds);

        writeln!(
            output,
            "{:<16}  {:<12}  {:<10}  {:<8}  {:<30}  {:>8}  {:>8}",
            truncate(&player, 16),
            state.policy.as_str(),
            state.session_state.as_str(),
            state.calculated_status.as_str(),
            truncate(&track, 30),
            format_seconds(state.listened_seconds),
            position
        )
        .unwrap();
    }

    output
}

/// Runs the status command.
pub fn run<W: Write>(
    writer: &mut W,
    config: &Config,
    input: &Path,
    json: bool,
    at: Option<DateTime<Utc>>,
) -> Result<()> {
    let lines = read_log(open_input(input)?)?;
    let (replay, _completed) = replay_all(config, lines, at);
    let now = at.or_else(|| replay.last_timestamp()).unwrap_or_else(Utc::now);
    let states = replay.states(now);

    if json {
        writeln!(writer, "{}", serde_json::to_string_pretty(&states)?)?;
    } else {
        write!(writer, "{}", format_states(&states, now))?;
    }
    Ok(())
}
