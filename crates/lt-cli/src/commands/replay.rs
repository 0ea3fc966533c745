//! Replay command: prints the sessions a snapshot log completes.

use std::fmt::Write as _;
use std::io::Write;
use std::path::Path;

use anyhow::Result;
use chrono::{DateTime, Utc};

use super::util::{format_seconds, format_timestamp, truncate};
use crate::config::Config;
use crate::replay::{Completion, open_input, read_log, replay_all};

/// Formats completions for human-readable output.
pub fn format_completions(completions: &[Completion], resyncs: usize) -> String {
    let mut output = String::new();

    if completions.is_empty() {
        writeln!(output, "No completed sessions.").unwrap();
        return output;
    }

    writeln!(
        output,
        "{:<19}  {:<16}  {:<30}  {:>11}  {:<12}  Verdict",
        "Ended", "Player", "Track", "Listened", "Reason"
    )
    .unwrap();

    for completion in completions {
        let session = &completion.session;
        let player = format!("{}/{}", completion.source, session.platform);
        let listened = format!(
            "{} / {}",
            format_seconds(session.listened_seconds),
            session
                .track_duration_seconds
                .map_or_else(|| "?".to_string(), format_seconds)
        );
        let verdict = if completion.scrobble { "scrobble" } else { "skip" };

        writeln!(
            output,
            "{:<19}  {:<16}  {:<30}  {:>11}  {:<12}  {}",
            format_timestamp(session.ended_at),
            truncate(&player, 16),
            truncate(&session.play.to_string(), 30),
            listened,
            session.end_reason.as_str(),
            verdict
        )
        .unwrap();
    }

    let scrobbled = completions.iter().filter(|c| c.scrobble).count();
    writeln!(output).unwrap();
    let noun = if completions.len() == 1 {
        "session"
    } else {
        "sessions"
    };
    write!(
        output,
        "{} {noun}, {scrobbled} scrobbled",
        completions.len()
    )
    .unwrap();
    if resyncs > 0 {
        write!(output, ", {resyncs} clock resyncs").unwrap();
    }
    writeln!(output).unwrap();

    output
}

/// Runs the replay command.
pub fn run<W: Write>(
    writer: &mut W,
    config: &Config,
    input: &Path,
    json: bool,
    until: Option<DateTime<Utc>>,
) -> Result<()> {
    let lines = read_log(open_input(input)?)?;
    let (replay, completed) = replay_all(config, lines, until);
    tracing::debug!(
        completions = completed.len(),
        resyncs = replay.resyncs(),
        "replay finished"
    );

    if json {
        for completion in &completed {
            writeln!(writer, "{}", serde_json::to_string(completion)?)?;
        }
    } else {
        write!(writer, "{}", format_completions(&completed, replay.resyncs()))?;
    }
    Ok(())
}
