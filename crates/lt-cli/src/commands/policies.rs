//! Policies command: shows which tracking policy each source gets.

use std::fmt::Write as _;
use std::io::Write;
use std::time::Duration;

use anyhow::Result;
use lt_core::TrackerPolicy;
use lt_core::policy::TimeoutRule;

use crate::config::Config;

fn format_secs(duration: Duration) -> String {
    format!("{}s", duration.as_secs_f64())
}

fn policy_row(output: &mut String, source: &str, policy: &TrackerPolicy, config: &Config) {
    let (stale, orphaned) = match policy.timeouts {
        TimeoutRule::TrackDuration { epsilon } => (
            "track".to_string(),
            format!("track/2+{}", format_secs(epsilon)),
        ),
        TimeoutRule::Fixed | TimeoutRule::GracefulEnd => {
            let timeouts = policy.timeouts(&config.tracker, None);
            (format_secs(timeouts.stale), format_secs(timeouts.orphaned))
        }
    };

    writeln!(
        output,
        "{:<12}  {:<12}  {:>6}  {:>6}  {:>12}",
        source,
        policy.kind.as_str(),
        format_secs(policy.allowed_drift),
        stale,
        orphaned
    )
    .unwrap();
}

/// Formats the effective policy table.
pub fn format_policies(config: &Config) -> String {
    let mut output = String::new();

    writeln!(
        output,
        "{:<12}  {:<12}  {:>6}  {:>6}  {:>12}",
        "Source", "Kind", "Drift", "Stale", "Orphaned"
    )
    .unwrap();

    policy_row(
        &mut output,
        "(default)",
        &TrackerPolicy::for_kind(config.default_kind),
        config,
    );
    for source in config.sources.keys() {
        policy_row(&mut output, source, &config.policy_for(source), config);
    }

    writeln!(output).unwrap();
    writeln!(
        output,
        "Scrobble after {}s or {}% of the track, whichever comes first.",
        config.threshold.min_seconds, config.threshold.percent
    )
    .unwrap();

    output
}

/// Runs the policies command.
pub fn run<W: Write>(writer: &mut W, config: &Config) -> Result<()> {
    write!(writer, "{}", format_policies(config))?;
    Ok(())
}
