//! Command-line argument definitions.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};

/// Listening session tracker.
///
/// Replays recorded player snapshots through the tracking core and reports
/// which listens would be scrobbled.
#[derive(Debug, Parser)]
#[command(name = "lt", version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Replay a snapshot log and print completed sessions.
    Replay {
        /// JSONL snapshot log, or `-` for stdin.
        input: PathBuf,

        /// Print one JSON object per completion.
        #[arg(long)]
        json: bool,

        /// Apply timeouts up to this instant after the last snapshot (RFC 3339).
        #[arg(long)]
        until: Option<DateTime<Utc>>,
    },

    /// Replay a snapshot log and print the resulting player states.
    Status {
        /// JSONL snapshot log, or `-` for stdin.
        input: PathBuf,

        /// Output as JSON.
        #[arg(long)]
        json: bool,

        /// Evaluate states at this instant instead of the last snapshot (RFC 3339).
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },

    /// Show the tracking policy selected for each configured source.
    Policies,
}
