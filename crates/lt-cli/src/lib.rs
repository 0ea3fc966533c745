//! Listening tracker CLI library.
//!
//! This crate provides the CLI interface for the listening tracker: config
//! loading, snapshot log replay, and the scrobble threshold.

mod cli;
pub mod commands;
mod config;
pub mod replay;
mod threshold;

pub use cli::{Cli, Commands};
pub use config::{Config, SourceConfig};
pub use threshold::ScrobbleThreshold;
