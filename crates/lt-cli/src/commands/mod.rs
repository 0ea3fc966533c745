//! CLI subcommand implementations.

pub mod policies;
pub mod replay;
pub mod status;
mod util;
