//! Command-line interface for moonsway.
//!
//! Catalog lookups, cache maintenance and headless playback.

mod commands;

pub use commands::{Cli, Commands, run_command};
