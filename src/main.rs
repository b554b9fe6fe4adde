//! Moonsway - a streaming music player core.
//!
//! Resolves catalog metadata and playable streams across a pool of
//! interchangeable backend instances, memoizes responses in a two-tier
//! cache and drives a single audio output from a play queue. The CLI
//! exposes lookups, cache maintenance and headless playback.

pub mod api;
pub mod cache;
pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod failover;
pub mod model;
pub mod player;
#[cfg(test)]
pub mod test_utils;

use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const LOG_DIRECTIVES: [&str; 7] = [
    "moonsway=info",
    "api=info",
    "cache=info",
    "cli=info",
    "failover=info",
    "media_controls=info",
    "player=info",
];

fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    // Initialize logging; subsystems log under their own targets
    let mut filter = EnvFilter::from_default_env();
    for directive in LOG_DIRECTIVES {
        filter = filter.add_directive(directive.parse()?);
    }
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(filter)
        .init();

    cli::run_command(&args)
}
