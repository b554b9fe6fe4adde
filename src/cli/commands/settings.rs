//! Configuration inspection.

use tokio::runtime::Runtime;

use crate::config::{self, Config};
use crate::db;

/// Print the config file path and effective settings
pub fn cmd_config(rt: &Runtime, config: &Config, init: bool) -> anyhow::Result<()> {
    let path = config::config_path();
    match &path {
        Some(path) if path.exists() => println!("# Config file: {}", path.display()),
        Some(path) => println!("# Config file: {} (not found, using defaults)", path.display()),
        None => println!("# Config file: unavailable (no config directory)"),
    }
    println!(
        "# Database: {}",
        config
            .storage
            .db_path
            .clone()
            .unwrap_or_else(db::default_db_path)
            .display()
    );
    println!();
    print!("{}", toml::to_string_pretty(config)?);

    if init {
        if path.as_ref().is_some_and(|p| p.exists()) {
            println!("\nConfig file already exists; leaving it untouched.");
        } else {
            rt.block_on(config::save_async(config.clone()))?;
            println!("\nWrote default config.");
        }
    }
    Ok(())
}
