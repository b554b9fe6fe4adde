//! Response cache maintenance commands.

use std::sync::Arc;
use tokio::runtime::Runtime;

use super::open_db;
use crate::cache::{DurableStore, ResponseCache, SystemClock};
use crate::config::Config;

async fn open_cache(config: &Config) -> anyhow::Result<(ResponseCache, DurableStore)> {
    let pool = open_db(config).await?;
    let store = DurableStore::new(pool);
    let cache = ResponseCache::new(
        Some(store.clone()),
        config.cache.memory_capacity,
        config.cache.ttl(),
        Arc::new(SystemClock),
    );
    Ok((cache, store))
}

/// Remove every cached response
pub fn cmd_cache_clear(rt: &Runtime, config: &Config) -> anyhow::Result<()> {
    rt.block_on(async {
        let (cache, store) = open_cache(config).await?;
        let before = store.count().await?;
        cache.clear().await;
        println!("Cleared {} cached responses.", before);
        Ok(())
    })
}

/// Remove expired responses
pub fn cmd_cache_sweep(rt: &Runtime, config: &Config) -> anyhow::Result<()> {
    rt.block_on(async {
        let (cache, store) = open_cache(config).await?;
        let removed = cache.clear_expired().await;
        let remaining = store.count().await?;
        println!(
            "Removed {} expired responses, {} remaining.",
            removed, remaining
        );
        Ok(())
    })
}
