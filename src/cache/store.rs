//! Durable tier backed by the `response_cache` table.

use sqlx::SqlitePool;

use super::CacheEntry;

/// SQLite-backed cache rows.
#[derive(Clone)]
pub struct DurableStore {
    pool: SqlitePool,
}

impl DurableStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, key: &str) -> sqlx::Result<Option<CacheEntry>> {
        let row: Option<(String, String, i64)> =
            sqlx::query_as("SELECT key, data, timestamp FROM response_cache WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.and_then(|(key, data, timestamp)| {
            // A row we cannot decode is as good as missing
            let data = serde_json::from_str(&data).ok()?;
            Some(CacheEntry { key, data, timestamp })
        }))
    }

    pub async fn put(&self, entry: &CacheEntry) -> sqlx::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO response_cache (key, data, timestamp)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                data = excluded.data,
                timestamp = excluded.timestamp
            "#,
        )
        .bind(&entry.key)
        .bind(entry.data.to_string())
        .bind(entry.timestamp)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete(&self, key: &str) -> sqlx::Result<()> {
        sqlx::query("DELETE FROM response_cache WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Delete rows written at or before `cutoff` (uses the timestamp index).
    pub async fn delete_older_than(&self, cutoff: i64) -> sqlx::Result<u64> {
        let result = sqlx::query("DELETE FROM response_cache WHERE timestamp <= ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn clear(&self) -> sqlx::Result<()> {
        sqlx::query("DELETE FROM response_cache")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn count(&self) -> sqlx::Result<i64> {
        let (n,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM response_cache")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }
}
