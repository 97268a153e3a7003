//! Flat key/value config table.

use std::collections::BTreeMap;

use crate::config::{normalize_key, QueueConfig};
use crate::error::Result;
use crate::store::JobStore;

impl JobStore {
    pub async fn config_entries(&self) -> Result<BTreeMap<String, String>> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT key, value FROM config ORDER BY key")
                .fetch_all(self.pool())
                .await?;
        Ok(rows.into_iter().collect())
    }

    pub async fn config_value(&self, key: &str) -> Result<Option<String>> {
        let value: Option<(String,)> = sqlx::query_as("SELECT value FROM config WHERE key = ?1")
            .bind(normalize_key(key))
            .fetch_optional(self.pool())
            .await?;
        Ok(value.map(|(v,)| v))
    }

    /// Validate and upsert a config value. Returns the normalized key.
    pub async fn set_config(&self, key: &str, value: &str) -> Result<String> {
        let key = normalize_key(key);
        QueueConfig::validate(&key, value)?;

        sqlx::query(
            "INSERT INTO config (key, value) VALUES (?1, ?2) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(&key)
        .bind(value.trim())
        .execute(self.pool())
        .await?;
        Ok(key)
    }

    /// Current retry settings, with defaults for missing keys.
    pub async fn queue_config(&self) -> Result<QueueConfig> {
        Ok(QueueConfig::from_entries(&self.config_entries().await?))
    }
}
