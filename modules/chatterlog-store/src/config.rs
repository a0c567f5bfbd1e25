//! Read-through key/value config with hardcoded fallbacks.
//!
//! Operators (and the excluded web layer) mutate these keys at runtime; the
//! config watcher job picks interval changes up without a restart. A missing
//! or malformed value never fails a tick — the default is substituted and a
//! warning logged.

use std::time::Duration;

use tracing::warn;

use chatterlog_common::Result;

use crate::db::Database;

/// Floor on the ingestion polling interval, protecting the upstream from a
/// runaway config value.
pub const MIN_POLLING_INTERVAL: Duration = Duration::from_secs(3);

const DEFAULT_CHANNELS: &str = "trade,giveaways";
const DEFAULT_POLLING_SECS: u64 = 5;
const DEFAULT_MAILBOX_POLLING_SECS: u64 = 30;
const DEFAULT_ANALYSIS_CHUNK_SIZE: u32 = 200;
const DEFAULT_INGEST_STRATEGY: &str = "batch";

#[derive(Clone)]
pub struct ConfigStore {
    db: Database,
}

impl ConfigStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        let value = sqlx::query_scalar::<_, String>("SELECT value FROM config WHERE key = ?")
            .bind(key)
            .fetch_optional(self.db.pool())
            .await?;
        Ok(value)
    }

    pub async fn get_or(&self, key: &str, default: &str) -> Result<String> {
        Ok(self.get(key).await?.unwrap_or_else(|| default.to_string()))
    }

    /// Upsert a config key. Goes through the same write guard as the
    /// scheduled jobs.
    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        let _guard = self.db.write_guard().await;
        sqlx::query(
            "INSERT INTO config (key, value) VALUES (?, ?) \
             ON CONFLICT (key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    /// Write defaults for keys that have never been set. Called once at
    /// startup so operators see the effective values.
    pub async fn seed_defaults(&self) -> Result<()> {
        if self.get("channels_to_track").await?.is_none() {
            self.set("channels_to_track", DEFAULT_CHANNELS).await?;
        }
        Ok(())
    }

    /// Channels the ingestion job polls, trimmed and blank-free.
    pub async fn channels_to_track(&self) -> Result<Vec<String>> {
        let raw = self.get_or("channels_to_track", DEFAULT_CHANNELS).await?;
        Ok(raw
            .split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(String::from)
            .collect())
    }

    /// Ingestion polling interval, clamped to [`MIN_POLLING_INTERVAL`].
    pub async fn polling_interval(&self) -> Result<Duration> {
        Ok(self
            .interval_secs("scheduler_polling_interval", DEFAULT_POLLING_SECS)
            .await?
            .max(MIN_POLLING_INTERVAL))
    }

    /// Mailbox polling interval.
    pub async fn mailbox_polling_interval(&self) -> Result<Duration> {
        self.interval_secs("mailbox_polling_interval", DEFAULT_MAILBOX_POLLING_SECS)
            .await
    }

    /// Chunk size for the (external) analysis batch job. Read-through only;
    /// no consumer in this core.
    pub async fn analysis_chunk_size(&self) -> Result<u32> {
        let raw = self
            .get_or("analysis_chunk_size", &DEFAULT_ANALYSIS_CHUNK_SIZE.to_string())
            .await?;
        Ok(raw.parse().unwrap_or_else(|_| {
            warn!(value = raw.as_str(), "Malformed analysis_chunk_size, using default");
            DEFAULT_ANALYSIS_CHUNK_SIZE
        }))
    }

    /// Conversion rate for a currency key, e.g. `conversion_rate_gold`.
    /// Consumed by the (external) analysis job.
    pub async fn conversion_rate(&self, currency: &str, default: f64) -> Result<f64> {
        let key = format!("conversion_rate_{currency}");
        let raw = self.get_or(&key, &default.to_string()).await?;
        Ok(raw.parse().unwrap_or_else(|_| {
            warn!(key = key.as_str(), value = raw.as_str(), "Malformed conversion rate, using default");
            default
        }))
    }

    /// Ingestion strategy name: `batch` or `early-stop`.
    pub async fn ingest_strategy(&self) -> Result<String> {
        self.get_or("ingest_strategy", DEFAULT_INGEST_STRATEGY).await
    }

    async fn interval_secs(&self, key: &str, default: u64) -> Result<Duration> {
        let raw = self.get_or(key, &default.to_string()).await?;
        let secs = raw.parse::<u64>().unwrap_or_else(|_| {
            warn!(key, value = raw.as_str(), "Malformed interval config, using default");
            default
        });
        Ok(Duration::from_secs(secs))
    }
}
