//! Live/archive message persistence and the idempotent admission path.

use std::collections::HashSet;

use chrono::NaiveDateTime;
use tracing::debug;

use chatterlog_common::{ChatMessage, NaturalKey, ParsedMessage, Result};

use crate::db::Database;

/// Keys per existence-check query. Each key binds two parameters, so this
/// stays well under SQLite's host-parameter ceiling.
const KEY_CHUNK: usize = 300;

/// Default row cap for the recent-messages read surface.
pub const RECENT_LIMIT: i64 = 200;

/// Hard row cap for substring search.
const SEARCH_LIMIT: i64 = 500;

/// Counters for one admission call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdmitStats {
    pub inserted: u64,
    pub mentions: u64,
}

#[derive(Clone)]
pub struct MessageStore {
    db: Database,
}

impl MessageStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Which of `candidates` already exist in the live table for `channel`.
    /// One query per [`KEY_CHUNK`] candidates regardless of feed size.
    pub async fn existing_keys(
        &self,
        channel: &str,
        candidates: &[ParsedMessage],
    ) -> Result<HashSet<NaturalKey>> {
        let mut known = HashSet::new();

        for chunk in candidates.chunks(KEY_CHUNK) {
            let placeholders = std::iter::repeat("(?, ?)")
                .take(chunk.len())
                .collect::<Vec<_>>()
                .join(", ");
            let sql = format!(
                "SELECT posted_at, author FROM messages \
                 WHERE channel = ? AND (posted_at, author) IN (VALUES {placeholders})"
            );

            let mut query = sqlx::query_as::<_, (NaiveDateTime, String)>(&sql).bind(channel);
            for candidate in chunk {
                query = query.bind(candidate.posted_at).bind(&candidate.author);
            }

            let rows = query.fetch_all(self.db.pool()).await?;
            for (posted_at, author) in rows {
                known.insert(NaturalKey {
                    posted_at,
                    author,
                    channel: channel.to_string(),
                });
            }
        }

        Ok(known)
    }

    /// Single-key existence probe for the early-stop ingestion mode.
    pub async fn contains(&self, key: &NaturalKey) -> Result<bool> {
        let found = sqlx::query_scalar::<_, i64>(
            "SELECT 1 FROM messages WHERE posted_at = ? AND author = ? AND channel = ? LIMIT 1",
        )
        .bind(key.posted_at)
        .bind(&key.author)
        .bind(&key.channel)
        .fetch_optional(self.db.pool())
        .await?;

        Ok(found.is_some())
    }

    /// Admit parsed messages into the live table and derive their mentions,
    /// as one transaction under the process-wide write guard.
    ///
    /// Each insert is guarded by a NOT EXISTS check on the natural key, so a
    /// record already present is never re-inserted and never regenerates its
    /// mentions, no matter how the caller selected the batch. `fresh` is
    /// expected in oldest-first order so surrogate ids track feed order.
    pub async fn admit(&self, channel: &str, fresh: &[ParsedMessage]) -> Result<AdmitStats> {
        if fresh.is_empty() {
            return Ok(AdmitStats::default());
        }

        let _guard = self.db.write_guard().await;
        let mut tx = self.db.pool().begin().await?;
        let mut stats = AdmitStats::default();

        for message in fresh {
            let inserted = sqlx::query(
                "INSERT INTO messages (posted_at, author, body_html, channel) \
                 SELECT ?, ?, ?, ? \
                 WHERE NOT EXISTS (\
                     SELECT 1 FROM messages \
                     WHERE posted_at = ? AND author = ? AND channel = ?\
                 )",
            )
            .bind(message.posted_at)
            .bind(&message.author)
            .bind(&message.body_html)
            .bind(channel)
            .bind(message.posted_at)
            .bind(&message.author)
            .bind(channel)
            .execute(&mut *tx)
            .await?;

            if inserted.rows_affected() == 0 {
                continue;
            }
            stats.inserted += 1;

            let message_id = sqlx::query_scalar::<_, i64>("SELECT last_insert_rowid()")
                .fetch_one(&mut *tx)
                .await?;

            // One row per (message, mentioned-name): a repeated token in the
            // body collapses to a single mention.
            let mut seen = HashSet::new();
            for mentioned in &message.mentions {
                if !seen.insert(mentioned.as_str()) {
                    continue;
                }
                sqlx::query(
                    "INSERT INTO mentions \
                     (message_id, mentioned_user, body_html, posted_at, read, hidden, channel) \
                     VALUES (?, ?, ?, ?, 0, 0, ?)",
                )
                .bind(message_id)
                .bind(mentioned)
                .bind(&message.body_html)
                .bind(message.posted_at)
                .bind(channel)
                .execute(&mut *tx)
                .await?;
                stats.mentions += 1;
            }
        }

        tx.commit().await?;
        debug!(
            channel,
            inserted = stats.inserted,
            mentions = stats.mentions,
            "Admission complete"
        );
        Ok(stats)
    }

    /// Most recent live messages for a channel, newest first.
    pub async fn recent(&self, channel: &str, limit: i64) -> Result<Vec<ChatMessage>> {
        let rows = sqlx::query_as::<_, ChatMessage>(
            "SELECT id, posted_at, author, body_html, channel FROM messages \
             WHERE channel = ? ORDER BY posted_at DESC LIMIT ?",
        )
        .bind(channel)
        .bind(limit.min(RECENT_LIMIT))
        .fetch_all(self.db.pool())
        .await?;

        Ok(rows)
    }

    /// Case-insensitive substring search over live message bodies.
    pub async fn search(&self, needle: &str, channel: Option<&str>) -> Result<Vec<ChatMessage>> {
        if needle.is_empty() {
            return Ok(Vec::new());
        }

        let pattern = format!("%{}%", escape_like(needle));
        let rows = match channel {
            Some(channel) => {
                sqlx::query_as::<_, ChatMessage>(
                    "SELECT id, posted_at, author, body_html, channel FROM messages \
                     WHERE body_html LIKE ? ESCAPE '\\' AND channel = ? \
                     ORDER BY posted_at DESC LIMIT ?",
                )
                .bind(&pattern)
                .bind(channel)
                .bind(SEARCH_LIMIT)
                .fetch_all(self.db.pool())
                .await?
            }
            None => {
                sqlx::query_as::<_, ChatMessage>(
                    "SELECT id, posted_at, author, body_html, channel FROM messages \
                     WHERE body_html LIKE ? ESCAPE '\\' \
                     ORDER BY posted_at DESC LIMIT ?",
                )
                .bind(&pattern)
                .bind(SEARCH_LIMIT)
                .fetch_all(self.db.pool())
                .await?
            }
        };

        Ok(rows)
    }

    /// Archived messages for a channel within a civil-time range, newest
    /// first. Read surface for the excluded web layer.
    pub async fn archived_range(
        &self,
        channel: &str,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> Result<Vec<ChatMessage>> {
        let rows = sqlx::query_as::<_, ChatMessage>(
            "SELECT id, posted_at, author, body_html, channel FROM messages_archive \
             WHERE channel = ? AND posted_at >= ? AND posted_at < ? \
             ORDER BY posted_at DESC",
        )
        .bind(channel)
        .bind(from)
        .bind(to)
        .fetch_all(self.db.pool())
        .await?;

        Ok(rows)
    }

    /// Live row count, for sweep logging.
    pub async fn live_count(&self) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM messages")
            .fetch_one(self.db.pool())
            .await?;
        Ok(count)
    }
}

fn escape_like(needle: &str) -> String {
    needle
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}
