//! Periodic maintenance sweeps over the message tables.
//!
//! Both sweeps run on their own cadence, decoupled from ingestion, and take
//! the process-wide write guard for each transaction.

use chrono::NaiveDateTime;
use tracing::{debug, info};

use chatterlog_common::Result;

use crate::db::Database;

/// Rows moved per archive transaction. Keeps each statement's parameter
/// count bounded and each write transaction short.
pub const ARCHIVE_BATCH_SIZE: usize = 500;

/// Relocates live rows older than a retention cutoff into the archive table.
#[derive(Clone)]
pub struct ArchiveSweep {
    db: Database,
}

impl ArchiveSweep {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Move every live row with `posted_at < cutoff` to the archive, in
    /// batches of `batch_size`. Copy and delete commit atomically per batch,
    /// so a crash mid-sweep leaves every row in exactly one table and a
    /// retry is safe.
    pub async fn run(&self, cutoff: NaiveDateTime, batch_size: usize) -> Result<u64> {
        let mut moved = 0u64;

        loop {
            let _guard = self.db.write_guard().await;
            let mut tx = self.db.pool().begin().await?;

            let ids = sqlx::query_scalar::<_, i64>(
                "SELECT id FROM messages WHERE posted_at < ? ORDER BY id LIMIT ?",
            )
            .bind(cutoff)
            .bind(batch_size as i64)
            .fetch_all(&mut *tx)
            .await?;

            if ids.is_empty() {
                break;
            }

            let placeholders = std::iter::repeat("?")
                .take(ids.len())
                .collect::<Vec<_>>()
                .join(", ");

            let copy_sql = format!(
                "INSERT INTO messages_archive (id, posted_at, author, body_html, channel) \
                 SELECT id, posted_at, author, body_html, channel FROM messages \
                 WHERE id IN ({placeholders})"
            );
            let mut copy = sqlx::query(&copy_sql);
            for id in &ids {
                copy = copy.bind(id);
            }
            copy.execute(&mut *tx).await?;

            let delete_sql = format!("DELETE FROM messages WHERE id IN ({placeholders})");
            let mut delete = sqlx::query(&delete_sql);
            for id in &ids {
                delete = delete.bind(id);
            }
            delete.execute(&mut *tx).await?;

            tx.commit().await?;
            moved += ids.len() as u64;
            debug!(batch = ids.len(), "Archive batch committed");
        }

        if moved > 0 {
            info!(moved, "Archive sweep complete");
        }
        Ok(moved)
    }
}

/// Rows deleted by one dedup pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DedupStats {
    pub live_deleted: u64,
    pub archive_deleted: u64,
}

/// Removes redundant rows sharing a natural key, keeping the row with the
/// smallest surrogate id in each group. Defense in depth behind the
/// admission-time existence check.
#[derive(Clone)]
pub struct DedupSweep {
    db: Database,
}

impl DedupSweep {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// One pass over both message tables. Idempotent: a second pass with no
    /// intervening writes deletes nothing.
    pub async fn run(&self) -> Result<DedupStats> {
        let stats = DedupStats {
            live_deleted: self.dedup_table("messages").await?,
            archive_deleted: self.dedup_table("messages_archive").await?,
        };

        if stats.live_deleted > 0 || stats.archive_deleted > 0 {
            info!(
                live_deleted = stats.live_deleted,
                archive_deleted = stats.archive_deleted,
                "Dedup sweep removed duplicate rows"
            );
        }
        Ok(stats)
    }

    async fn dedup_table(&self, table: &str) -> Result<u64> {
        // Table name is one of two compile-time constants, never user input.
        let sql = format!(
            "DELETE FROM {table} WHERE id NOT IN (\
                 SELECT MIN(id) FROM {table} GROUP BY posted_at, author, channel\
             )"
        );

        let _guard = self.db.write_guard().await;
        let result = sqlx::query(&sql).execute(self.db.pool()).await?;
        Ok(result.rows_affected())
    }
}
