//! Read/mutation surface for derived mention records.

use chrono::NaiveDateTime;

use chatterlog_common::{ChatterlogError, Mention, Result};

use crate::db::Database;

#[derive(Clone)]
pub struct MentionStore {
    db: Database,
}

impl MentionStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Visible mentions of `username` (case-insensitive), newest first,
    /// optionally restricted to rows after `since` (civil time).
    pub async fn for_user(
        &self,
        username: &str,
        since: Option<NaiveDateTime>,
    ) -> Result<Vec<Mention>> {
        let rows = match since {
            Some(since) => {
                sqlx::query_as::<_, Mention>(
                    "SELECT id, message_id, mentioned_user, body_html, posted_at, \
                            read, hidden, channel \
                     FROM mentions \
                     WHERE mentioned_user = ? COLLATE NOCASE AND hidden = 0 AND posted_at > ? \
                     ORDER BY posted_at DESC",
                )
                .bind(username)
                .bind(since)
                .fetch_all(self.db.pool())
                .await?
            }
            None => {
                sqlx::query_as::<_, Mention>(
                    "SELECT id, message_id, mentioned_user, body_html, posted_at, \
                            read, hidden, channel \
                     FROM mentions \
                     WHERE mentioned_user = ? COLLATE NOCASE AND hidden = 0 \
                     ORDER BY posted_at DESC",
                )
                .bind(username)
                .fetch_all(self.db.pool())
                .await?
            }
        };

        Ok(rows)
    }

    /// Soft-hide a mention. Mentions are never hard-deleted by normal flows.
    pub async fn hide(&self, mention_id: i64) -> Result<()> {
        let _guard = self.db.write_guard().await;
        let result = sqlx::query("UPDATE mentions SET hidden = 1 WHERE id = ?")
            .bind(mention_id)
            .execute(self.db.pool())
            .await?;

        if result.rows_affected() == 0 {
            return Err(ChatterlogError::Validation(format!(
                "Mention {mention_id} not found"
            )));
        }
        Ok(())
    }

    /// Flag a mention as read.
    pub async fn mark_read(&self, mention_id: i64) -> Result<()> {
        let _guard = self.db.write_guard().await;
        sqlx::query("UPDATE mentions SET read = 1 WHERE id = ?")
            .bind(mention_id)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::MessageStore;
    use crate::testing::{message_at, ts};

    async fn seeded() -> (MentionStore, MessageStore) {
        let db = Database::open_in_memory().await.unwrap();
        let messages = MessageStore::new(db.clone());
        let mut message = message_at(ts(10, 0, 0), "alice", "hi @Bob");
        message.mentions = vec!["Bob".to_string()];
        messages.admit("trade", &[message]).await.unwrap();
        (MentionStore::new(db), messages)
    }

    #[tokio::test]
    async fn lookup_is_case_insensitive() {
        let (mentions, _) = seeded().await;
        assert_eq!(mentions.for_user("bob", None).await.unwrap().len(), 1);
        assert_eq!(mentions.for_user("BOB", None).await.unwrap().len(), 1);
        assert!(mentions.for_user("alice", None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn since_filter_excludes_older_rows() {
        let (mentions, _) = seeded().await;
        let before = mentions.for_user("Bob", Some(ts(9, 0, 0))).await.unwrap();
        assert_eq!(before.len(), 1);
        let after = mentions.for_user("Bob", Some(ts(11, 0, 0))).await.unwrap();
        assert!(after.is_empty());
    }

    #[tokio::test]
    async fn hide_is_soft_delete() {
        let (mentions, _) = seeded().await;
        let id = mentions.for_user("Bob", None).await.unwrap()[0].id;

        mentions.hide(id).await.unwrap();
        assert!(mentions.for_user("Bob", None).await.unwrap().is_empty());

        // Row still exists, just hidden.
        let hidden = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM mentions WHERE hidden = 1")
            .fetch_one(mentions.db.pool())
            .await
            .unwrap();
        assert_eq!(hidden, 1);

        assert!(mentions.hide(9999).await.is_err());
    }

    #[tokio::test]
    async fn mark_read_sets_flag() {
        let (mentions, _) = seeded().await;
        let row = &mentions.for_user("Bob", None).await.unwrap()[0];
        assert!(!row.read);

        mentions.mark_read(row.id).await.unwrap();
        let row = &mentions.for_user("Bob", None).await.unwrap()[0];
        assert!(row.read);
    }
}
