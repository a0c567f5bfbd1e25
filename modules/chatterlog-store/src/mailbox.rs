//! Persistence for the mailbox status poller: the durable tier of the
//! handle cache, upserted status rows, and per-owner monitoring preferences.

use chrono::NaiveDateTime;
use sqlx::Row;

use chatterlog_common::{
    ChatterlogError, MailboxColor, MailboxStatus, MonitoringPreference, Result,
    MAX_MONITORED_USERNAMES,
};

use crate::db::Database;

#[derive(Clone)]
pub struct MailboxStore {
    db: Database,
}

impl MailboxStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Cached upstream mailbox handle for a username, if one was ever
    /// resolved.
    pub async fn get_handle(&self, username: &str) -> Result<Option<String>> {
        let handle =
            sqlx::query_scalar::<_, String>("SELECT handle FROM mailbox_handles WHERE username = ?")
                .bind(username)
                .fetch_optional(self.db.pool())
                .await?;
        Ok(handle)
    }

    /// Persist a successfully resolved handle.
    pub async fn save_handle(&self, username: &str, handle: &str) -> Result<()> {
        let _guard = self.db.write_guard().await;
        sqlx::query(
            "INSERT INTO mailbox_handles (username, handle) VALUES (?, ?) \
             ON CONFLICT (username) DO UPDATE SET handle = excluded.handle",
        )
        .bind(username)
        .bind(handle)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    /// Upsert the latest status for a username. One row per username, never
    /// historized.
    pub async fn upsert_status(&self, status: &MailboxStatus) -> Result<()> {
        let _guard = self.db.write_guard().await;
        sqlx::query(
            "INSERT INTO mailbox_status \
             (username, status, current_items, max_items, fill_ratio, last_error, last_updated) \
             VALUES (?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT (username) DO UPDATE SET \
                 status = excluded.status, \
                 current_items = excluded.current_items, \
                 max_items = excluded.max_items, \
                 fill_ratio = excluded.fill_ratio, \
                 last_error = excluded.last_error, \
                 last_updated = excluded.last_updated",
        )
        .bind(&status.username)
        .bind(status.status.as_str())
        .bind(status.current_items)
        .bind(status.max_items)
        .bind(status.fill_ratio)
        .bind(&status.last_error)
        .bind(status.last_updated)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    /// All stored statuses, keyed for the read surface.
    pub async fn statuses(&self) -> Result<Vec<MailboxStatus>> {
        let rows = sqlx::query(
            "SELECT username, status, current_items, max_items, fill_ratio, \
                    last_error, last_updated \
             FROM mailbox_status ORDER BY username",
        )
        .fetch_all(self.db.pool())
        .await?;

        rows.into_iter()
            .map(|row| {
                let raw_status: String = row.get("status");
                let status = MailboxColor::parse(&raw_status).ok_or_else(|| {
                    ChatterlogError::Database(format!("Unknown mailbox status '{raw_status}'"))
                })?;
                Ok(MailboxStatus {
                    username: row.get("username"),
                    status,
                    current_items: row.get("current_items"),
                    max_items: row.get("max_items"),
                    fill_ratio: row.get("fill_ratio"),
                    last_error: row.get("last_error"),
                    last_updated: row.get::<NaiveDateTime, _>("last_updated"),
                })
            })
            .collect()
    }

    /// Stored statuses for a specific username set.
    pub async fn statuses_for(&self, usernames: &[String]) -> Result<Vec<MailboxStatus>> {
        let all = self.statuses().await?;
        Ok(all
            .into_iter()
            .filter(|s| usernames.iter().any(|u| u == &s.username))
            .collect())
    }

    /// Replace the monitored-username set for one owner. Capped at
    /// [`MAX_MONITORED_USERNAMES`]; the whole replacement is one transaction.
    pub async fn set_preferences(&self, owner_id: &str, usernames: &[String]) -> Result<()> {
        let mut unique: Vec<String> = usernames
            .iter()
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty())
            .collect();
        unique.sort();
        unique.dedup();

        if unique.len() > MAX_MONITORED_USERNAMES {
            return Err(ChatterlogError::Validation(format!(
                "At most {MAX_MONITORED_USERNAMES} monitored usernames per owner"
            )));
        }

        let _guard = self.db.write_guard().await;
        let mut tx = self.db.pool().begin().await?;

        sqlx::query("DELETE FROM monitoring_preferences WHERE owner_id = ?")
            .bind(owner_id)
            .execute(&mut *tx)
            .await?;

        for username in &unique {
            sqlx::query("INSERT INTO monitoring_preferences (owner_id, username) VALUES (?, ?)")
                .bind(owner_id)
                .bind(username)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn preferences_for(&self, owner_id: &str) -> Result<Vec<MonitoringPreference>> {
        let rows = sqlx::query_as::<_, MonitoringPreference>(
            "SELECT owner_id, username FROM monitoring_preferences \
             WHERE owner_id = ? ORDER BY username",
        )
        .bind(owner_id)
        .fetch_all(self.db.pool())
        .await?;
        Ok(rows)
    }

    /// Distinct usernames across all owners — the set the poller samples.
    /// Has no lifecycle coupling to status rows.
    pub async fn monitored_usernames(&self) -> Result<Vec<String>> {
        let rows = sqlx::query_scalar::<_, String>(
            "SELECT DISTINCT username FROM monitoring_preferences ORDER BY username",
        )
        .fetch_all(self.db.pool())
        .await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ts;

    async fn store() -> MailboxStore {
        MailboxStore::new(Database::open_in_memory().await.unwrap())
    }

    #[tokio::test]
    async fn handle_round_trips_and_updates() {
        let store = store().await;
        assert_eq!(store.get_handle("alice").await.unwrap(), None);

        store.save_handle("alice", "12345").await.unwrap();
        assert_eq!(store.get_handle("alice").await.unwrap().as_deref(), Some("12345"));

        store.save_handle("alice", "67890").await.unwrap();
        assert_eq!(store.get_handle("alice").await.unwrap().as_deref(), Some("67890"));
    }

    #[tokio::test]
    async fn status_upserts_in_place() {
        let store = store().await;
        let ok = MailboxStatus {
            username: "alice".to_string(),
            status: MailboxColor::Green,
            current_items: 50,
            max_items: 1000,
            fill_ratio: 0.05,
            last_error: None,
            last_updated: ts(10, 0, 0),
        };
        store.upsert_status(&ok).await.unwrap();

        // A later error poll replaces the row and zeroes the numerics.
        let errored = MailboxStatus::errored("alice", "timeout".to_string(), ts(10, 1, 0));
        store.upsert_status(&errored).await.unwrap();

        let statuses = store.statuses().await.unwrap();
        assert_eq!(statuses.len(), 1);
        let row = &statuses[0];
        assert_eq!(row.status, MailboxColor::Error);
        assert_eq!((row.current_items, row.max_items), (0, 0));
        assert_eq!(row.fill_ratio, 0.0);
        assert_eq!(row.last_error.as_deref(), Some("timeout"));
    }

    #[tokio::test]
    async fn preferences_replace_dedupe_and_cap() {
        let store = store().await;
        store
            .set_preferences("owner-1", &["bob".into(), " bob ".into(), "alice".into()])
            .await
            .unwrap();

        let prefs = store.preferences_for("owner-1").await.unwrap();
        let names: Vec<&str> = prefs.iter().map(|p| p.username.as_str()).collect();
        assert_eq!(names, vec!["alice", "bob"]);

        // Replacement, not accumulation.
        store.set_preferences("owner-1", &["carol".into()]).await.unwrap();
        let prefs = store.preferences_for("owner-1").await.unwrap();
        assert_eq!(prefs.len(), 1);
        assert_eq!(prefs[0].username, "carol");

        let too_many: Vec<String> = (0..6).map(|i| format!("user{i}")).collect();
        assert!(store.set_preferences("owner-1", &too_many).await.is_err());
        // Failed replacement leaves the previous set intact.
        assert_eq!(store.preferences_for("owner-1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn monitored_usernames_is_distinct_across_owners() {
        let store = store().await;
        store.set_preferences("owner-1", &["alice".into(), "bob".into()]).await.unwrap();
        store.set_preferences("owner-2", &["bob".into(), "carol".into()]).await.unwrap();

        assert_eq!(
            store.monitored_usernames().await.unwrap(),
            vec!["alice", "bob", "carol"]
        );
    }
}
