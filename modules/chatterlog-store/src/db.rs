//! SQLite database handle shared by all stores.

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use tokio::sync::{Mutex, MutexGuard};
use tracing::info;

use chatterlog_common::Result;

/// Shared database handle. Cheap to clone; all stores hold one.
///
/// SQLite does not safely interleave concurrent writers, so every mutating
/// transaction in the process runs under the single [`write_guard`] lock.
/// Reads go straight to the pool.
///
/// [`write_guard`]: Database::write_guard
#[derive(Clone)]
pub struct Database {
    pool: Pool<Sqlite>,
    write_lock: Arc<Mutex<()>>,
}

impl Database {
    /// Open (creating if needed) the database at `path` and run migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| chatterlog_common::ChatterlogError::Database(e.to_string()))?;
        }

        let options =
            SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))
                .map_err(|e| chatterlog_common::ChatterlogError::Database(e.to_string()))?
                .journal_mode(SqliteJournalMode::Wal)
                .foreign_keys(true)
                .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        info!(path = %path.display(), "Database opened");

        let db = Self::from_pool(pool);
        db.migrate().await?;
        Ok(db)
    }

    /// In-memory database for tests.
    pub async fn open_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| chatterlog_common::ChatterlogError::Database(e.to_string()))?
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let db = Self::from_pool(pool);
        db.migrate().await?;
        Ok(db)
    }

    fn from_pool(pool: Pool<Sqlite>) -> Self {
        Self {
            pool,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations complete");
        Ok(())
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Acquire the process-wide write-serialization guard. Hold it for the
    /// duration of one mutating transaction and no longer.
    pub async fn write_guard(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().await
    }
}
