use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use chatterlog_common::{civil_now, Config};
use chatterlog_ingest::{
    ConfigWatcher, FeedClient, HandleCache, Ingestor, MailboxPoller, Scheduler,
};
use chatterlog_store::{
    ArchiveSweep, ConfigStore, Database, DedupSweep, MailboxStore, MessageStore,
    ARCHIVE_BATCH_SIZE,
};

/// Retention horizon: live rows older than this are moved to the archive.
const RETENTION_HOURS: i64 = 2;

fn retention_cutoff() -> chrono::NaiveDateTime {
    civil_now() - chrono::Duration::hours(RETENTION_HOURS)
}

const DEDUP_INTERVAL: Duration = Duration::from_secs(60);
const ARCHIVE_INTERVAL: Duration = Duration::from_secs(3600);
const CONFIG_WATCH_INTERVAL: Duration = Duration::from_secs(15);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("chatterlog=info".parse()?))
        .init();

    info!("Chatterlog starting...");

    let config = Config::from_env();
    config.log_redacted();

    // Fail fast if storage is unavailable: nothing useful can run without it.
    let db = Database::open(Path::new(&config.database_path)).await?;

    let config_store = ConfigStore::new(db.clone());
    config_store.seed_defaults().await?;

    let feed = Arc::new(FeedClient::new(
        &config.upstream_base_url,
        &config.session_cookie,
    )?);
    let handles = Arc::new(HandleCache::new());

    let ingestor = Ingestor::new(
        feed.clone(),
        MessageStore::new(db.clone()),
        config_store.clone(),
    );
    let mailbox_poller = MailboxPoller::new(feed, MailboxStore::new(db.clone()), handles);
    let archive_sweep = ArchiveSweep::new(db.clone());
    let dedup_sweep = DedupSweep::new(db.clone());

    // Catch up on maintenance before the pollers start.
    info!("Running initial archive and dedup sweeps...");
    archive_sweep.run(retention_cutoff(), ARCHIVE_BATCH_SIZE).await?;
    dedup_sweep.run().await?;

    let poll_interval = config_store.polling_interval().await?;
    let mailbox_interval = config_store.mailbox_polling_interval().await?;

    let mut scheduler = Scheduler::new();

    let ingest_job = {
        let ingestor = ingestor.clone();
        scheduler.spawn("ingest", poll_interval, true, move || {
            let ingestor = ingestor.clone();
            async move {
                match ingestor.run_tick().await {
                    Ok(stats) => info!(%stats, "Ingestion tick complete"),
                    Err(e) => warn!(error = %e, "Ingestion tick failed, retrying next schedule"),
                }
            }
        })
    };

    {
        let poller = mailbox_poller.clone();
        scheduler.spawn("mailbox-poll", mailbox_interval, true, move || {
            let poller = poller.clone();
            async move {
                if let Err(e) = poller.poll_all().await {
                    warn!(error = %e, "Mailbox poll failed, retrying next schedule");
                }
            }
        });
    }

    {
        let sweep = dedup_sweep.clone();
        scheduler.spawn("dedup", DEDUP_INTERVAL, false, move || {
            let sweep = sweep.clone();
            async move {
                if let Err(e) = sweep.run().await {
                    warn!(error = %e, "Dedup sweep failed, retrying next schedule");
                }
            }
        });
    }

    {
        let sweep = archive_sweep.clone();
        scheduler.spawn("archive", ARCHIVE_INTERVAL, false, move || {
            let sweep = sweep.clone();
            async move {
                if let Err(e) = sweep.run(retention_cutoff(), ARCHIVE_BATCH_SIZE).await {
                    warn!(error = %e, "Archive sweep failed, retrying next schedule");
                }
            }
        });
    }

    {
        let watcher = ConfigWatcher::new(config_store, ingest_job);
        scheduler.spawn("config-watch", CONFIG_WATCH_INTERVAL, false, move || {
            let watcher = watcher.clone();
            async move {
                watcher.check().await;
            }
        });
    }

    info!("All jobs registered. Press Ctrl+C to exit.");
    tokio::signal::ctrl_c().await?;

    info!("Shutting down...");
    scheduler.shutdown().await;
    Ok(())
}
