//! In-process periodic job scheduler.
//!
//! Each job is a tokio task driven by a resettable sleep. The job's cadence
//! is held in a watch channel, so [`JobHandle::reschedule`] replaces the
//! trigger in place: the job stays registered, an in-flight run finishes
//! undisturbed, and the next tick honors the new interval. Job bodies run at
//! most once concurrently; a tick that arrives while the previous run is
//! still going is skipped, not queued.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{info, warn};

/// Descriptor for a registered job. Cheap to clone; the config watcher holds
/// one to retune the ingestion cadence at runtime.
#[derive(Clone)]
pub struct JobHandle {
    name: &'static str,
    interval: watch::Sender<Duration>,
    running: Arc<AtomicBool>,
    completed: Arc<AtomicU64>,
}

impl JobHandle {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The currently installed interval.
    pub fn current_interval(&self) -> Duration {
        *self.interval.borrow()
    }

    /// Install a new interval. Takes effect immediately: the pending sleep
    /// restarts, so the next tick fires `new_interval` from now.
    pub fn reschedule(&self, new_interval: Duration) {
        let old = self.current_interval();
        if old == new_interval {
            return;
        }
        if self.interval.send(new_interval).is_ok() {
            info!(
                job = self.name,
                old_secs = old.as_secs(),
                new_secs = new_interval.as_secs(),
                "Job rescheduled"
            );
        }
    }

    /// Completed run count. Observability hook; also what the cadence tests
    /// assert on.
    pub fn completed_runs(&self) -> u64 {
        self.completed.load(Ordering::SeqCst)
    }
}

pub struct Scheduler {
    shutdown: watch::Sender<bool>,
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl Scheduler {
    pub fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            shutdown,
            tasks: Vec::new(),
        }
    }

    /// Register a periodic job. `run_at_start` fires one tick immediately on
    /// registration (before the first interval elapses).
    pub fn spawn<F, Fut>(
        &mut self,
        name: &'static str,
        interval: Duration,
        run_at_start: bool,
        job: F,
    ) -> JobHandle
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (interval_tx, mut interval_rx) = watch::channel(interval);
        let handle = JobHandle {
            name,
            interval: interval_tx,
            running: Arc::new(AtomicBool::new(false)),
            completed: Arc::new(AtomicU64::new(0)),
        };

        let job = Arc::new(job);
        let task_handle = handle.clone();
        let mut shutdown_rx = self.shutdown.subscribe();

        let task = tokio::spawn(async move {
            if run_at_start {
                Self::execute(&task_handle, &job);
            }

            let sleep = tokio::time::sleep(*interval_rx.borrow());
            tokio::pin!(sleep);

            loop {
                tokio::select! {
                    _ = &mut sleep => {
                        Self::execute(&task_handle, &job);
                        sleep.as_mut().reset(Instant::now() + *interval_rx.borrow());
                    }
                    changed = interval_rx.changed() => {
                        if changed.is_err() {
                            return;
                        }
                        // Trigger replaced in place: restart the pending
                        // sleep against the new interval.
                        sleep.as_mut().reset(Instant::now() + *interval_rx.borrow());
                    }
                    changed = shutdown_rx.changed() => {
                        // A dropped sender means the scheduler is gone; stop
                        // rather than spin on the closed channel.
                        if changed.is_err() || *shutdown_rx.borrow() {
                            return;
                        }
                    }
                }
            }
        });

        self.tasks.push(task);
        info!(job = name, interval_secs = interval.as_secs(), "Job registered");
        handle
    }

    fn execute<F, Fut>(handle: &JobHandle, job: &Arc<F>)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if handle.running.swap(true, Ordering::SeqCst) {
            warn!(job = handle.name, "Previous run still in progress, skipping tick");
            return;
        }

        let job = Arc::clone(job);
        let handle = handle.clone();
        tokio::spawn(async move {
            job().await;
            handle.completed.fetch_add(1, Ordering::SeqCst);
            handle.running.store(false, Ordering::SeqCst);
        });
    }

    /// Stop ticking. In-flight runs are left to finish; nothing new fires.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            let _ = task.await;
        }
        info!("Scheduler stopped");
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// Periodic drift check between the config table and the ingestion job's
/// installed cadence.
#[derive(Clone)]
pub struct ConfigWatcher {
    config: chatterlog_store::ConfigStore,
    ingest_job: JobHandle,
}

impl ConfigWatcher {
    pub fn new(config: chatterlog_store::ConfigStore, ingest_job: JobHandle) -> Self {
        Self { config, ingest_job }
    }

    /// One drift check. `polling_interval` already substitutes the default
    /// for missing/malformed values and clamps to the minimum floor, so a
    /// bad config value can never stall or flood the ingestion job.
    pub async fn check(&self) {
        match self.config.polling_interval().await {
            Ok(desired) => {
                if desired != self.ingest_job.current_interval() {
                    self.ingest_job.reschedule(desired);
                }
            }
            Err(e) => {
                warn!(error = %e, "Config drift check failed, keeping current interval");
            }
        }
    }
}
