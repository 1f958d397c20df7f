//! Periodic retention sweep: removes jobs older than the TTL unless a
//! separation is queued or running for them.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::registry::JobRegistry;
use crate::storage::JobStorage;

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReapReport {
    pub removed: Vec<String>,
    pub skipped_active: Vec<String>,
    /// `(job_id, error)` for jobs whose directory could not be removed.
    pub failed: Vec<(String, String)>,
}

impl ReapReport {
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.skipped_active.is_empty() && self.failed.is_empty()
    }
}

/// Deletes expired jobs that are not queued or running, with their storage.
///
/// A job whose directory cannot be removed keeps its record so the next
/// sweep retries it.
#[derive(Clone)]
pub struct RetentionReaper {
    registry: Arc<JobRegistry>,
    storage: JobStorage,
    ttl: Duration,
    interval: Duration,
    shutdown: CancellationToken,
}

impl RetentionReaper {
    pub fn new(
        registry: Arc<JobRegistry>,
        storage: JobStorage,
        ttl: Duration,
        interval: Duration,
    ) -> Self {
        Self {
            registry,
            storage,
            ttl,
            interval,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Sweeps as of the current time.
    pub fn sweep(&self) -> ReapReport {
        self.sweep_at(Utc::now())
    }

    /// Sweeps every job created before `now - ttl`. Jobs never started
    /// (`uploaded`) expire like finished ones. Safe to call repeatedly.
    pub fn sweep_at(&self, now: DateTime<Utc>) -> ReapReport {
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::MAX);
        let cutoff = now.checked_sub_signed(ttl).unwrap_or(DateTime::<Utc>::MIN_UTC);

        let mut report = ReapReport::default();
        for job_id in self.registry.list_older_than(cutoff) {
            // Status check and removal share the registry write lock.
            let job = match self.registry.remove_if(&job_id, |job| !job.status.is_active()) {
                Some(job) => job,
                None => {
                    if let Ok(job) = self.registry.get(&job_id) {
                        log::debug!(
                            "Retention: job {} is still {}, skipping",
                            job_id,
                            job.status
                        );
                        report.skipped_active.push(job_id);
                    }
                    continue;
                }
            };

            if let Err(e) = self.storage.remove_job_dir(&job_id) {
                log::error!("Retention: failed to remove files of job {}: {}", job_id, e);
                if let Err(restore_err) = self.registry.create(job) {
                    log::error!("Retention: could not restore job {}: {}", job_id, restore_err);
                }
                report.failed.push((job_id, e.to_string()));
                continue;
            }

            log::info!("Retention: removed expired job {}", job_id);
            report.removed.push(job_id);
        }

        report
    }

    /// Starts the periodic sweep loop on the current runtime.
    pub fn start(&self) -> JoinHandle<()> {
        let reaper = self.clone();

        tokio::spawn(async move {
            let mut interval_timer = tokio::time::interval(reaper.interval);
            interval_timer.tick().await; // skip immediate first tick

            loop {
                tokio::select! {
                    _ = interval_timer.tick() => {},
                    _ = reaper.shutdown.cancelled() => break,
                }

                let sweeper = reaper.clone();
                match tokio::task::spawn_blocking(move || sweeper.sweep()).await {
                    Ok(report) if !report.removed.is_empty() || !report.failed.is_empty() => {
                        log::info!(
                            "Retention sweep: {} removed, {} failed, {} still active",
                            report.removed.len(),
                            report.failed.len(),
                            report.skipped_active.len()
                        );
                    }
                    Err(e) => log::error!("Retention sweep task failed: {}", e),
                    _ => {}
                }
            }

            log::debug!("Retention reaper stopped");
        })
    }

    /// Signals the sweep loop to stop.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }
}
