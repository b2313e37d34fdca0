#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use crate::config::Settings;
use crate::db::QueueDb;
use crate::error::Result;
use crate::reaper::{CleanupSummary, StuckJobReaper};
use crate::types::{
    ConfigItem, ConfigValueType, EventType, Job, JobId, JobPage, JobPatch, JobStatus, NewEvent,
    NewJob, Pagination, SessionEvent,
};
use std::future::Future;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

/// Entry point for API handlers, workers and the periodic cleanup trigger.
#[derive(Clone)]
pub struct Scheduler {
    db: QueueDb,
    default_threshold_minutes: u32,
}

impl Scheduler {
    #[must_use]
    pub const fn new(db: QueueDb, settings: &Settings) -> Self {
        Self::with_default_threshold(db, settings.stale_threshold_minutes)
    }

    #[must_use]
    pub const fn with_default_threshold(db: QueueDb, default_threshold_minutes: u32) -> Self {
        Self {
            db,
            default_threshold_minutes,
        }
    }

    #[must_use]
    pub const fn db(&self) -> &QueueDb {
        &self.db
    }

    /// # Errors
    /// Propagates validation and storage errors.
    pub async fn create_job(&self, new_job: &NewJob) -> Result<Job> {
        self.db.create_job(new_job).await
    }

    /// # Errors
    /// Propagates storage errors.
    pub async fn get_job(&self, job_id: JobId) -> Result<Option<Job>> {
        self.db.get_job(job_id).await
    }

    /// # Errors
    /// Propagates storage errors.
    pub async fn list_jobs(
        &self,
        status: Option<JobStatus>,
        pagination: Pagination,
    ) -> Result<JobPage> {
        self.db.list_jobs(status, pagination).await
    }

    /// # Errors
    /// Propagates storage errors.
    pub async fn count_jobs_by_status(&self) -> Result<Vec<(JobStatus, u64)>> {
        self.db.count_jobs_by_status().await
    }

    /// # Errors
    /// Propagates not-found, validation and storage errors.
    pub async fn update_job(&self, job_id: JobId, patch: &JobPatch) -> Result<Job> {
        self.db.update_job(job_id, patch).await
    }

    /// # Errors
    /// Propagates not-found and storage errors.
    pub async fn complete_job(&self, job_id: JobId, actual_cost: Option<f64>) -> Result<Job> {
        let patch = JobPatch {
            actual_cost,
            ..JobPatch::status(JobStatus::Completed)
        };
        self.db.update_job(job_id, &patch).await
    }

    /// # Errors
    /// Propagates not-found and storage errors.
    pub async fn fail_job(&self, job_id: JobId, error_message: &str) -> Result<Job> {
        self.db
            .update_job(job_id, &JobPatch::failed(error_message))
            .await
    }

    /// # Errors
    /// Propagates storage errors.
    pub async fn delete_job(&self, job_id: JobId) -> Result<bool> {
        self.db.delete_job(job_id).await
    }

    /// # Errors
    /// Propagates storage errors.
    pub async fn claim_next(&self) -> Result<Option<Job>> {
        self.db.claim_next_job().await
    }

    /// # Errors
    /// Propagates storage errors.
    pub async fn heartbeat(&self, job_id: JobId) -> Result<bool> {
        self.db.heartbeat(job_id).await
    }

    /// # Errors
    /// Propagates storage errors.
    pub async fn get_stale_jobs(&self, threshold_minutes: u32) -> Result<Vec<Job>> {
        self.db
            .get_stale_jobs(Duration::from_secs(u64::from(threshold_minutes) * 60))
            .await
    }

    /// # Errors
    /// Propagates storage errors.
    pub async fn append_event(&self, event: &NewEvent) -> Result<SessionEvent> {
        self.db.append_event(event).await
    }

    /// # Errors
    /// Propagates storage errors.
    pub async fn events_for_job(&self, job_id: JobId) -> Result<Vec<SessionEvent>> {
        self.db.events_for_job(job_id).await
    }

    /// # Errors
    /// Propagates storage errors.
    pub async fn recent_events(
        &self,
        event_type: Option<EventType>,
        limit: u32,
    ) -> Result<Vec<SessionEvent>> {
        self.db.recent_events(event_type, limit).await
    }

    /// # Errors
    /// Propagates storage errors.
    pub async fn get_config(&self, key: &str) -> Result<Option<ConfigItem>> {
        self.db.get_config(key).await
    }

    /// # Errors
    /// Propagates validation and storage errors.
    pub async fn set_config(
        &self,
        key: &str,
        value: &str,
        value_type: ConfigValueType,
        description: Option<&str>,
    ) -> Result<ConfigItem> {
        self.db.set_config(key, value, value_type, description).await
    }

    /// # Errors
    /// Propagates storage errors.
    pub async fn list_config(&self) -> Result<Vec<ConfigItem>> {
        self.db.list_config().await
    }

    /// Runs one reaper sweep; `None` uses the configured threshold.
    ///
    /// # Errors
    /// Returns an error if the threshold is invalid or the stale scan fails.
    pub async fn run_stuck_job_cleanup(
        &self,
        threshold_minutes: Option<u32>,
    ) -> Result<CleanupSummary> {
        StuckJobReaper::new(self.db.clone(), self.default_threshold_minutes)
            .sweep(threshold_minutes)
            .await
    }

    /// Sweeps every `interval` (at least one second) until `shutdown`
    /// resolves and returns the number of sweeps run. A failed sweep is
    /// logged and retried on the next tick.
    pub async fn run_reaper_loop<S>(&self, interval: Duration, shutdown: S) -> u64
    where
        S: Future<Output = ()> + Send,
    {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!(interval_secs = interval.as_secs(), "Reaper loop started");
        let mut sweeps = 0_u64;
        loop {
            tokio::select! {
                () = &mut shutdown => break,
                _ = ticker.tick() => {
                    sweeps = sweeps.saturating_add(1);
                    if let Err(err) = self.run_stuck_job_cleanup(None).await {
                        warn!(error = %err, "Stuck job cleanup failed");
                    }
                }
            }
        }
        info!(sweeps, "Reaper loop stopped");
        sweeps
    }
}
