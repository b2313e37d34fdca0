use super::ports::ReaperPorts;
use crate::transition::StaleDisposition;
use crate::types::JobId;
use crate::{QueueError, Result};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupSummary {
    pub reset_count: u32,
    pub failed_count: u32,
    pub job_ids: Vec<JobId>,
}

impl CleanupSummary {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.job_ids.is_empty()
    }

    pub(super) fn record(&mut self, job_id: JobId, disposition: StaleDisposition) {
        match disposition {
            StaleDisposition::Requeued => self.reset_count = self.reset_count.saturating_add(1),
            StaleDisposition::Failed => self.failed_count = self.failed_count.saturating_add(1),
        }
        self.job_ids.push(job_id);
    }
}

pub struct StuckJobReaper<P> {
    ports: P,
    default_threshold_minutes: u32,
}

impl<P> StuckJobReaper<P>
where
    P: ReaperPorts + Sync,
{
    #[must_use]
    pub const fn new(ports: P, default_threshold_minutes: u32) -> Self {
        Self {
            ports,
            default_threshold_minutes,
        }
    }

    /// Explicit threshold, else the stored override, else the default.
    ///
    /// # Errors
    /// Returns `QueueError::Validation` for an explicit zero threshold, or
    /// the store error if the override cannot be read.
    pub async fn resolve_threshold(&self, explicit_minutes: Option<u32>) -> Result<u32> {
        match explicit_minutes {
            Some(0) => Err(QueueError::Validation(
                "stale threshold must be at least one minute".to_string(),
            )),
            Some(minutes) => Ok(minutes),
            None => Ok(self
                .ports
                .configured_threshold_minutes()
                .await?
                .unwrap_or(self.default_threshold_minutes)),
        }
    }

    /// Reconciles every job whose heartbeat is older than the threshold.
    ///
    /// Each job is handled in its own transaction. Lock contention means a
    /// worker or another sweep owns the row right now, so it is left for the
    /// next round; any other per-job failure is logged, recorded as a
    /// `system_error` event when possible, and does not stop the sweep.
    ///
    /// # Errors
    /// Returns an error only if the threshold cannot be resolved or the stale
    /// scan itself fails.
    pub async fn sweep(&self, threshold_minutes: Option<u32>) -> Result<CleanupSummary> {
        let minutes = self.resolve_threshold(threshold_minutes).await?;
        let threshold = Duration::from_secs(u64::from(minutes).saturating_mul(60));
        let stale = self.ports.find_stale_jobs(threshold).await?;

        let mut summary = CleanupSummary::default();
        for job in stale {
            match self.ports.reconcile_stale_job(job.id, threshold).await {
                Ok(Some(outcome)) => summary.record(outcome.job_id, outcome.disposition),
                Ok(None) => {}
                Err(QueueError::ConcurrencyConflict(detail)) => {
                    debug!(job_id = %job.id, %detail, "Stale job locked elsewhere, skipping");
                }
                Err(err) => {
                    warn!(job_id = %job.id, error = %err, "Failed to reconcile stale job");
                    let message = format!("Stuck job cleanup failed: {err}");
                    if let Err(record_err) = self.ports.record_sweep_error(job.id, &message).await {
                        warn!(
                            job_id = %job.id,
                            error = %record_err,
                            "Failed to record reaper error event"
                        );
                    }
                }
            }
        }

        if !summary.is_empty() {
            info!(
                threshold_minutes = minutes,
                reset_count = summary.reset_count,
                failed_count = summary.failed_count,
                "Stuck job cleanup finished"
            );
        }
        Ok(summary)
    }
}
