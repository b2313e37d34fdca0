use crate::db::{QueueDb, StaleJobOutcome};
use crate::types::{EventData, EventType, Job, JobId, NewEvent};
use crate::Result;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

pub type PortFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Store operations the reaper needs.
pub trait ReaperPorts {
    /// Threshold override stored in the config table, if any.
    fn configured_threshold_minutes(&self) -> PortFuture<'_, Option<u32>>;

    fn find_stale_jobs(&self, threshold: Duration) -> PortFuture<'_, Vec<Job>>;

    /// Requeues or fails one job in its own transaction. `Ok(None)` when the
    /// job is no longer stale under lock.
    fn reconcile_stale_job(
        &self,
        job_id: JobId,
        threshold: Duration,
    ) -> PortFuture<'_, Option<StaleJobOutcome>>;

    fn record_sweep_error<'a>(&'a self, job_id: JobId, message: &'a str) -> PortFuture<'a, ()>;
}

impl ReaperPorts for QueueDb {
    fn configured_threshold_minutes(&self) -> PortFuture<'_, Option<u32>> {
        Box::pin(self.stale_threshold_minutes())
    }

    fn find_stale_jobs(&self, threshold: Duration) -> PortFuture<'_, Vec<Job>> {
        Box::pin(self.get_stale_jobs(threshold))
    }

    fn reconcile_stale_job(
        &self,
        job_id: JobId,
        threshold: Duration,
    ) -> PortFuture<'_, Option<StaleJobOutcome>> {
        Box::pin(Self::reconcile_stale_job(self, job_id, threshold))
    }

    fn record_sweep_error<'a>(&'a self, job_id: JobId, message: &'a str) -> PortFuture<'a, ()> {
        Box::pin(async move {
            let event = NewEvent::for_job(job_id, EventType::SystemError).with_data(
                EventData::new()
                    .with("error", message)
                    .with("source", "reaper"),
            );
            self.append_event(&event).await.map(|_| ())
        })
    }
}
