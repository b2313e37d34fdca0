#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use super::{CleanupSummary, PortFuture, ReaperPorts, StuckJobReaper};
use crate::db::StaleJobOutcome;
use crate::transition::{is_stale, resolve_stale, StaleDisposition, MAX_RETRIES_EXCEEDED_MESSAGE};
use crate::types::{default_agent_phases, Job, JobId, JobStatus};
use crate::{QueueError, Result};
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

fn job(id: i64, status: JobStatus, heartbeat_minutes_ago: i64, retry_count: i32) -> Job {
    let now = Utc::now();
    let started = now - ChronoDuration::minutes(heartbeat_minutes_ago + 5);
    Job {
        id: JobId::new(id),
        project_path: format!("/projects/show-{id}"),
        transcript_file: format!("/transcripts/show-{id}.txt"),
        project_name: Some(format!("show-{id}")),
        status,
        priority: 0,
        queued_at: started,
        started_at: Some(started),
        completed_at: None,
        last_heartbeat: Some(now - ChronoDuration::minutes(heartbeat_minutes_ago)),
        current_phase: Some("analyst".to_string()),
        agent_phases: default_agent_phases(),
        retry_count,
        max_retries: 3,
        error_message: None,
        error_timestamp: None,
        estimated_cost: 0.0,
        actual_cost: 0.0,
        manifest_path: None,
        logs_path: None,
    }
}

#[derive(Debug, Clone, Default)]
struct FakePorts {
    jobs: Arc<Mutex<Vec<Job>>>,
    configured_minutes: Arc<Mutex<Option<u32>>>,
    scanned_thresholds: Arc<Mutex<Vec<Duration>>>,
    broken: Arc<Mutex<HashSet<i64>>>,
    locked: Arc<Mutex<HashSet<i64>>>,
    recorded_errors: Arc<Mutex<Vec<(i64, String)>>>,
    fail_recording: Arc<Mutex<bool>>,
    fail_scan: Arc<Mutex<bool>>,
}

impl FakePorts {
    async fn with_jobs(self, jobs: Vec<Job>) -> Self {
        *self.jobs.lock().await = jobs;
        self
    }

    async fn with_configured_minutes(self, minutes: u32) -> Self {
        *self.configured_minutes.lock().await = Some(minutes);
        self
    }

    async fn with_broken(self, id: i64) -> Self {
        self.broken.lock().await.insert(id);
        self
    }

    async fn with_locked(self, id: i64) -> Self {
        self.locked.lock().await.insert(id);
        self
    }

    async fn with_recording_failure(self) -> Self {
        *self.fail_recording.lock().await = true;
        self
    }

    async fn with_scan_failure(self) -> Self {
        *self.fail_scan.lock().await = true;
        self
    }

    async fn job(&self, id: i64) -> Job {
        self.jobs
            .lock()
            .await
            .iter()
            .find(|job| job.id.value() == id)
            .cloned()
            .expect("job exists")
    }
}

fn cutoff(threshold: Duration) -> chrono::DateTime<Utc> {
    Utc::now() - ChronoDuration::from_std(threshold).expect("threshold fits")
}

impl ReaperPorts for FakePorts {
    fn configured_threshold_minutes(&self) -> PortFuture<'_, Option<u32>> {
        Box::pin(async move { Ok(*self.configured_minutes.lock().await) })
    }

    fn find_stale_jobs(&self, threshold: Duration) -> PortFuture<'_, Vec<Job>> {
        Box::pin(async move {
            self.scanned_thresholds.lock().await.push(threshold);
            if *self.fail_scan.lock().await {
                return Err(QueueError::Storage("database unavailable".to_string()));
            }
            let limit = cutoff(threshold);
            Ok(self
                .jobs
                .lock()
                .await
                .iter()
                .filter(|job| is_stale(job, limit))
                .cloned()
                .collect())
        })
    }

    fn reconcile_stale_job(
        &self,
        job_id: JobId,
        threshold: Duration,
    ) -> PortFuture<'_, Option<StaleJobOutcome>> {
        Box::pin(async move {
            if self.locked.lock().await.contains(&job_id.value()) {
                return Err(QueueError::ConcurrencyConflict(
                    "could not obtain lock on row".to_string(),
                ));
            }
            if self.broken.lock().await.contains(&job_id.value()) {
                return Err(QueueError::Storage("constraint violated".to_string()));
            }

            let mut jobs = self.jobs.lock().await;
            let Some(slot) = jobs.iter_mut().find(|job| job.id == job_id) else {
                return Ok(None);
            };
            if !is_stale(slot, cutoff(threshold)) {
                return Ok(None);
            }

            let resolution = resolve_stale(slot, Utc::now());
            *slot = resolution.job.clone();
            Ok(Some(StaleJobOutcome {
                job_id,
                disposition: resolution.disposition,
                job: resolution.job,
            }))
        })
    }

    fn record_sweep_error<'a>(&'a self, job_id: JobId, message: &'a str) -> PortFuture<'a, ()> {
        Box::pin(async move {
            if *self.fail_recording.lock().await {
                return Err(QueueError::Storage("event log unavailable".to_string()));
            }
            self.recorded_errors
                .lock()
                .await
                .push((job_id.value(), message.to_string()));
            Ok(())
        })
    }
}

async fn sweep(ports: &FakePorts, minutes: Option<u32>) -> Result<CleanupSummary> {
    StuckJobReaper::new(ports.clone(), 10).sweep(minutes).await
}

#[tokio::test]
async fn stale_job_with_retries_left_is_requeued() {
    let ports = FakePorts::default()
        .with_jobs(vec![job(1, JobStatus::InProgress, 15, 0)])
        .await;

    let summary = sweep(&ports, Some(10)).await.expect("sweep");

    assert_eq!(
        summary,
        CleanupSummary {
            reset_count: 1,
            failed_count: 0,
            job_ids: vec![JobId::new(1)],
        }
    );
    let reset = ports.job(1).await;
    assert_eq!(reset.status, JobStatus::Pending);
    assert_eq!(reset.retry_count, 1);
    assert!(reset.started_at.is_none());
    assert!(reset.current_phase.is_none());
    assert!(reset.last_heartbeat.is_none());
}

#[tokio::test]
async fn stale_job_on_last_retry_fails_permanently() {
    let ports = FakePorts::default()
        .with_jobs(vec![job(7, JobStatus::InProgress, 30, 2)])
        .await;

    let summary = sweep(&ports, Some(10)).await.expect("sweep");

    assert_eq!(summary.failed_count, 1);
    assert_eq!(summary.reset_count, 0);
    let failed = ports.job(7).await;
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.retry_count, 3);
    assert!(failed.completed_at.is_some());
    assert_eq!(
        failed.error_message.as_deref(),
        Some(MAX_RETRIES_EXCEEDED_MESSAGE)
    );
}

#[tokio::test]
async fn fresh_and_idle_jobs_are_untouched() {
    let ports = FakePorts::default()
        .with_jobs(vec![
            job(1, JobStatus::InProgress, 2, 0),
            job(2, JobStatus::Pending, 60, 0),
            job(3, JobStatus::Completed, 60, 0),
        ])
        .await;

    let summary = sweep(&ports, Some(10)).await.expect("sweep");

    assert!(summary.is_empty());
    assert_eq!(ports.job(1).await.status, JobStatus::InProgress);
}

#[tokio::test]
async fn second_sweep_finds_nothing_left() {
    let ports = FakePorts::default()
        .with_jobs(vec![
            job(1, JobStatus::InProgress, 15, 0),
            job(2, JobStatus::InProgress, 15, 2),
        ])
        .await;

    let first = sweep(&ports, Some(10)).await.expect("first sweep");
    let second = sweep(&ports, Some(10)).await.expect("second sweep");

    assert_eq!(first.job_ids, vec![JobId::new(1), JobId::new(2)]);
    assert_eq!((first.reset_count, first.failed_count), (1, 1));
    assert!(second.is_empty());
}

#[tokio::test]
async fn one_broken_job_does_not_stop_the_sweep() {
    let ports = FakePorts::default()
        .with_jobs(vec![
            job(1, JobStatus::InProgress, 15, 0),
            job(2, JobStatus::InProgress, 15, 0),
            job(3, JobStatus::InProgress, 15, 0),
        ])
        .await
        .with_broken(2)
        .await;

    let summary = sweep(&ports, Some(10)).await.expect("sweep");

    assert_eq!(summary.job_ids, vec![JobId::new(1), JobId::new(3)]);
    assert_eq!(summary.reset_count, 2);
    assert_eq!(ports.job(2).await.status, JobStatus::InProgress);

    let errors = ports.recorded_errors.lock().await.clone();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].0, 2);
    assert!(errors[0].1.contains("constraint violated"));
}

#[tokio::test]
async fn failing_error_event_is_still_isolated() {
    let ports = FakePorts::default()
        .with_jobs(vec![
            job(1, JobStatus::InProgress, 15, 0),
            job(2, JobStatus::InProgress, 15, 0),
        ])
        .await
        .with_broken(1)
        .await
        .with_recording_failure()
        .await;

    let summary = sweep(&ports, Some(10)).await.expect("sweep");

    assert_eq!(summary.job_ids, vec![JobId::new(2)]);
}

#[tokio::test]
async fn locked_job_is_skipped_without_audit_event() {
    let ports = FakePorts::default()
        .with_jobs(vec![job(4, JobStatus::InProgress, 15, 0)])
        .await
        .with_locked(4)
        .await;

    let summary = sweep(&ports, Some(10)).await.expect("sweep");

    assert!(summary.is_empty());
    assert!(ports.recorded_errors.lock().await.is_empty());
    assert_eq!(ports.job(4).await.status, JobStatus::InProgress);
}

#[tokio::test]
async fn scan_failure_is_surfaced() {
    let ports = FakePorts::default()
        .with_jobs(vec![job(1, JobStatus::InProgress, 15, 0)])
        .await
        .with_scan_failure()
        .await;

    assert!(matches!(
        sweep(&ports, Some(10)).await,
        Err(QueueError::Storage(_))
    ));
}

#[tokio::test]
async fn threshold_prefers_explicit_then_config_then_default() {
    let ports = FakePorts::default().with_configured_minutes(25).await;
    let reaper = StuckJobReaper::new(ports.clone(), 10);

    assert_eq!(reaper.resolve_threshold(Some(5)).await.expect("explicit"), 5);
    assert_eq!(reaper.resolve_threshold(None).await.expect("config"), 25);

    let unconfigured = StuckJobReaper::new(FakePorts::default(), 10);
    assert_eq!(
        unconfigured.resolve_threshold(None).await.expect("default"),
        10
    );
}

#[tokio::test]
async fn zero_threshold_is_rejected() {
    let reaper = StuckJobReaper::new(FakePorts::default(), 10);
    assert!(matches!(
        reaper.resolve_threshold(Some(0)).await,
        Err(QueueError::Validation(_))
    ));
}

#[tokio::test]
async fn configured_threshold_drives_the_scan() {
    let ports = FakePorts::default()
        .with_jobs(vec![job(1, JobStatus::InProgress, 15, 0)])
        .await
        .with_configured_minutes(20)
        .await;

    let summary = sweep(&ports, None).await.expect("sweep");

    assert!(summary.is_empty());
    assert_eq!(
        ports.scanned_thresholds.lock().await.as_slice(),
        &[Duration::from_secs(20 * 60)]
    );
}

#[test]
fn summary_serializes_with_stable_field_names() {
    let mut summary = CleanupSummary::default();
    summary.record(JobId::new(3), StaleDisposition::Requeued);
    summary.record(JobId::new(8), StaleDisposition::Failed);

    let value = serde_json::to_value(&summary).expect("serialize");
    assert_eq!(
        value,
        serde_json::json!({"reset_count": 1, "failed_count": 1, "job_ids": [3, 8]})
    );
}
