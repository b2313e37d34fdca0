#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

//! Pure job state transitions.
//!
//! Every timestamp and audit event derived from a status change is computed
//! here from `(old job, requested change, now)`, so the store only persists
//! what these functions return.

use crate::error::{QueueError, Result};
use crate::types::{EventData, EventType, Job, JobPatch, JobStatus, NewEvent};
use chrono::{DateTime, Utc};
use serde::Serialize;

pub const MAX_RETRIES_EXCEEDED_MESSAGE: &str = "Max retries exceeded after stuck job reset";
pub const STUCK_JOB_RESET_MESSAGE: &str = "Stuck job reset to pending";

/// The row to persist plus the audit events that must be written with it.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub job: Job,
    pub events: Vec<NewEvent>,
}

/// Applies a partial update to `old`, deriving timestamps from status changes.
///
/// # Errors
/// Returns `QueueError::Validation` when a cost is not finite or the patch
/// would requeue a job whose retries are exhausted.
pub fn apply_patch(old: &Job, patch: &JobPatch, now: DateTime<Utc>) -> Result<Transition> {
    validate_patch(old, patch)?;

    let mut job = old.clone();
    let mut events = Vec::new();

    if let Some(priority) = patch.priority {
        job.priority = priority;
    }
    if let Some(phase) = &patch.current_phase {
        job.current_phase = Some(phase.clone());
    }
    if let Some(cost) = patch.estimated_cost {
        job.estimated_cost = cost;
    }
    if let Some(cost) = patch.actual_cost {
        job.actual_cost = cost;
    }
    if let Some(path) = &patch.manifest_path {
        job.manifest_path = Some(path.clone());
    }
    if let Some(path) = &patch.logs_path {
        job.logs_path = Some(path.clone());
    }
    if let Some(error) = &patch.error_message {
        job.error_message = Some(error.clone());
    }
    if let Some(heartbeat) = patch.last_heartbeat {
        job.last_heartbeat = Some(heartbeat);
    }

    let target = patch.status.unwrap_or(old.status);
    let status_changed = target != old.status;
    job.status = target;

    match target {
        JobStatus::InProgress => {
            job.started_at.get_or_insert(now);
            if status_changed && patch.last_heartbeat.is_none() {
                job.last_heartbeat = Some(now);
            }
        }
        JobStatus::Completed | JobStatus::Failed => {
            if status_changed || job.completed_at.is_none() {
                job.completed_at = Some(now);
            }
        }
        JobStatus::Pending | JobStatus::Cancelled | JobStatus::Paused => {}
    }
    if !target.is_finished() {
        job.completed_at = None;
    }

    let failing = target == JobStatus::Failed && patch.status.is_some();
    if patch.error_message.is_some() {
        job.error_timestamp = Some(now);
    }

    if status_changed {
        if let Some(event_type) = status_event(target) {
            events.push(
                NewEvent::for_job(old.id, event_type)
                    .with_data(lifecycle_data(&job, old.status, patch)),
            );
        }
    } else if failing && patch.error_message.is_some() {
        events.push(
            NewEvent::for_job(old.id, EventType::JobFailed)
                .with_data(lifecycle_data(&job, old.status, patch)),
        );
    }

    if !failing {
        if let Some(error) = &patch.error_message {
            events.push(
                NewEvent::for_job(old.id, EventType::SystemError).with_data(
                    EventData::new()
                        .with("error", error.as_str())
                        .with("status", job.status.as_str())
                        .with_opt("phase", job.current_phase.clone()),
                ),
            );
        }
    }

    Ok(Transition { job, events })
}

fn validate_patch(old: &Job, patch: &JobPatch) -> Result<()> {
    let non_finite = [patch.estimated_cost, patch.actual_cost]
        .into_iter()
        .flatten()
        .any(|cost| !cost.is_finite());
    if non_finite {
        return Err(QueueError::Validation(
            "cost values must be finite numbers".to_string(),
        ));
    }

    if patch.status == Some(JobStatus::Pending)
        && old.status == JobStatus::Failed
        && old.retries_exhausted()
    {
        return Err(QueueError::Validation(format!(
            "job {} exhausted {} retries and cannot return to pending",
            old.id, old.max_retries
        )));
    }

    Ok(())
}

const fn status_event(status: JobStatus) -> Option<EventType> {
    match status {
        JobStatus::InProgress => Some(EventType::JobStarted),
        JobStatus::Completed => Some(EventType::JobCompleted),
        JobStatus::Failed => Some(EventType::JobFailed),
        JobStatus::Cancelled => Some(EventType::JobCancelled),
        JobStatus::Paused => Some(EventType::JobPaused),
        JobStatus::Pending => None,
    }
}

fn lifecycle_data(job: &Job, previous: JobStatus, patch: &JobPatch) -> EventData {
    EventData::new()
        .with("previous_status", previous.as_str())
        .with_opt("phase", job.current_phase.clone())
        .with_opt("error", patch.error_message.clone())
        .with_opt("cost", patch.actual_cost)
}

/// Whether `job` is an in-progress job whose liveness predates `cutoff`.
#[must_use]
pub fn is_stale(job: &Job, cutoff: DateTime<Utc>) -> bool {
    job.status == JobStatus::InProgress && job.liveness_at() < cutoff
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StaleDisposition {
    Requeued,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StaleResolution {
    pub disposition: StaleDisposition,
    pub job: Job,
    pub event: NewEvent,
}

/// Retry escalation for a job whose worker stopped heartbeating.
///
/// The reset about to happen is counted first: if it would reach
/// `max_retries` the job fails permanently with `retry_count` clamped to
/// `max_retries`, otherwise it goes back to pending with its claim state
/// cleared.
#[must_use]
pub fn resolve_stale(job: &Job, now: DateTime<Utc>) -> StaleResolution {
    let prior_phase = job.current_phase.clone();
    let next_retry = job.retry_count.saturating_add(1);

    if next_retry >= job.max_retries {
        let mut failed = job.clone();
        failed.status = JobStatus::Failed;
        failed.completed_at = Some(now);
        failed.error_message = Some(MAX_RETRIES_EXCEEDED_MESSAGE.to_string());
        failed.error_timestamp = Some(now);
        failed.retry_count = job.max_retries.max(0);

        let event = NewEvent::for_job(job.id, EventType::JobFailed).with_data(
            EventData::new()
                .with("error", MAX_RETRIES_EXCEEDED_MESSAGE)
                .with("retry_count", failed.retry_count)
                .with("max_retries", job.max_retries)
                .with_opt("phase", prior_phase),
        );

        return StaleResolution {
            disposition: StaleDisposition::Failed,
            job: failed,
            event,
        };
    }

    let mut requeued = job.clone();
    requeued.status = JobStatus::Pending;
    requeued.retry_count = next_retry;
    requeued.started_at = None;
    requeued.current_phase = None;
    requeued.last_heartbeat = None;
    requeued.completed_at = None;

    let event = NewEvent::for_job(job.id, EventType::SystemError).with_data(
        EventData::new()
            .with("error", STUCK_JOB_RESET_MESSAGE)
            .with("retry_count", next_retry)
            .with("max_retries", job.max_retries)
            .with_opt("phase", prior_phase)
            .with_opt(
                "last_heartbeat",
                job.last_heartbeat.map(|at| at.to_rfc3339()),
            ),
    );

    StaleResolution {
        disposition: StaleDisposition::Requeued,
        job: requeued,
        event,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EventValue, JobId};
    use chrono::Duration;

    fn pending_job() -> Job {
        let queued_at = Utc::now() - Duration::hours(1);
        Job {
            id: JobId::new(1),
            project_path: "/projects/test".to_string(),
            transcript_file: "/transcripts/test.txt".to_string(),
            project_name: Some("test".to_string()),
            status: JobStatus::Pending,
            priority: 0,
            queued_at,
            started_at: None,
            completed_at: None,
            last_heartbeat: None,
            current_phase: None,
            agent_phases: crate::types::default_agent_phases(),
            retry_count: 0,
            max_retries: 3,
            error_message: None,
            error_timestamp: None,
            estimated_cost: 0.0,
            actual_cost: 0.0,
            manifest_path: None,
            logs_path: None,
        }
    }

    fn in_progress_job(heartbeat_age_minutes: i64, retry_count: i32) -> Job {
        let at = Utc::now() - Duration::minutes(heartbeat_age_minutes);
        Job {
            status: JobStatus::InProgress,
            started_at: Some(at),
            last_heartbeat: Some(at),
            current_phase: Some("analyst".to_string()),
            retry_count,
            ..pending_job()
        }
    }

    fn event_types(transition: &Transition) -> Vec<EventType> {
        transition.events.iter().map(|e| e.event_type).collect()
    }

    #[test]
    fn moving_to_in_progress_sets_started_at_and_heartbeat() {
        let now = Utc::now();
        let transition = apply_patch(&pending_job(), &JobPatch::status(JobStatus::InProgress), now)
            .unwrap_or_else(|e| unreachable!("{e}"));

        assert_eq!(transition.job.status, JobStatus::InProgress);
        assert_eq!(transition.job.started_at, Some(now));
        assert_eq!(transition.job.last_heartbeat, Some(now));
        assert_eq!(event_types(&transition), vec![EventType::JobStarted]);
    }

    #[test]
    fn started_at_is_not_overwritten_on_reentry() {
        let first = Utc::now() - Duration::minutes(30);
        let job = Job {
            status: JobStatus::Paused,
            started_at: Some(first),
            ..pending_job()
        };
        let transition = apply_patch(&job, &JobPatch::status(JobStatus::InProgress), Utc::now())
            .unwrap_or_else(|e| unreachable!("{e}"));

        assert_eq!(transition.job.started_at, Some(first));
    }

    #[test]
    fn failing_with_message_sets_error_timestamp_and_completed_at() {
        let now = Utc::now();
        let job = in_progress_job(1, 0);
        let transition = apply_patch(&job, &JobPatch::failed("Test error"), now)
            .unwrap_or_else(|e| unreachable!("{e}"));

        assert_eq!(transition.job.status, JobStatus::Failed);
        assert_eq!(transition.job.error_message.as_deref(), Some("Test error"));
        assert_eq!(transition.job.error_timestamp, Some(now));
        assert_eq!(transition.job.completed_at, Some(now));
        assert_eq!(event_types(&transition), vec![EventType::JobFailed]);
        assert_eq!(
            transition.events[0].data.as_ref().and_then(|d| d.get("error")),
            Some(&EventValue::Text("Test error".to_string()))
        );
    }

    #[test]
    fn failing_without_message_leaves_error_timestamp_unset() {
        let transition = apply_patch(
            &in_progress_job(1, 0),
            &JobPatch::status(JobStatus::Failed),
            Utc::now(),
        )
        .unwrap_or_else(|e| unreachable!("{e}"));

        assert!(transition.job.completed_at.is_some());
        assert!(transition.job.error_timestamp.is_none());
    }

    #[test]
    fn completing_sets_completed_at_and_emits_event() {
        let now = Utc::now();
        let transition = apply_patch(
            &in_progress_job(1, 0),
            &JobPatch::status(JobStatus::Completed),
            now,
        )
        .unwrap_or_else(|e| unreachable!("{e}"));

        assert_eq!(transition.job.completed_at, Some(now));
        assert_eq!(event_types(&transition), vec![EventType::JobCompleted]);
    }

    #[test]
    fn leaving_a_finished_status_clears_completed_at() {
        let job = Job {
            status: JobStatus::Completed,
            completed_at: Some(Utc::now()),
            started_at: Some(Utc::now()),
            ..pending_job()
        };
        let transition = apply_patch(&job, &JobPatch::status(JobStatus::Cancelled), Utc::now())
            .unwrap_or_else(|e| unreachable!("{e}"));

        assert!(transition.job.completed_at.is_none());
        assert_eq!(event_types(&transition), vec![EventType::JobCancelled]);
    }

    #[test]
    fn field_only_patch_emits_no_events() {
        let patch = JobPatch {
            priority: Some(10),
            current_phase: Some("analyst".to_string()),
            actual_cost: Some(0.25),
            ..JobPatch::default()
        };
        let transition = apply_patch(&in_progress_job(1, 0), &patch, Utc::now())
            .unwrap_or_else(|e| unreachable!("{e}"));

        assert_eq!(transition.job.priority, 10);
        assert_eq!(transition.job.current_phase.as_deref(), Some("analyst"));
        assert!((transition.job.actual_cost - 0.25).abs() < f64::EPSILON);
        assert!(transition.events.is_empty());
    }

    #[test]
    fn error_message_without_failure_is_audited_as_system_error() {
        let now = Utc::now();
        let patch = JobPatch {
            error_message: Some("transient backend error".to_string()),
            ..JobPatch::default()
        };
        let transition = apply_patch(&in_progress_job(1, 0), &patch, now)
            .unwrap_or_else(|e| unreachable!("{e}"));

        assert_eq!(transition.job.status, JobStatus::InProgress);
        assert_eq!(transition.job.error_timestamp, Some(now));
        assert_eq!(event_types(&transition), vec![EventType::SystemError]);
    }

    #[test]
    fn error_message_and_timestamp_are_written_together() {
        let now = Utc::now();
        let cases = [
            JobPatch {
                error_message: Some("boom".to_string()),
                ..JobPatch::default()
            },
            JobPatch {
                status: Some(JobStatus::Failed),
                error_message: Some("boom".to_string()),
                ..JobPatch::default()
            },
            JobPatch {
                priority: Some(3),
                ..JobPatch::default()
            },
        ];

        for patch in &cases {
            let transition = apply_patch(&in_progress_job(1, 0), patch, now)
                .unwrap_or_else(|e| unreachable!("{e}"));
            assert_eq!(
                transition.job.error_message.is_some(),
                transition.job.error_timestamp.is_some(),
                "patch {patch:?}"
            );
        }
    }

    #[test]
    fn non_finite_cost_is_rejected() {
        let patch = JobPatch {
            actual_cost: Some(f64::NAN),
            ..JobPatch::default()
        };
        assert!(matches!(
            apply_patch(&pending_job(), &patch, Utc::now()),
            Err(QueueError::Validation(_))
        ));
    }

    #[test]
    fn exhausted_failed_job_cannot_be_requeued() {
        let job = Job {
            status: JobStatus::Failed,
            retry_count: 3,
            completed_at: Some(Utc::now()),
            ..pending_job()
        };
        assert!(matches!(
            apply_patch(&job, &JobPatch::status(JobStatus::Pending), Utc::now()),
            Err(QueueError::Validation(_))
        ));
    }

    #[test]
    fn stale_detection_uses_heartbeat_then_started_at() {
        let cutoff = Utc::now() - Duration::minutes(10);
        assert!(is_stale(&in_progress_job(15, 0), cutoff));
        assert!(!is_stale(&in_progress_job(5, 0), cutoff));

        let never_heartbeated = Job {
            last_heartbeat: None,
            ..in_progress_job(15, 0)
        };
        assert!(is_stale(&never_heartbeated, cutoff));

        let pending = pending_job();
        assert!(!is_stale(&pending, cutoff));
    }

    #[test]
    fn stale_job_with_retries_left_is_requeued() {
        let job = in_progress_job(15, 0);
        let resolution = resolve_stale(&job, Utc::now());

        assert_eq!(resolution.disposition, StaleDisposition::Requeued);
        assert_eq!(resolution.job.status, JobStatus::Pending);
        assert_eq!(resolution.job.retry_count, 1);
        assert!(resolution.job.started_at.is_none());
        assert!(resolution.job.current_phase.is_none());
        assert!(resolution.job.last_heartbeat.is_none());
        assert_eq!(resolution.event.event_type, EventType::SystemError);
        assert_eq!(
            resolution.event.data.as_ref().and_then(|d| d.get("phase")),
            Some(&EventValue::Text("analyst".to_string()))
        );
    }

    #[test]
    fn stale_job_on_last_retry_fails_permanently() {
        let now = Utc::now();
        let second_to_last = resolve_stale(&in_progress_job(15, 1), now);
        assert_eq!(second_to_last.disposition, StaleDisposition::Requeued);
        assert_eq!(second_to_last.job.retry_count, 2);

        let resolution = resolve_stale(&in_progress_job(15, 2), now);
        assert_eq!(resolution.disposition, StaleDisposition::Failed);
        assert_eq!(resolution.job.status, JobStatus::Failed);
        assert_eq!(resolution.job.retry_count, 3);
        assert_eq!(resolution.job.completed_at, Some(now));
        assert_eq!(
            resolution.job.error_message.as_deref(),
            Some(MAX_RETRIES_EXCEEDED_MESSAGE)
        );
        assert_eq!(resolution.event.event_type, EventType::JobFailed);
    }

    #[test]
    fn retry_count_is_clamped_when_already_over_the_bound() {
        let job = Job {
            max_retries: 1,
            ..in_progress_job(15, 4)
        };
        let resolution = resolve_stale(&job, Utc::now());
        assert_eq!(resolution.disposition, StaleDisposition::Failed);
        assert_eq!(resolution.job.retry_count, 1);
    }

    #[test]
    fn zero_retry_budget_fails_on_first_stall() {
        let job = Job {
            max_retries: 0,
            ..in_progress_job(15, 0)
        };
        assert_eq!(
            resolve_stale(&job, Utc::now()).disposition,
            StaleDisposition::Failed
        );
    }
}
