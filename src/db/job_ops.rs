#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use super::event_ops::{insert_event, insert_events};
use super::mappers::{parse_jobs, to_u64_i64, JobRow, JOB_COLUMNS};
use crate::db::QueueDb;
use crate::error::{QueueError, Result};
use crate::transition::{apply_patch, is_stale, resolve_stale, StaleDisposition};
use crate::types::{
    EventData, EventType, Job, JobId, JobPage, JobPatch, JobStatus, NewEvent, NewJob, Pagination,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{Acquire, PgConnection};
use std::time::Duration;
use tracing::{debug, info};

/// What the reaper did to one stale job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StaleJobOutcome {
    pub job_id: JobId,
    pub disposition: StaleDisposition,
    pub job: Job,
}

async fn db_now(conn: &mut PgConnection) -> Result<DateTime<Utc>> {
    sqlx::query_scalar::<_, DateTime<Utc>>("SELECT NOW()")
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| QueueError::from_sqlx("Failed to read database clock", &e))
}

async fn write_job_row(conn: &mut PgConnection, job: &Job) -> Result<Job> {
    sqlx::query_as::<_, JobRow>(&format!(
        "UPDATE jobs
         SET status = $2,
             priority = $3,
             started_at = $4,
             completed_at = $5,
             last_heartbeat = $6,
             current_phase = $7,
             retry_count = $8,
             error_message = $9,
             error_timestamp = $10,
             estimated_cost = $11,
             actual_cost = $12,
             manifest_path = $13,
             logs_path = $14
         WHERE id = $1
         RETURNING {JOB_COLUMNS}"
    ))
    .bind(job.id.value())
    .bind(job.status.as_str())
    .bind(job.priority)
    .bind(job.started_at)
    .bind(job.completed_at)
    .bind(job.last_heartbeat)
    .bind(job.current_phase.as_deref())
    .bind(job.retry_count)
    .bind(job.error_message.as_deref())
    .bind(job.error_timestamp)
    .bind(job.estimated_cost)
    .bind(job.actual_cost)
    .bind(job.manifest_path.as_deref())
    .bind(job.logs_path.as_deref())
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| QueueError::from_sqlx("Failed to write job", &e))
    .and_then(Job::try_from)
}

fn staleness_cutoff(now: DateTime<Utc>, threshold: Duration) -> Result<DateTime<Utc>> {
    chrono::Duration::from_std(threshold)
        .ok()
        .and_then(|delta| now.checked_sub_signed(delta))
        .ok_or_else(|| {
            QueueError::Validation(format!("stale threshold {threshold:?} is out of range"))
        })
}

impl QueueDb {
    /// # Errors
    /// Returns `QueueError::Validation` for malformed input, or an error if
    /// the database operation fails.
    pub async fn create_job(&self, new_job: &NewJob) -> Result<Job> {
        new_job.validate()?;

        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(|e| QueueError::from_sqlx("Failed to begin tx", &e))?;

        let conn = tx
            .acquire()
            .await
            .map_err(|e| QueueError::from_sqlx("Failed to acquire tx conn", &e))?;

        let job = sqlx::query_as::<_, JobRow>(&format!(
            "INSERT INTO jobs (project_path, transcript_file, priority, max_retries, agent_phases, estimated_cost)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(&new_job.project_path)
        .bind(&new_job.transcript_file)
        .bind(new_job.priority)
        .bind(new_job.max_retries)
        .bind(&new_job.agent_phases)
        .bind(new_job.estimated_cost)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| QueueError::from_sqlx("Failed to create job", &e))
        .and_then(Job::try_from)?;

        insert_event(
            conn,
            &NewEvent::for_job(job.id, EventType::JobQueued)
                .with_data(EventData::new().with("priority", job.priority)),
        )
        .await?;

        tx.commit()
            .await
            .map_err(|e| QueueError::from_sqlx("Failed to commit tx", &e))?;

        info!(job_id = %job.id, priority = job.priority, "Job queued");
        Ok(job)
    }

    /// # Errors
    /// Returns an error if the database operation fails.
    pub async fn get_job(&self, job_id: JobId) -> Result<Option<Job>> {
        sqlx::query_as::<_, JobRow>(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1"))
            .bind(job_id.value())
            .fetch_optional(self.pool())
            .await
            .map_err(|e| QueueError::from_sqlx("Failed to get job", &e))?
            .map(Job::try_from)
            .transpose()
    }

    /// Jobs ordered by `(priority DESC, id ASC)` with the unpaged total.
    ///
    /// # Errors
    /// Returns an error if the database operation fails.
    pub async fn list_jobs(
        &self,
        status: Option<JobStatus>,
        pagination: Pagination,
    ) -> Result<JobPage> {
        let status_filter = status.map(|value| value.as_str());

        let total = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM jobs WHERE ($1::TEXT IS NULL OR status = $1)",
        )
        .bind(status_filter)
        .fetch_one(self.pool())
        .await
        .map_err(|e| QueueError::from_sqlx("Failed to count jobs", &e))
        .map(to_u64_i64)?;

        let jobs = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS}
             FROM jobs
             WHERE ($1::TEXT IS NULL OR status = $1)
             ORDER BY priority DESC, id ASC
             LIMIT $2 OFFSET $3"
        ))
        .bind(status_filter)
        .bind(pagination.limit())
        .bind(pagination.offset())
        .fetch_all(self.pool())
        .await
        .map_err(|e| QueueError::from_sqlx("Failed to list jobs", &e))
        .and_then(parse_jobs)?;

        Ok(JobPage {
            jobs,
            total,
            page: pagination.page,
            page_size: pagination.page_size,
            total_pages: pagination.total_pages(total),
        })
    }

    /// Number of jobs in each status; statuses with no jobs report zero.
    ///
    /// # Errors
    /// Returns an error if the database operation fails.
    pub async fn count_jobs_by_status(&self) -> Result<Vec<(JobStatus, u64)>> {
        let rows = sqlx::query_as::<_, (String, i64)>(
            "SELECT status, COUNT(*) FROM jobs GROUP BY status",
        )
        .fetch_all(self.pool())
        .await
        .map_err(|e| QueueError::from_sqlx("Failed to count jobs by status", &e))?;

        Ok(JobStatus::ALL
            .into_iter()
            .map(|status| {
                let count = rows
                    .iter()
                    .find(|(name, _)| name == status.as_str())
                    .map_or(0, |(_, count)| to_u64_i64(*count));
                (status, count)
            })
            .collect())
    }

    /// Atomically moves the highest-priority pending job to in_progress.
    ///
    /// Rows locked by a concurrent claimer are skipped, so two callers never
    /// receive the same job and neither waits on the other.
    ///
    /// # Errors
    /// Returns an error if the database operation fails.
    pub async fn claim_next_job(&self) -> Result<Option<Job>> {
        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(|e| QueueError::from_sqlx("Failed to begin tx", &e))?;

        let conn = tx
            .acquire()
            .await
            .map_err(|e| QueueError::from_sqlx("Failed to acquire tx conn", &e))?;

        let claimed = sqlx::query_as::<_, JobRow>(&format!(
            "UPDATE jobs
             SET status = 'in_progress',
                 started_at = COALESCE(started_at, NOW()),
                 last_heartbeat = NOW(),
                 completed_at = NULL
             WHERE id = (
                 SELECT id
                 FROM jobs
                 WHERE status = 'pending'
                 ORDER BY priority DESC, id ASC
                 LIMIT 1
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING {JOB_COLUMNS}"
        ))
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| QueueError::from_sqlx("Failed to claim next job", &e))?
        .map(Job::try_from)
        .transpose()?;

        let Some(job) = claimed else {
            tx.rollback()
                .await
                .map_err(|e| QueueError::from_sqlx("Failed to rollback tx", &e))?;
            return Ok(None);
        };

        insert_event(
            conn,
            &NewEvent::for_job(job.id, EventType::JobStarted).with_data(
                EventData::new()
                    .with("priority", job.priority)
                    .with("retry_count", job.retry_count),
            ),
        )
        .await?;

        tx.commit()
            .await
            .map_err(|e| QueueError::from_sqlx("Failed to commit tx", &e))?;

        info!(job_id = %job.id, priority = job.priority, "Job claimed");
        Ok(Some(job))
    }

    /// Applies `patch` and the timestamps/events its status change implies.
    ///
    /// # Errors
    /// Returns `QueueError::NotFound` if the job does not exist,
    /// `QueueError::Validation` for a rejected change, or an error if the
    /// database operation fails.
    pub async fn update_job(&self, job_id: JobId, patch: &JobPatch) -> Result<Job> {
        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(|e| QueueError::from_sqlx("Failed to begin tx", &e))?;

        let conn = tx
            .acquire()
            .await
            .map_err(|e| QueueError::from_sqlx("Failed to acquire tx conn", &e))?;

        let now = db_now(conn).await?;

        let current = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1 FOR UPDATE"
        ))
        .bind(job_id.value())
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| QueueError::from_sqlx("Failed to lock job", &e))?
        .map(Job::try_from)
        .transpose()?
        .ok_or_else(|| QueueError::not_found("job", job_id))?;

        let transition = apply_patch(&current, patch, now)?;
        let updated = write_job_row(conn, &transition.job).await?;
        insert_events(conn, &transition.events).await?;

        tx.commit()
            .await
            .map_err(|e| QueueError::from_sqlx("Failed to commit tx", &e))?;

        if current.status != updated.status {
            info!(
                job_id = %job_id,
                from = %current.status,
                to = %updated.status,
                "Job status changed"
            );
        }
        Ok(updated)
    }

    /// Removes the job row; its events are kept.
    ///
    /// # Errors
    /// Returns an error if the database operation fails.
    pub async fn delete_job(&self, job_id: JobId) -> Result<bool> {
        sqlx::query("DELETE FROM jobs WHERE id = $1")
            .bind(job_id.value())
            .execute(self.pool())
            .await
            .map(|result| result.rows_affected() > 0)
            .map_err(|e| QueueError::from_sqlx("Failed to delete job", &e))
    }

    /// Refreshes `last_heartbeat`; returns whether an in-progress job was touched.
    ///
    /// # Errors
    /// Returns an error if the database operation fails.
    pub async fn heartbeat(&self, job_id: JobId) -> Result<bool> {
        let touched = sqlx::query(
            "UPDATE jobs SET last_heartbeat = NOW() WHERE id = $1 AND status = 'in_progress'",
        )
        .bind(job_id.value())
        .execute(self.pool())
        .await
        .map(|result| result.rows_affected() > 0)
        .map_err(|e| QueueError::from_sqlx("Failed to record heartbeat", &e))?;

        if !touched {
            debug!(job_id = %job_id, "Heartbeat ignored for job not in progress");
        }
        Ok(touched)
    }

    /// In-progress jobs whose last liveness signal is older than `threshold`.
    ///
    /// A job that never heartbeated is measured from its `started_at`.
    ///
    /// # Errors
    /// Returns an error if the database operation fails.
    pub async fn get_stale_jobs(&self, threshold: Duration) -> Result<Vec<Job>> {
        sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS}
             FROM jobs
             WHERE status = 'in_progress'
               AND COALESCE(last_heartbeat, started_at, queued_at)
                   < NOW() - make_interval(secs => $1::DOUBLE PRECISION)
             ORDER BY id ASC"
        ))
        .bind(threshold.as_secs_f64())
        .fetch_all(self.pool())
        .await
        .map_err(|e| QueueError::from_sqlx("Failed to find stale jobs", &e))
        .and_then(parse_jobs)
    }

    /// Requeues or fails one stale job in its own transaction.
    ///
    /// The row is locked without waiting and staleness is re-checked under
    /// the lock; `Ok(None)` means the job was deleted, finished or
    /// heartbeated since the scan.
    ///
    /// # Errors
    /// Returns `QueueError::ConcurrencyConflict` if another transaction holds
    /// the row, or an error if the database operation fails.
    pub async fn reconcile_stale_job(
        &self,
        job_id: JobId,
        threshold: Duration,
    ) -> Result<Option<StaleJobOutcome>> {
        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(|e| QueueError::from_sqlx("Failed to begin tx", &e))?;

        let conn = tx
            .acquire()
            .await
            .map_err(|e| QueueError::from_sqlx("Failed to acquire tx conn", &e))?;

        let now = db_now(conn).await?;
        let cutoff = staleness_cutoff(now, threshold)?;

        let current = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1 FOR UPDATE NOWAIT"
        ))
        .bind(job_id.value())
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| QueueError::from_sqlx("Failed to lock stale job", &e))?
        .map(Job::try_from)
        .transpose()?;

        let Some(job) = current.filter(|job| is_stale(job, cutoff)) else {
            tx.rollback()
                .await
                .map_err(|e| QueueError::from_sqlx("Failed to rollback tx", &e))?;
            debug!(job_id = %job_id, "Job no longer stale, skipping");
            return Ok(None);
        };

        let resolution = resolve_stale(&job, now);
        let written = write_job_row(conn, &resolution.job).await?;
        insert_event(conn, &resolution.event).await?;

        tx.commit()
            .await
            .map_err(|e| QueueError::from_sqlx("Failed to commit tx", &e))?;

        info!(
            job_id = %job_id,
            disposition = ?resolution.disposition,
            retry_count = written.retry_count,
            max_retries = written.max_retries,
            "Stale job reconciled"
        );

        Ok(Some(StaleJobOutcome {
            job_id,
            disposition: resolution.disposition,
            job: written,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::staleness_cutoff;
    use chrono::Utc;
    use std::time::Duration;

    #[test]
    fn cutoff_subtracts_threshold_from_now() {
        let now = Utc::now();
        let cutoff = staleness_cutoff(now, Duration::from_secs(600))
            .unwrap_or_else(|e| unreachable!("{e}"));
        assert_eq!((now - cutoff).num_minutes(), 10);
    }

    #[test]
    fn absurd_threshold_is_rejected() {
        assert!(staleness_cutoff(Utc::now(), Duration::from_secs(u64::MAX)).is_err());
    }
}
