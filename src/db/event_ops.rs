#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use super::mappers::{parse_events, EventRow, EVENT_COLUMNS};
use crate::db::QueueDb;
use crate::error::{QueueError, Result};
use crate::types::{EventType, JobId, NewEvent, SessionEvent};
use sqlx::PgConnection;

/// Appends `event` on an open connection so it commits with the caller's
/// transaction.
pub(crate) async fn insert_event(conn: &mut PgConnection, event: &NewEvent) -> Result<SessionEvent> {
    let payload = event.data.as_ref().map(|data| data.to_json()).transpose()?;

    sqlx::query_as::<_, EventRow>(&format!(
        "INSERT INTO session_events (job_id, timestamp, event_type, data)
         VALUES ($1, COALESCE($2, NOW()), $3, $4)
         RETURNING {EVENT_COLUMNS}"
    ))
    .bind(event.job_id.map(|id| id.value()))
    .bind(event.timestamp)
    .bind(event.event_type.as_str())
    .bind(payload)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| QueueError::from_sqlx("Failed to append event", &e))
    .and_then(SessionEvent::try_from)
}

pub(crate) async fn insert_events(conn: &mut PgConnection, events: &[NewEvent]) -> Result<()> {
    for event in events {
        insert_event(conn, event).await?;
    }
    Ok(())
}

impl QueueDb {
    /// # Errors
    /// Returns an error if the database operation fails.
    pub async fn append_event(&self, event: &NewEvent) -> Result<SessionEvent> {
        let mut conn = self
            .pool()
            .acquire()
            .await
            .map_err(|e| QueueError::from_sqlx("Failed to acquire connection", &e))?;

        insert_event(&mut conn, event).await
    }

    /// Events for one job, oldest first.
    ///
    /// # Errors
    /// Returns an error if the database operation fails.
    pub async fn events_for_job(&self, job_id: JobId) -> Result<Vec<SessionEvent>> {
        sqlx::query_as::<_, EventRow>(&format!(
            "SELECT {EVENT_COLUMNS}
             FROM session_events
             WHERE job_id = $1
             ORDER BY timestamp ASC, id ASC"
        ))
        .bind(job_id.value())
        .fetch_all(self.pool())
        .await
        .map_err(|e| QueueError::from_sqlx("Failed to load job events", &e))
        .and_then(parse_events)
    }

    /// Most recent events, newest first, optionally narrowed to one type.
    ///
    /// # Errors
    /// Returns an error if the database operation fails.
    pub async fn recent_events(
        &self,
        event_type: Option<EventType>,
        limit: u32,
    ) -> Result<Vec<SessionEvent>> {
        sqlx::query_as::<_, EventRow>(&format!(
            "SELECT {EVENT_COLUMNS}
             FROM session_events
             WHERE ($1::TEXT IS NULL OR event_type = $1)
             ORDER BY timestamp DESC, id DESC
             LIMIT $2"
        ))
        .bind(event_type.map(|value| value.as_str()))
        .bind(i64::from(limit))
        .fetch_all(self.pool())
        .await
        .map_err(|e| QueueError::from_sqlx("Failed to load recent events", &e))
        .and_then(parse_events)
    }
}
