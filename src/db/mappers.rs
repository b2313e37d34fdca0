use crate::error::{QueueError, Result};
use crate::types::{
    project_name_from_path, ConfigItem, ConfigValueType, EventData, EventId, EventType, Job,
    JobId, JobStatus, SessionEvent,
};
use chrono::{DateTime, Utc};
use sqlx::FromRow;

pub const JOB_COLUMNS: &str = "id, project_path, transcript_file, status, priority, queued_at, \
     started_at, completed_at, last_heartbeat, current_phase, agent_phases, retry_count, \
     max_retries, error_message, error_timestamp, estimated_cost, actual_cost, manifest_path, \
     logs_path";

pub const EVENT_COLUMNS: &str = "id, job_id, timestamp, event_type, data";

pub const CONFIG_COLUMNS: &str = "key, value, value_type, description, updated_at";

#[derive(FromRow)]
pub struct JobRow {
    id: i64,
    project_path: String,
    transcript_file: String,
    status: String,
    priority: i32,
    queued_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    last_heartbeat: Option<DateTime<Utc>>,
    current_phase: Option<String>,
    agent_phases: Vec<String>,
    retry_count: i32,
    max_retries: i32,
    error_message: Option<String>,
    error_timestamp: Option<DateTime<Utc>>,
    estimated_cost: f64,
    actual_cost: f64,
    manifest_path: Option<String>,
    logs_path: Option<String>,
}

impl TryFrom<JobRow> for Job {
    type Error = QueueError;

    fn try_from(row: JobRow) -> Result<Self> {
        let status = JobStatus::try_from(row.status.as_str()).map_err(QueueError::Storage)?;

        Ok(Self {
            id: JobId::new(row.id),
            project_name: project_name_from_path(&row.project_path),
            project_path: row.project_path,
            transcript_file: row.transcript_file,
            status,
            priority: row.priority,
            queued_at: row.queued_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            last_heartbeat: row.last_heartbeat,
            current_phase: row.current_phase,
            agent_phases: row.agent_phases,
            retry_count: row.retry_count,
            max_retries: row.max_retries,
            error_message: row.error_message,
            error_timestamp: row.error_timestamp,
            estimated_cost: row.estimated_cost,
            actual_cost: row.actual_cost,
            manifest_path: row.manifest_path,
            logs_path: row.logs_path,
        })
    }
}

pub fn parse_jobs(rows: Vec<JobRow>) -> Result<Vec<Job>> {
    rows.into_iter().map(Job::try_from).collect()
}

#[derive(FromRow)]
pub struct EventRow {
    id: i64,
    job_id: Option<i64>,
    timestamp: DateTime<Utc>,
    event_type: String,
    data: Option<serde_json::Value>,
}

impl TryFrom<EventRow> for SessionEvent {
    type Error = QueueError;

    fn try_from(row: EventRow) -> Result<Self> {
        let event_type =
            EventType::try_from(row.event_type.as_str()).map_err(QueueError::Storage)?;
        let data = row
            .data
            .filter(|value| !value.is_null())
            .map(EventData::from_json)
            .transpose()?;

        Ok(Self {
            id: EventId::new(row.id),
            job_id: row.job_id.map(JobId::new),
            timestamp: row.timestamp,
            event_type,
            data,
        })
    }
}

pub fn parse_events(rows: Vec<EventRow>) -> Result<Vec<SessionEvent>> {
    rows.into_iter().map(SessionEvent::try_from).collect()
}

#[derive(FromRow)]
pub struct ConfigRow {
    key: String,
    value: String,
    value_type: String,
    description: Option<String>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ConfigRow> for ConfigItem {
    type Error = QueueError;

    fn try_from(row: ConfigRow) -> Result<Self> {
        let value_type =
            ConfigValueType::try_from(row.value_type.as_str()).map_err(QueueError::Storage)?;

        Ok(Self {
            key: row.key,
            value: row.value,
            value_type,
            description: row.description,
            updated_at: row.updated_at,
        })
    }
}

pub const fn to_u64_i64(value: i64) -> u64 {
    if value < 0 {
        0
    } else {
        value.cast_unsigned()
    }
}
