#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use super::identifiers::JobId;
use crate::error::{QueueError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const DEFAULT_MAX_RETRIES: i32 = 3;
pub const DEFAULT_PAGE_SIZE: u32 = 50;
pub const MAX_PAGE_SIZE: u32 = 100;

#[must_use]
pub fn default_agent_phases() -> Vec<String> {
    vec!["analyst".to_string(), "formatter".to_string()]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
    Paused,
}

impl JobStatus {
    pub const ALL: [Self; 6] = [
        Self::Pending,
        Self::InProgress,
        Self::Completed,
        Self::Failed,
        Self::Cancelled,
        Self::Paused,
    ];

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Paused => "paused",
        }
    }

    /// Statuses that carry a `completed_at` timestamp.
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for JobStatus {
    type Error = String;

    fn try_from(s: &str) -> std::result::Result<Self, String> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("Unknown job status: {s}"))
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, String> {
        Self::try_from(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub project_path: String,
    pub transcript_file: String,
    pub project_name: Option<String>,
    pub status: JobStatus,
    pub priority: i32,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub current_phase: Option<String>,
    pub agent_phases: Vec<String>,
    pub retry_count: i32,
    pub max_retries: i32,
    pub error_message: Option<String>,
    pub error_timestamp: Option<DateTime<Utc>>,
    pub estimated_cost: f64,
    pub actual_cost: f64,
    pub manifest_path: Option<String>,
    pub logs_path: Option<String>,
}

impl Job {
    #[must_use]
    pub const fn retries_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }

    /// The instant liveness is measured from: the last heartbeat, or the
    /// claim time for a worker that never heartbeated.
    #[must_use]
    pub fn liveness_at(&self) -> DateTime<Utc> {
        self.last_heartbeat
            .or(self.started_at)
            .unwrap_or(self.queued_at)
    }
}

/// Display name for a project: the last non-empty segment of its path.
///
/// Trailing separators (`/` or `\`) are ignored and extensions are kept,
/// so `/projects/show.v2/` yields `show.v2`.
#[must_use]
pub fn project_name_from_path(project_path: &str) -> Option<String> {
    project_path
        .trim_end_matches(['/', '\\'])
        .rsplit(['/', '\\'])
        .next()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(ToString::to_string)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewJob {
    pub project_path: String,
    pub transcript_file: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_max_retries")]
    pub max_retries: i32,
    #[serde(default = "default_agent_phases")]
    pub agent_phases: Vec<String>,
    #[serde(default)]
    pub estimated_cost: f64,
}

const fn default_max_retries() -> i32 {
    DEFAULT_MAX_RETRIES
}

impl NewJob {
    #[must_use]
    pub fn new(project_path: impl Into<String>, transcript_file: impl Into<String>) -> Self {
        Self {
            project_path: project_path.into(),
            transcript_file: transcript_file.into(),
            priority: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            agent_phases: default_agent_phases(),
            estimated_cost: 0.0,
        }
    }

    #[must_use]
    pub const fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: i32) -> Self {
        self.max_retries = max_retries;
        self
    }

    #[must_use]
    pub fn with_agent_phases(mut self, phases: Vec<String>) -> Self {
        self.agent_phases = phases;
        self
    }

    /// # Errors
    /// Returns `QueueError::Validation` when a path is blank, the retry bound
    /// is negative, a phase name is blank or the cost estimate is not finite.
    pub fn validate(&self) -> Result<()> {
        if self.project_path.trim().is_empty() {
            return Err(QueueError::Validation(
                "project_path must not be empty".to_string(),
            ));
        }
        if self.transcript_file.trim().is_empty() {
            return Err(QueueError::Validation(
                "transcript_file must not be empty".to_string(),
            ));
        }
        if self.max_retries < 0 {
            return Err(QueueError::Validation(format!(
                "max_retries must be >= 0, got {}",
                self.max_retries
            )));
        }
        if self.agent_phases.iter().any(|phase| phase.trim().is_empty()) {
            return Err(QueueError::Validation(
                "agent_phases must not contain blank names".to_string(),
            ));
        }
        if !self.estimated_cost.is_finite() {
            return Err(QueueError::Validation(
                "estimated_cost must be a finite number".to_string(),
            ));
        }
        Ok(())
    }
}

/// Partial update; `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobPatch {
    pub status: Option<JobStatus>,
    pub priority: Option<i32>,
    pub current_phase: Option<String>,
    pub error_message: Option<String>,
    pub estimated_cost: Option<f64>,
    pub actual_cost: Option<f64>,
    pub manifest_path: Option<String>,
    pub logs_path: Option<String>,
    pub last_heartbeat: Option<DateTime<Utc>>,
}

impl JobPatch {
    #[must_use]
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn failed(error_message: impl Into<String>) -> Self {
        Self {
            status: Some(JobStatus::Failed),
            error_message: Some(error_message.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn phase(phase: impl Into<String>) -> Self {
        Self {
            current_phase: Some(phase.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub page: u32,
    pub page_size: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl Pagination {
    /// # Errors
    /// Returns `QueueError::Validation` when `page` is zero or `page_size`
    /// falls outside `1..=100`.
    pub fn new(page: u32, page_size: u32) -> Result<Self> {
        if page == 0 {
            return Err(QueueError::Validation("page must be >= 1".to_string()));
        }
        if page_size == 0 || page_size > MAX_PAGE_SIZE {
            return Err(QueueError::Validation(format!(
                "page_size must be between 1 and {MAX_PAGE_SIZE}, got {page_size}"
            )));
        }
        Ok(Self { page, page_size })
    }

    #[must_use]
    pub fn offset(&self) -> i64 {
        i64::from(self.page.saturating_sub(1)) * i64::from(self.page_size)
    }

    #[must_use]
    pub fn limit(&self) -> i64 {
        i64::from(self.page_size)
    }

    #[must_use]
    pub fn total_pages(&self, total: u64) -> u64 {
        total.div_ceil(u64::from(self.page_size.max(1)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPage {
    pub jobs: Vec<Job>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
    pub total_pages: u64,
}
