#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use edq::{ConfigValueType, EventType, JobId, JobPatch, JobStatus};

#[derive(Debug, Clone, PartialEq)]
pub enum CliCommand {
    InitDb,
    Enqueue {
        project_path: String,
        transcript_file: String,
        priority: Option<i32>,
        max_retries: Option<i32>,
    },
    Get {
        id: JobId,
    },
    List {
        status: Option<JobStatus>,
        page: Option<u32>,
        page_size: Option<u32>,
    },
    Stats,
    ClaimNext,
    Heartbeat {
        id: JobId,
    },
    Update {
        id: JobId,
        patch: JobPatch,
    },
    Delete {
        id: JobId,
    },
    Events {
        id: Option<JobId>,
        event_type: Option<EventType>,
        limit: Option<u32>,
    },
    ConfigGet {
        key: String,
    },
    ConfigSet {
        key: String,
        value: String,
        value_type: Option<ConfigValueType>,
        description: Option<String>,
    },
    ConfigList,
    Reap {
        threshold_minutes: Option<u32>,
    },
    Reaper {
        interval_secs: Option<u64>,
    },
}

impl CliCommand {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::InitDb => "init-db",
            Self::Enqueue { .. } => "enqueue",
            Self::Get { .. } => "get",
            Self::List { .. } => "list",
            Self::Stats => "stats",
            Self::ClaimNext => "claim-next",
            Self::Heartbeat { .. } => "heartbeat",
            Self::Update { .. } => "update",
            Self::Delete { .. } => "delete",
            Self::Events { .. } => "events",
            Self::ConfigGet { .. } => "config-get",
            Self::ConfigSet { .. } => "config-set",
            Self::ConfigList => "config-list",
            Self::Reap { .. } => "reap",
            Self::Reaper { .. } => "reaper",
        }
    }
}
