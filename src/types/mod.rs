mod config_item;
mod event;
mod identifiers;
mod job;

pub use config_item::{ConfigItem, ConfigValue, ConfigValueType};
pub use event::{EventData, EventType, EventValue, NewEvent, SessionEvent};
pub use identifiers::{EventId, JobId};
pub use job::{
    default_agent_phases, project_name_from_path, Job, JobPage, JobPatch, JobStatus, NewJob,
    Pagination, DEFAULT_MAX_RETRIES, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE,
};
