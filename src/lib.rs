#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod reaper;
pub mod scheduler;
pub mod transition;
pub mod types;

pub use config::Settings;
pub use db::QueueDb;
pub use error::{QueueError, Result};
pub use reaper::{CleanupSummary, StuckJobReaper};
pub use scheduler::Scheduler;
pub use types::*;
