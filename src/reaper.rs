#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

mod ports;
mod sweep;

pub use ports::{PortFuture, ReaperPorts};
pub use sweep::{CleanupSummary, StuckJobReaper};

#[cfg(test)]
mod tests;
