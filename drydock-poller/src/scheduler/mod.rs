//! Scheduling layer of the poller
//!
//! Decides what is polled and when: interval resolution from settings,
//! the schedule entry store, the recurring tick and the executor that turns
//! a due entry into registry lookups.

pub mod executor;
pub mod interval;
pub mod job;
pub mod schedule;
mod sweep;

pub use executor::{ImageCheckExecutor, LookupCoordinator};
pub use interval::{MIN_POLLING_INTERVAL, PollingPlan};
pub use job::{Collaborators, ImagePollingJob};
pub use schedule::PollingScheduler;
