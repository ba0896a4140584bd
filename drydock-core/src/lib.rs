//! Drydock Core
//!
//! Core types and abstractions for the Drydock fleet manager.
//!
//! This crate contains:
//! - Domain types: workloads, image references, schedule entries, cache stats
//! - DTOs: snapshots exchanged between the poller's debug surface and the CLI
//! - Clock: time source shared by the scheduler and the digest cache

pub mod clock;
pub mod domain;
pub mod dto;

pub use clock::{Clock, FakeClock, SystemClock};
