//! Data Transfer Objects
//!
//! Snapshots served by the poller's debug surface and rendered by the CLI.
//! DTOs are plain serialisable copies; they never alias live engine state.

pub mod health;
pub mod polling;
