//! Core domain types
//!
//! This module contains the domain structures shared between the polling
//! engine (which mutates them) and the operator tooling (which only reads
//! snapshots of them).

pub mod cache;
pub mod image;
pub mod schedule;
pub mod workload;
