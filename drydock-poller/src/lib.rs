//! Drydock Poller
//!
//! Background engine that checks whether the images a fleet of workloads
//! runs have newer digests in their registries.
//!
//! Architecture:
//! - Scheduler: interval resolution, schedule entries and the recurring tick
//! - Worker: bounded queue and fixed pool of workers running poll tasks
//! - Cache / Coordinator: TTL digest cache and single-flight lookups
//! - Services: settings, fleet catalog, credentials and update notification
//! - API: debug HTTP surface over the running engine

pub mod api;
pub mod cache;
pub mod config;
pub mod coordinator;
pub mod health;
pub mod scheduler;
pub mod service;
pub mod worker;
