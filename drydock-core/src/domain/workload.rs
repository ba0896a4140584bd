//! Workload domain model
//!
//! A workload is a tracked deployable unit (a compose project or a single
//! container) running on a local or remote execution target.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identifier of a workload
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkloadId(String);

impl WorkloadId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkloadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WorkloadId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for WorkloadId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A workload and the images it runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workload {
    pub id: WorkloadId,

    /// Human readable name (compose project or container name)
    pub name: String,

    /// Images referenced by the workload's services
    #[serde(default)]
    pub images: Vec<WorkloadImage>,
}

/// An image used by a workload together with the digest it currently runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadImage {
    /// Reference as written in the workload definition (e.g. "nginx:1.25")
    pub reference: String,

    /// Digest of the image the workload is running, if known
    #[serde(default)]
    pub current_digest: Option<String>,
}

impl WorkloadImage {
    pub fn new(reference: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            current_digest: None,
        }
    }

    pub fn with_digest(mut self, digest: impl Into<String>) -> Self {
        self.current_digest = Some(digest.into());
        self
    }
}

/// Per-workload polling override
///
/// A `None` field inherits the corresponding global setting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadPollingSettings {
    pub polling_enabled: Option<bool>,

    /// Interval in minutes
    pub polling_interval: Option<u64>,
}

impl WorkloadPollingSettings {
    /// Override that enables polling at a specific interval (minutes)
    pub fn enabled_every(minutes: u64) -> Self {
        Self {
            polling_enabled: Some(true),
            polling_interval: Some(minutes),
        }
    }

    /// Override that disables polling for the workload
    pub fn disabled() -> Self {
        Self {
            polling_enabled: Some(false),
            polling_interval: None,
        }
    }
}
