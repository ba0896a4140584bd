//! Settings service
//!
//! Global polling settings plus per-workload overrides. Changes are
//! published as `SettingsEvent`s so the polling job can reschedule.

use drydock_core::domain::workload::{WorkloadId, WorkloadPollingSettings};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Global switch for image polling (bool)
pub const POLLING_ENABLED_KEY: &str = "pollingEnabled";

/// Global polling interval in minutes (int)
pub const POLLING_INTERVAL_KEY: &str = "pollingInterval";

const EVENT_BUFFER: usize = 64;

/// A settings change the polling job reacts to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingsEvent {
    GlobalChanged { key: String },
    WorkloadChanged(WorkloadId),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("Invalid value '{value}' for setting '{key}': {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
}

/// Read access to settings plus change notification
pub trait SettingsProvider: Send + Sync {
    /// Returns the boolean setting `key`, or `default` if unset or unparsable
    fn get_bool_setting(&self, key: &str, default: bool) -> bool;

    /// Returns the integer setting `key`, or `default` if unset or unparsable
    fn get_int_setting(&self, key: &str, default: i64) -> i64;

    /// Returns the polling override of a workload, if it has one
    fn workload_settings(&self, id: &WorkloadId) -> Option<WorkloadPollingSettings>;

    /// Subscribes to settings changes
    fn subscribe(&self) -> broadcast::Receiver<SettingsEvent>;
}

/// Process-local settings store
pub struct InMemorySettings {
    values: RwLock<HashMap<String, String>>,
    workloads: RwLock<HashMap<WorkloadId, WorkloadPollingSettings>>,
    events: broadcast::Sender<SettingsEvent>,
}

impl InMemorySettings {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            values: RwLock::new(HashMap::new()),
            workloads: RwLock::new(HashMap::new()),
            events,
        }
    }

    /// Sets a global setting after validating known keys
    pub fn set(&self, key: &str, value: impl Into<String>) -> Result<(), SettingsError> {
        let value = value.into();
        validate(key, &value)?;

        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value);

        debug!(key, "Global setting changed");
        self.publish(SettingsEvent::GlobalChanged {
            key: key.to_string(),
        });
        Ok(())
    }

    pub fn set_bool(&self, key: &str, value: bool) -> Result<(), SettingsError> {
        self.set(key, value.to_string())
    }

    pub fn set_int(&self, key: &str, value: i64) -> Result<(), SettingsError> {
        self.set(key, value.to_string())
    }

    /// Sets or replaces a workload's polling override
    pub fn set_workload_settings(
        &self,
        id: impl Into<WorkloadId>,
        settings: WorkloadPollingSettings,
    ) -> Result<(), SettingsError> {
        let id = id.into();
        if settings.polling_interval == Some(0) {
            return Err(SettingsError::InvalidValue {
                key: format!("{}.{}", id, POLLING_INTERVAL_KEY),
                value: "0".to_string(),
                reason: "interval must be at least one minute".to_string(),
            });
        }

        self.workloads
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), settings);

        debug!(workload = %id, "Workload polling settings changed");
        self.publish(SettingsEvent::WorkloadChanged(id));
        Ok(())
    }

    /// Drops a workload's override so it inherits the global settings again
    pub fn clear_workload_settings(&self, id: &WorkloadId) -> bool {
        let removed = self
            .workloads
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
            .is_some();
        if removed {
            self.publish(SettingsEvent::WorkloadChanged(id.clone()));
        }
        removed
    }

    fn publish(&self, event: SettingsEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn raw(&self, key: &str) -> Option<String> {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }
}

impl Default for InMemorySettings {
    fn default() -> Self {
        Self::new()
    }
}

impl SettingsProvider for InMemorySettings {
    fn get_bool_setting(&self, key: &str, default: bool) -> bool {
        match self.raw(key) {
            Some(value) => value.parse().unwrap_or_else(|_| {
                warn!(key, value, "Ignoring unparsable boolean setting");
                default
            }),
            None => default,
        }
    }

    fn get_int_setting(&self, key: &str, default: i64) -> i64 {
        match self.raw(key) {
            Some(value) => value.parse().unwrap_or_else(|_| {
                warn!(key, value, "Ignoring unparsable integer setting");
                default
            }),
            None => default,
        }
    }

    fn workload_settings(&self, id: &WorkloadId) -> Option<WorkloadPollingSettings> {
        self.workloads
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .copied()
    }

    fn subscribe(&self) -> broadcast::Receiver<SettingsEvent> {
        self.events.subscribe()
    }
}

fn validate(key: &str, value: &str) -> Result<(), SettingsError> {
    let invalid = |reason: &str| SettingsError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    };

    match key {
        POLLING_ENABLED_KEY => value
            .parse::<bool>()
            .map(|_| ())
            .map_err(|_| invalid("expected true or false")),
        POLLING_INTERVAL_KEY => match value.parse::<i64>() {
            Ok(minutes) if minutes > 0 => Ok(()),
            Ok(_) => Err(invalid("interval must be at least one minute")),
            Err(_) => Err(invalid("expected a number of minutes")),
        },
        _ => Ok(()),
    }
}
