//! Polling interval resolution
//!
//! Turns the global settings and the per-workload overrides into the set of
//! schedule targets, each with its effective interval, and the cadence of
//! the recurring tick.

use drydock_core::domain::schedule::PollTarget;
use drydock_core::domain::workload::{Workload, WorkloadId};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::service::{POLLING_ENABLED_KEY, POLLING_INTERVAL_KEY, SettingsProvider};

pub const DEFAULT_POLLING_ENABLED: bool = true;

/// Global interval in minutes when `pollingInterval` is unset
pub const DEFAULT_POLLING_INTERVAL_MINUTES: i64 = 60;

/// No target is polled more often than this
pub const MIN_POLLING_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Effective polling configuration at one point in time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollingPlan {
    /// Interval of the global sweep, `None` when global polling is off
    pub global: Option<Duration>,

    /// Workloads with their own schedule entry
    pub overrides: BTreeMap<WorkloadId, Duration>,

    /// Workloads polled by the global sweep, in catalog order
    pub swept: Vec<WorkloadId>,
}

impl PollingPlan {
    /// Resolves the plan for `workloads`
    ///
    /// A workload inherits any field its override leaves unset. It gets its
    /// own entry only when it has an override and is effectively enabled.
    pub fn resolve(
        settings: &dyn SettingsProvider,
        workloads: &[Workload],
        floor: Duration,
    ) -> Self {
        let global_enabled =
            settings.get_bool_setting(POLLING_ENABLED_KEY, DEFAULT_POLLING_ENABLED);
        let global_interval = clamp_minutes(
            settings.get_int_setting(POLLING_INTERVAL_KEY, DEFAULT_POLLING_INTERVAL_MINUTES),
            floor,
        );

        let mut overrides = BTreeMap::new();
        let mut swept = Vec::new();

        for workload in workloads {
            let resolved =
                resolve_workload(settings, &workload.id, global_enabled, global_interval, floor);
            if resolved.enabled {
                swept.push(workload.id.clone());
            }
            if let Some(interval) = resolved.own_interval {
                overrides.insert(workload.id.clone(), interval);
            }
        }

        Self {
            global: global_enabled.then_some(global_interval),
            overrides,
            swept,
        }
    }

    /// Cadence of the recurring tick: the shortest enabled interval
    pub fn tick(&self) -> Option<Duration> {
        self.global.into_iter().chain(self.overrides.values().copied()).min()
    }

    /// How far past `now` a tick claims entries
    ///
    /// Outcomes schedule the next poll from completion time, which lands
    /// just after the tick matching an entry's interval. Claiming up to half
    /// a tick early polls each entry on the tick nearest its due time.
    pub fn claim_horizon(&self) -> Duration {
        self.tick().map(|tick| tick / 2).unwrap_or_default()
    }

    /// Every schedule target the plan calls for
    pub fn targets(&self) -> Vec<(PollTarget, Duration)> {
        let mut targets = Vec::with_capacity(self.overrides.len() + 1);
        if let Some(interval) = self.global {
            targets.push((PollTarget::Global, interval));
        }
        for (id, interval) in &self.overrides {
            targets.push((PollTarget::Workload(id.clone()), *interval));
        }
        targets
    }

    pub fn interval_for(&self, target: &PollTarget) -> Option<Duration> {
        match target {
            PollTarget::Global => self.global,
            PollTarget::Workload(id) => self.overrides.get(id).copied(),
        }
    }

    pub fn is_swept(&self, id: &WorkloadId) -> bool {
        self.swept.contains(id)
    }
}

/// Resolution of a single workload against the global settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkloadResolution {
    /// Whether the workload's images are polled at all
    pub enabled: bool,

    /// Interval of the workload's own entry, if it gets one
    pub own_interval: Option<Duration>,
}

pub fn resolve_workload(
    settings: &dyn SettingsProvider,
    id: &WorkloadId,
    global_enabled: bool,
    global_interval: Duration,
    floor: Duration,
) -> WorkloadResolution {
    let Some(custom) = settings.workload_settings(id) else {
        return WorkloadResolution {
            enabled: global_enabled,
            own_interval: None,
        };
    };

    let enabled = custom.polling_enabled.unwrap_or(global_enabled);
    let has_override = custom.polling_enabled.is_some() || custom.polling_interval.is_some();
    let interval = custom
        .polling_interval
        .map(|minutes| clamp_minutes(i64::try_from(minutes).unwrap_or(i64::MAX), floor))
        .unwrap_or(global_interval);

    WorkloadResolution {
        enabled,
        own_interval: (enabled && has_override).then_some(interval),
    }
}

/// Converts a minute count to a duration no shorter than `floor`
pub fn clamp_minutes(minutes: i64, floor: Duration) -> Duration {
    let minutes = u64::try_from(minutes).unwrap_or(0);
    Duration::from_secs(minutes.saturating_mul(60)).max(floor)
}
