//! Polling engine snapshot DTOs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::cache::CacheStats;
use crate::domain::schedule::{EntryState, PollTarget, ScheduleEntry};

use super::health::HealthReport;

/// Point-in-time view of the polling engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingSnapshot {
    pub generated_at: DateTime<Utc>,

    /// Interval of the recurring tick, `None` when polling is disabled
    pub tick_interval_secs: Option<u64>,

    pub scheduler_size: usize,

    pub queue_size: usize,

    pub queue_capacity: usize,

    pub coalesced_in_flight: usize,

    pub cache: CacheStats,

    /// Entries ordered by next poll time
    pub entries: Vec<EntrySummary>,

    pub health: HealthReport,
}

/// Serialisable view of a schedule entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntrySummary {
    pub target: PollTarget,
    pub interval_secs: u64,
    pub next_poll_time: DateTime<Utc>,
    pub last_poll_time: Option<DateTime<Utc>>,
    pub last_poll_duration_ms: Option<u64>,
    pub last_success_time: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
    pub in_flight: bool,
}

impl From<&ScheduleEntry> for EntrySummary {
    fn from(entry: &ScheduleEntry) -> Self {
        Self {
            target: entry.target.clone(),
            interval_secs: entry.interval.as_secs(),
            next_poll_time: entry.next_poll_time,
            last_poll_time: entry.last_poll_time,
            last_poll_duration_ms: entry.last_poll_duration_ms,
            last_success_time: entry.last_success_time,
            last_error: entry.last_error.clone(),
            consecutive_failures: entry.consecutive_failures,
            in_flight: entry.state == EntryState::InFlight,
        }
    }
}

/// Result of `POST /debug/polling/reschedule`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RescheduleResponse {
    pub tick_interval_secs: Option<u64>,
}

/// Result of `POST /debug/polling/tick`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickResponse {
    /// Tasks submitted for entries that were due
    pub submitted: usize,
}

/// Result of removing a workload's schedule entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveEntryResponse {
    /// The entry existed and is no longer scheduled
    pub removed: bool,

    /// The entry existed but its override is still enabled, so it was
    /// recreated with no history
    #[serde(default)]
    pub reset: bool,

    pub tick_interval_secs: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_entry_summary_conversion() {
        let now = Utc::now();
        let mut entry = ScheduleEntry::new(PollTarget::workload("db"), Duration::from_secs(600), now);
        entry.consecutive_failures = 2;
        entry.state = EntryState::InFlight;

        let summary = EntrySummary::from(&entry);
        assert_eq!(summary.target, PollTarget::workload("db"));
        assert_eq!(summary.interval_secs, 600);
        assert_eq!(summary.consecutive_failures, 2);
        assert!(summary.in_flight);
    }

    #[test]
    fn test_target_serialises_with_kind_tag() {
        let json = serde_json::to_value(PollTarget::workload("db")).unwrap();
        assert_eq!(json["kind"], "workload");
        assert_eq!(json["workload"], "db");

        let global = serde_json::to_value(PollTarget::Global).unwrap();
        assert_eq!(global["kind"], "global");
    }
}
