//! Polling schedule domain model
//!
//! Schedule entries record when a target is polled next and what happened
//! the last time it was polled.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use super::workload::WorkloadId;

/// What a schedule entry polls
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "workload", rename_all = "snake_case")]
pub enum PollTarget {
    /// The fleet-wide fallback schedule
    Global,

    /// A workload with its own polling override
    Workload(WorkloadId),
}

impl PollTarget {
    pub fn workload(id: impl Into<WorkloadId>) -> Self {
        PollTarget::Workload(id.into())
    }

    pub fn workload_id(&self) -> Option<&WorkloadId> {
        match self {
            PollTarget::Global => None,
            PollTarget::Workload(id) => Some(id),
        }
    }
}

impl fmt::Display for PollTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PollTarget::Global => write!(f, "global"),
            PollTarget::Workload(id) => write!(f, "workload:{}", id),
        }
    }
}

/// Lifecycle of an entry between polls
///
/// "Due" is not stored: an idle entry whose next poll time has passed is due.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryState {
    Idle,
    InFlight,
}

/// Poll bookkeeping for one target
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleEntry {
    pub target: PollTarget,

    /// Resolved interval between polls of this target
    pub interval: Duration,

    pub next_poll_time: DateTime<Utc>,

    /// When the last attempt finished
    pub last_poll_time: Option<DateTime<Utc>>,

    pub last_poll_duration_ms: Option<u64>,

    /// When the last successful attempt finished
    pub last_success_time: Option<DateTime<Utc>>,

    pub last_error: Option<String>,

    pub consecutive_failures: u32,

    pub state: EntryState,
}

impl ScheduleEntry {
    /// Creates an entry that is due immediately
    pub fn new(target: PollTarget, interval: Duration, now: DateTime<Utc>) -> Self {
        Self {
            target,
            interval,
            next_poll_time: now,
            last_poll_time: None,
            last_poll_duration_ms: None,
            last_success_time: None,
            last_error: None,
            consecutive_failures: 0,
            state: EntryState::Idle,
        }
    }

    /// Whether the entry should be handed to a worker at `now`
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.state == EntryState::Idle && self.next_poll_time <= now
    }
}

/// Aggregate counts of one poll task
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepSummary {
    /// Images whose remote digest was resolved
    pub checked: usize,

    /// Images whose remote digest differs from the running one
    pub updates_available: usize,

    /// Images whose lookup failed
    pub errors: usize,
}

impl SweepSummary {
    pub fn merge(&mut self, other: &SweepSummary) {
        self.checked += other.checked;
        self.updates_available += other.updates_available;
        self.errors += other.errors;
    }
}

/// Result of one poll attempt as reported to the scheduler
#[derive(Debug, Clone, PartialEq)]
pub struct PollOutcome {
    pub success: bool,

    /// The task never ran (shutdown or tick cancellation)
    pub cancelled: bool,

    pub duration: Duration,
    pub error: Option<String>,
    pub summary: SweepSummary,
}

impl PollOutcome {
    pub fn success(duration: Duration, summary: SweepSummary) -> Self {
        Self {
            success: true,
            cancelled: false,
            duration,
            error: None,
            summary,
        }
    }

    pub fn failure(duration: Duration, error: impl Into<String>) -> Self {
        Self {
            success: false,
            cancelled: false,
            duration,
            error: Some(error.into()),
            summary: SweepSummary::default(),
        }
    }

    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self {
            cancelled: true,
            ..Self::failure(Duration::ZERO, reason)
        }
    }

    pub fn with_summary(mut self, summary: SweepSummary) -> Self {
        self.summary = summary;
        self
    }
}

/// How the next poll time is derived after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackoffStrategy {
    /// Failed entries are polled again after the normal interval
    #[default]
    FixedInterval,

    /// The interval doubles with each consecutive failure, up to `max`
    ExponentialBackoff { max: Duration },
}

impl BackoffStrategy {
    /// Delay before the next attempt given the failures recorded so far
    ///
    /// Never shorter than `interval`.
    pub fn delay(&self, interval: Duration, consecutive_failures: u32) -> Duration {
        match self {
            BackoffStrategy::FixedInterval => interval,
            BackoffStrategy::ExponentialBackoff { max } => {
                if consecutive_failures == 0 {
                    return interval;
                }
                let exponent = (consecutive_failures - 1).min(31);
                interval
                    .saturating_mul(1u32 << exponent)
                    .min((*max).max(interval))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: Duration = Duration::from_secs(3600);

    #[test]
    fn test_new_entry_is_due_immediately() {
        let now = Utc::now();
        let entry = ScheduleEntry::new(PollTarget::Global, HOUR, now);
        assert!(entry.is_due(now));
        assert_eq!(entry.consecutive_failures, 0);
        assert!(entry.last_poll_time.is_none());
    }

    #[test]
    fn test_in_flight_entry_is_not_due() {
        let now = Utc::now();
        let mut entry = ScheduleEntry::new(PollTarget::workload("web"), HOUR, now);
        entry.state = EntryState::InFlight;
        assert!(!entry.is_due(now));
    }

    #[test]
    fn test_fixed_interval_ignores_failures() {
        let strategy = BackoffStrategy::FixedInterval;
        assert_eq!(strategy.delay(HOUR, 0), HOUR);
        assert_eq!(strategy.delay(HOUR, 7), HOUR);
    }

    #[test]
    fn test_exponential_backoff_doubles_and_caps() {
        let strategy = BackoffStrategy::ExponentialBackoff { max: HOUR * 6 };
        assert_eq!(strategy.delay(HOUR, 0), HOUR);
        assert_eq!(strategy.delay(HOUR, 1), HOUR);
        assert_eq!(strategy.delay(HOUR, 2), HOUR * 2);
        assert_eq!(strategy.delay(HOUR, 3), HOUR * 4);
        assert_eq!(strategy.delay(HOUR, 4), HOUR * 6);
        assert_eq!(strategy.delay(HOUR, 40), HOUR * 6);
    }

    #[test]
    fn test_exponential_backoff_never_below_interval() {
        let strategy = BackoffStrategy::ExponentialBackoff {
            max: Duration::from_secs(60),
        };
        assert_eq!(strategy.delay(HOUR, 3), HOUR);
    }

    #[test]
    fn test_target_display() {
        assert_eq!(PollTarget::Global.to_string(), "global");
        assert_eq!(PollTarget::workload("api").to_string(), "workload:api");
    }
}
