//! Polling schedule store
//!
//! `PollingScheduler` is the only thing that mutates schedule entries. It
//! answers "what is due now", hands due entries out exactly once, and turns
//! poll outcomes into the next poll time.

use chrono::{DateTime, Utc};
use drydock_core::Clock;
use drydock_core::domain::schedule::{
    BackoffStrategy, EntryState, PollOutcome, PollTarget, ScheduleEntry,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};

/// Schedule entries for the global sweep and every overridden workload
pub struct PollingScheduler {
    entries: Mutex<HashMap<PollTarget, ScheduleEntry>>,
    clock: Arc<dyn Clock>,
    backoff: BackoffStrategy,
}

impl PollingScheduler {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_backoff(clock, BackoffStrategy::default())
    }

    pub fn with_backoff(clock: Arc<dyn Clock>, backoff: BackoffStrategy) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
            backoff,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PollTarget, ScheduleEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Creates or updates the entry for `target`
    ///
    /// A new entry is due immediately. Shortening the interval of an
    /// existing entry pulls its next poll forward so the new cadence takes
    /// effect without waiting out the old one.
    pub fn upsert(&self, target: PollTarget, interval: Duration) {
        let now = self.clock.now();
        let mut entries = self.lock();

        match entries.get_mut(&target) {
            Some(entry) if entry.interval == interval => {}
            Some(entry) => {
                debug!(
                    target = %target,
                    from = ?entry.interval,
                    to = ?interval,
                    "Schedule interval changed"
                );
                entry.interval = interval;
                if let Some(last) = entry.last_poll_time {
                    let earliest = add(last, interval);
                    if earliest < entry.next_poll_time {
                        entry.next_poll_time = earliest;
                    }
                }
            }
            None => {
                debug!(target = %target, interval = ?interval, "Schedule entry created");
                entries.insert(target.clone(), ScheduleEntry::new(target, interval, now));
            }
        }
    }

    /// Deletes the entry for `target`; absent targets are ignored
    pub fn remove(&self, target: &PollTarget) -> bool {
        let removed = self.lock().remove(target).is_some();
        if removed {
            debug!(target = %target, "Schedule entry removed");
        }
        removed
    }

    /// Idle entries whose next poll time has passed, oldest due first
    pub fn due_entries(&self, now: DateTime<Utc>) -> Vec<ScheduleEntry> {
        let entries = self.lock();
        let mut due: Vec<ScheduleEntry> = entries
            .values()
            .filter(|entry| entry.is_due(now))
            .cloned()
            .collect();
        sort_by_due(&mut due);
        due
    }

    /// Like `due_entries`, but marks every returned entry in flight
    ///
    /// A claimed entry is not returned again until its outcome is recorded
    /// or it is released, so overlapping ticks never double-submit.
    pub fn claim_due(&self, now: DateTime<Utc>) -> Vec<ScheduleEntry> {
        let mut entries = self.lock();
        let mut due = Vec::new();
        for entry in entries.values_mut().filter(|entry| entry.is_due(now)) {
            entry.state = EntryState::InFlight;
            due.push(entry.clone());
        }
        sort_by_due(&mut due);
        due
    }

    /// Returns a claimed entry to idle without recording an attempt
    pub fn release(&self, target: &PollTarget) {
        if let Some(entry) = self.lock().get_mut(target) {
            entry.state = EntryState::Idle;
        }
    }

    /// Records the result of an attempt and schedules the next one
    ///
    /// `scheduled_with` is the interval the attempt was claimed with. If the
    /// entry was retuned while the task ran, the new interval wins. An entry
    /// removed while its task was running stays removed.
    pub fn record_outcome(
        &self,
        target: &PollTarget,
        outcome: &PollOutcome,
        scheduled_with: Duration,
    ) {
        let now = self.clock.now();
        let mut entries = self.lock();

        let Some(entry) = entries.get_mut(target) else {
            debug!(target = %target, "Outcome for unknown schedule entry ignored");
            return;
        };

        let interval = entry.interval;
        if interval != scheduled_with {
            debug!(
                target = %target,
                scheduled_with = ?scheduled_with,
                current = ?interval,
                "Entry retuned while polling"
            );
        }

        entry.state = EntryState::Idle;
        entry.last_poll_time = Some(now);
        entry.last_poll_duration_ms =
            Some(u64::try_from(outcome.duration.as_millis()).unwrap_or(u64::MAX));

        if outcome.success {
            entry.consecutive_failures = 0;
            entry.last_success_time = Some(now);
            entry.last_error = None;
            entry.next_poll_time = add(now, interval);
        } else {
            entry.consecutive_failures = entry.consecutive_failures.saturating_add(1);
            entry.last_error = outcome.error.clone();
            let delay = self.backoff.delay(interval, entry.consecutive_failures);
            entry.next_poll_time = add(now, delay);
            warn!(
                target = %target,
                failures = entry.consecutive_failures,
                retry_in = ?delay,
                error = outcome.error.as_deref().unwrap_or("unknown"),
                "Poll attempt failed"
            );
        }
    }

    /// Number of entries, the global one included
    pub fn size(&self) -> usize {
        self.lock().len()
    }

    pub fn get(&self, target: &PollTarget) -> Option<ScheduleEntry> {
        self.lock().get(target).cloned()
    }

    /// Snapshot of every entry ordered by next poll time
    pub fn entries(&self) -> Vec<ScheduleEntry> {
        let mut all: Vec<ScheduleEntry> = self.lock().values().cloned().collect();
        sort_by_due(&mut all);
        all
    }

    pub fn targets(&self) -> Vec<PollTarget> {
        self.lock().keys().cloned().collect()
    }

    pub fn backoff(&self) -> BackoffStrategy {
        self.backoff
    }
}

fn sort_by_due(entries: &mut [ScheduleEntry]) {
    entries.sort_by(|a, b| {
        a.next_poll_time
            .cmp(&b.next_poll_time)
            .then_with(|| a.target.cmp(&b.target))
    });
}

fn add(instant: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(by)
        .ok()
        .and_then(|by| instant.checked_add_signed(by))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
