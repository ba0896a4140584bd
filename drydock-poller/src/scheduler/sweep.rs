//! Per-tick sweep accounting
//!
//! Tasks of one tick complete independently on the workers. The tracker
//! folds their outcomes together and logs the tick's totals once the last
//! one reports.

use drydock_core::domain::schedule::{PollOutcome, SweepSummary};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Instant;
use tracing::info;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickTotals {
    pub summary: SweepSummary,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
}

pub struct SweepTracker {
    tick: u64,
    remaining: AtomicUsize,
    totals: Mutex<TickTotals>,
    started: Instant,
}

impl SweepTracker {
    pub fn new(tick: u64, tasks: usize) -> Self {
        Self {
            tick,
            remaining: AtomicUsize::new(tasks),
            totals: Mutex::new(TickTotals::default()),
            started: Instant::now(),
        }
    }

    /// Folds in one task's outcome
    ///
    /// Returns the tick's totals when this was the last task.
    pub fn finish(&self, outcome: &PollOutcome) -> Option<TickTotals> {
        let totals = {
            let mut totals = self.totals.lock().unwrap_or_else(PoisonError::into_inner);
            totals.summary.merge(&outcome.summary);
            if outcome.cancelled {
                totals.cancelled += 1;
            } else if outcome.success {
                totals.succeeded += 1;
            } else {
                totals.failed += 1;
            }
            *totals
        };

        if self.remaining.fetch_sub(1, Ordering::AcqRel) != 1 {
            return None;
        }

        info!(
            tick = self.tick,
            tasks = totals.succeeded + totals.failed + totals.cancelled,
            failed = totals.failed,
            cancelled = totals.cancelled,
            checked = totals.summary.checked,
            updates = totals.summary.updates_available,
            errors = totals.summary.errors,
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            "Poll sweep finished"
        );
        Some(totals)
    }
}
