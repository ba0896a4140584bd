//! Polling health evaluation
//!
//! Judges a `PollingSnapshot` against fixed thresholds. The thresholds live
//! here, with the reporter, not in the components being reported on.

use chrono::{DateTime, Duration, Utc};
use drydock_core::dto::health::{HealthReport, HealthStatus};
use drydock_core::dto::polling::PollingSnapshot;

/// Limits beyond which the polling engine is reported unhealthy
#[derive(Debug, Clone, Copy)]
pub struct HealthThresholds {
    /// Queue depth above which polling is degraded
    pub max_queue_depth: usize,

    /// Consecutive failures of one entry above which polling is degraded
    pub degraded_failures: u32,

    /// Consecutive failures of one entry above which polling is unhealthy
    pub unhealthy_failures: u32,

    /// Cache fill ratio above which a warning is raised
    pub cache_fill_warning: f64,

    /// Longest acceptable time without any successful poll
    pub max_success_age: Duration,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            max_queue_depth: 50,
            degraded_failures: 5,
            unhealthy_failures: 10,
            cache_fill_warning: 0.9,
            max_success_age: Duration::hours(2),
        }
    }
}

impl HealthThresholds {
    /// Evaluates `snapshot`
    ///
    /// `running_since` stands in for the last success when nothing has
    /// succeeded yet, so a freshly started engine is not flagged.
    pub fn evaluate(
        &self,
        snapshot: &PollingSnapshot,
        running_since: DateTime<Utc>,
    ) -> HealthReport {
        let mut report = HealthReport::healthy();

        if snapshot.queue_size > self.max_queue_depth {
            report.flag(
                HealthStatus::Degraded,
                format!(
                    "Poll queue depth {} exceeds {}",
                    snapshot.queue_size, self.max_queue_depth
                ),
            );
        }

        if let Some(worst) = snapshot
            .entries
            .iter()
            .max_by_key(|entry| entry.consecutive_failures)
        {
            let failures = worst.consecutive_failures;
            if failures > self.unhealthy_failures {
                report.flag(
                    HealthStatus::Unhealthy,
                    format!("{} failed {} polls in a row", worst.target, failures),
                );
            } else if failures > self.degraded_failures {
                report.flag(
                    HealthStatus::Degraded,
                    format!("{} failed {} polls in a row", worst.target, failures),
                );
            }
        }

        if snapshot.cache.fill_ratio() > self.cache_fill_warning {
            report.flag(
                HealthStatus::Warning,
                format!(
                    "Digest cache at {}/{} entries",
                    snapshot.cache.size, snapshot.cache.max_size
                ),
            );
        }

        // Only meaningful while something is scheduled
        if !snapshot.entries.is_empty() {
            let last_success = snapshot
                .entries
                .iter()
                .filter_map(|entry| entry.last_success_time)
                .max()
                .unwrap_or(running_since);
            let age = snapshot.generated_at - last_success;
            if age > self.max_success_age {
                report.flag(
                    HealthStatus::Degraded,
                    format!("No successful poll for {} minutes", age.num_minutes()),
                );
            }
        }

        report
    }
}
