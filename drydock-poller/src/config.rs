//! Poller configuration
//!
//! Defines the tunables of the polling engine (worker count, queue size,
//! timeouts, cache sizing, backoff) and of the debug server around it.

use drydock_core::domain::schedule::BackoffStrategy;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::scheduler::MIN_POLLING_INTERVAL;

/// Poller configuration
///
/// Everything has a default so the poller starts with no environment at all.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Number of workers executing poll tasks
    pub workers: usize,

    /// Bounded queue size; a full queue suspends the tick
    pub queue_capacity: usize,

    /// Maximum time one poll task may run
    pub task_timeout: Duration,

    /// Maximum time one registry request may take
    pub request_timeout: Duration,

    /// How long a resolved digest is trusted
    pub cache_ttl: Duration,

    /// Maximum number of cached digests
    pub cache_max_size: usize,

    /// No target is polled more often than this
    pub min_interval: Duration,

    /// How failed polls are rescheduled
    pub backoff: BackoffStrategy,

    /// Registries reached over plain HTTP
    pub insecure_registries: Vec<String>,

    /// Address of the debug HTTP server
    pub bind_addr: SocketAddr,

    /// Optional JSON file seeding the in-memory fleet
    pub fleet_file: Option<PathBuf>,
}

impl PollerConfig {
    /// Creates a configuration with defaults
    pub fn new() -> Self {
        Self {
            workers: 4,
            queue_capacity: 100,
            task_timeout: Duration::from_secs(120),
            request_timeout: Duration::from_secs(30),
            cache_ttl: Duration::from_secs(300),
            cache_max_size: 1000,
            min_interval: MIN_POLLING_INTERVAL,
            backoff: BackoffStrategy::FixedInterval,
            insecure_registries: Vec::new(),
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8090)),
            fleet_file: None,
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables (all optional):
    /// - DRYDOCK_WORKERS (default: 4)
    /// - DRYDOCK_QUEUE_CAPACITY (default: 100)
    /// - DRYDOCK_TASK_TIMEOUT (seconds, default: 120)
    /// - DRYDOCK_REQUEST_TIMEOUT (seconds, default: 30)
    /// - DRYDOCK_CACHE_TTL (seconds, default: 300)
    /// - DRYDOCK_CACHE_MAX_SIZE (default: 1000)
    /// - DRYDOCK_MIN_INTERVAL (seconds, default: 300)
    /// - DRYDOCK_BACKOFF (`fixed` or `exponential`, default: fixed)
    /// - DRYDOCK_BACKOFF_MAX (seconds, default: 21600)
    /// - DRYDOCK_INSECURE_REGISTRIES (comma separated)
    /// - DRYDOCK_BIND_ADDR (default: 0.0.0.0:8090)
    /// - DRYDOCK_FLEET_FILE
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds configuration from any key lookup
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::new();

        let number = |key: &str| -> anyhow::Result<Option<u64>> {
            lookup(key)
                .map(|raw| {
                    raw.trim().parse::<u64>().map_err(|_| {
                        anyhow::anyhow!("{} must be a non-negative integer, got '{}'", key, raw)
                    })
                })
                .transpose()
        };
        let seconds = |key: &str, default: Duration| -> anyhow::Result<Duration> {
            Ok(number(key)?.map(Duration::from_secs).unwrap_or(default))
        };

        let backoff_max = seconds("DRYDOCK_BACKOFF_MAX", Duration::from_secs(6 * 60 * 60))?;
        let backoff = match lookup("DRYDOCK_BACKOFF").as_deref().map(str::trim) {
            None | Some("") | Some("fixed") => BackoffStrategy::FixedInterval,
            Some("exponential") => BackoffStrategy::ExponentialBackoff { max: backoff_max },
            Some(other) => anyhow::bail!(
                "DRYDOCK_BACKOFF must be 'fixed' or 'exponential', got '{}'",
                other
            ),
        };

        let bind_addr: SocketAddr = match lookup("DRYDOCK_BIND_ADDR") {
            Some(raw) => raw.trim().parse().map_err(|_| {
                anyhow::anyhow!("DRYDOCK_BIND_ADDR is not a socket address: '{}'", raw)
            })?,
            None => defaults.bind_addr,
        };

        let insecure_registries = lookup("DRYDOCK_INSECURE_REGISTRIES")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            workers: number("DRYDOCK_WORKERS")?
                .map(|n| n as usize)
                .unwrap_or(defaults.workers),
            queue_capacity: number("DRYDOCK_QUEUE_CAPACITY")?
                .map(|n| n as usize)
                .unwrap_or(defaults.queue_capacity),
            task_timeout: seconds("DRYDOCK_TASK_TIMEOUT", defaults.task_timeout)?,
            request_timeout: seconds("DRYDOCK_REQUEST_TIMEOUT", defaults.request_timeout)?,
            cache_ttl: seconds("DRYDOCK_CACHE_TTL", defaults.cache_ttl)?,
            cache_max_size: number("DRYDOCK_CACHE_MAX_SIZE")?
                .map(|n| n as usize)
                .unwrap_or(defaults.cache_max_size),
            min_interval: seconds("DRYDOCK_MIN_INTERVAL", defaults.min_interval)?,
            backoff,
            insecure_registries,
            bind_addr,
            fleet_file: lookup("DRYDOCK_FLEET_FILE")
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
        })
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.workers == 0 {
            anyhow::bail!("workers must be greater than 0");
        }

        if self.queue_capacity == 0 {
            anyhow::bail!("queue_capacity must be greater than 0");
        }

        if self.task_timeout.is_zero() {
            anyhow::bail!("task_timeout must be greater than 0");
        }

        if self.request_timeout.is_zero() {
            anyhow::bail!("request_timeout must be greater than 0");
        }

        if self.request_timeout > self.task_timeout {
            anyhow::bail!("request_timeout cannot exceed task_timeout");
        }

        if self.cache_max_size == 0 {
            anyhow::bail!("cache_max_size must be greater than 0");
        }

        if self.min_interval.is_zero() {
            anyhow::bail!("min_interval must be greater than 0");
        }

        Ok(())
    }
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self::new()
    }
}
