//! Request coalescing
//!
//! `BatchCoordinator` collapses concurrent calls that share a key into a
//! single execution (single-flight). The first caller for a key becomes the
//! leader and runs the work; callers arriving while it runs subscribe to a
//! broadcast channel and receive a clone of the leader's result.
//!
//! Results are never remembered: once the leader finishes, the key is
//! cleared before anyone sees the value, and the next call runs again.
//! Caching is the digest cache's job.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::debug;

/// Error shared between a leader and its coalesced waiters
///
/// Registry errors are not `Clone`, so lookups are flattened into this
/// before being broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct LookupError {
    pub message: String,
    /// Whether retrying later may succeed
    pub transient: bool,
}

impl LookupError {
    pub fn new(message: impl Into<String>, transient: bool) -> Self {
        Self {
            message: message.into(),
            transient,
        }
    }
}

impl From<drydock_registry::RegistryError> for LookupError {
    fn from(err: drydock_registry::RegistryError) -> Self {
        Self {
            transient: err.is_transient(),
            message: err.to_string(),
        }
    }
}

/// Single-flight executor keyed by `K`
pub struct BatchCoordinator<K, T> {
    in_flight: Mutex<HashMap<K, broadcast::Sender<T>>>,
    executions: AtomicU64,
    coalesced: AtomicU64,
}

enum Role<T> {
    Leader(broadcast::Sender<T>),
    Waiter(broadcast::Receiver<T>),
}

impl<K, T> BatchCoordinator<K, T>
where
    K: Eq + Hash + Clone + fmt::Display,
    T: Clone,
{
    pub fn new() -> Self {
        Self {
            in_flight: Mutex::new(HashMap::new()),
            executions: AtomicU64::new(0),
            coalesced: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<K, broadcast::Sender<T>>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `work` for `key` unless a run for the same key is already in
    /// flight, in which case the caller waits for that run's result
    ///
    /// If a leader is dropped before finishing (its caller was cancelled),
    /// one of the waiters takes over and runs `work` itself.
    pub async fn run<F, Fut>(&self, key: K, work: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let tx = loop {
            let role = match self.lock().entry(key.clone()) {
                Entry::Occupied(entry) => Role::Waiter(entry.get().subscribe()),
                Entry::Vacant(entry) => {
                    let (tx, _) = broadcast::channel(1);
                    entry.insert(tx.clone());
                    Role::Leader(tx)
                }
            };

            match role {
                Role::Leader(tx) => break tx,
                Role::Waiter(mut rx) => {
                    self.coalesced.fetch_add(1, Ordering::Relaxed);
                    debug!(key = %key, "Joining in-flight lookup");
                    if let Ok(value) = rx.recv().await {
                        return value;
                    }
                    // Leader went away without a result; try to lead
                }
            }
        };

        let guard = FlightGuard {
            coordinator: self,
            key: &key,
            tx: &tx,
        };
        self.executions.fetch_add(1, Ordering::Relaxed);

        let value = work().await;

        drop(guard);
        let _ = tx.send(value.clone());
        value
    }

    /// Number of keys with a run in flight
    pub fn in_flight(&self) -> usize {
        self.lock().len()
    }

    /// Number of times the work actually ran
    pub fn executions(&self) -> u64 {
        self.executions.load(Ordering::Relaxed)
    }

    /// Number of callers that were served by another caller's run
    pub fn coalesced(&self) -> u64 {
        self.coalesced.load(Ordering::Relaxed)
    }
}

impl<K, T> Default for BatchCoordinator<K, T>
where
    K: Eq + Hash + Clone + fmt::Display,
    T: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Clears the in-flight marker when the leader finishes or is dropped
struct FlightGuard<'a, K, T>
where
    K: Eq + Hash,
{
    coordinator: &'a BatchCoordinator<K, T>,
    key: &'a K,
    tx: &'a broadcast::Sender<T>,
}

impl<K, T> Drop for FlightGuard<'_, K, T>
where
    K: Eq + Hash,
{
    fn drop(&mut self) {
        let mut in_flight = self
            .coordinator
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if in_flight
            .get(self.key)
            .is_some_and(|tx| tx.same_channel(self.tx))
        {
            in_flight.remove(self.key);
        }
    }
}
