//! Image check executor
//!
//! Runs a poll task: resolves the remote digest of every image through the
//! coordinator and the cache, and reports images whose digest moved.

use anyhow::Result;
use async_trait::async_trait;
use drydock_core::Clock;
use drydock_core::domain::image::ImageReference;
use drydock_core::domain::schedule::SweepSummary;
use drydock_registry::DigestLookup;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cache::{CacheKey, DigestCache};
use crate::coordinator::{BatchCoordinator, LookupError};
use crate::service::{CredentialStore, ImageUpdate, UpdateSink};
use crate::worker::{ImageCheck, PollTask, SweepFailed, TaskExecutor};

/// Coordinator shared by every lookup of the engine
pub type LookupCoordinator = BatchCoordinator<CacheKey, Result<String, LookupError>>;

/// `TaskExecutor` that checks images against their registries
pub struct ImageCheckExecutor {
    registry: Arc<dyn DigestLookup>,
    credentials: Arc<dyn CredentialStore>,
    cache: Arc<DigestCache>,
    coordinator: Arc<LookupCoordinator>,
    updates: Arc<dyn UpdateSink>,
    clock: Arc<dyn Clock>,
}

impl ImageCheckExecutor {
    pub fn new(
        registry: Arc<dyn DigestLookup>,
        credentials: Arc<dyn CredentialStore>,
        cache: Arc<DigestCache>,
        coordinator: Arc<LookupCoordinator>,
        updates: Arc<dyn UpdateSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            registry,
            credentials,
            cache,
            coordinator,
            updates,
            clock,
        }
    }

    /// Remote digest of `image`, from the cache when fresh
    ///
    /// Concurrent resolutions of the same image and identity share one
    /// registry call.
    pub async fn resolve(&self, image: &ImageReference) -> Result<String, LookupError> {
        let credentials = self.credentials.credentials_for(&image.registry);
        let key = CacheKey::new(image, credentials.as_ref());
        let lookup_key = key.clone();
        let credentials = credentials.as_ref();

        self.coordinator
            .run(key, move || async move {
                if let Some(digest) = self.cache.get(&lookup_key) {
                    debug!(image = %image, "Digest cache hit");
                    return Ok(digest);
                }

                let digest = self
                    .registry
                    .lookup_digest(image, credentials)
                    .await
                    .map_err(LookupError::from)?;
                self.cache.put(lookup_key, digest.clone());
                Ok::<String, LookupError>(digest)
            })
            .await
    }

    async fn check(&self, check: &ImageCheck, summary: &mut SweepSummary) -> Option<LookupError> {
        let image = match check.parsed() {
            Ok(image) => image,
            Err(e) => {
                warn!(
                    workload = %check.workload,
                    reference = %check.reference,
                    "Invalid image reference: {}", e
                );
                summary.errors += 1;
                return Some(LookupError::new(e.to_string(), false));
            }
        };

        if image.is_digest_pinned() {
            debug!(image = %image, "Skipping digest-pinned image");
            return None;
        }

        let remote = match self.resolve(&image).await {
            Ok(remote) => remote,
            Err(e) => {
                warn!(
                    workload = %check.workload,
                    image = %image,
                    transient = e.transient,
                    "Digest lookup failed: {}", e
                );
                summary.errors += 1;
                return Some(e);
            }
        };
        summary.checked += 1;

        if let Some(current) = check.current_digest.as_deref().filter(|c| *c != remote) {
            summary.updates_available += 1;
            let update = ImageUpdate {
                workload: check.workload.clone(),
                image: image.to_string(),
                current_digest: current.to_string(),
                remote_digest: remote,
                detected_at: self.clock.now(),
            };
            self.updates.update_available(&update).await;
        }

        None
    }
}

#[async_trait]
impl TaskExecutor for ImageCheckExecutor {
    /// Checks every image of the task
    ///
    /// The task fails only when every image it tried to check failed; a
    /// single bad image in a large sweep is counted, not fatal.
    async fn execute(&self, task: &PollTask) -> Result<SweepSummary> {
        let mut summary = SweepSummary::default();
        let mut last_error = None;

        for check in &task.images {
            if let Some(e) = self.check(check, &mut summary).await {
                last_error = Some(e);
            }
        }

        info!(
            target = %task.target,
            checked = summary.checked,
            updates = summary.updates_available,
            errors = summary.errors,
            "Poll task finished"
        );

        match last_error {
            Some(e) if summary.checked == 0 => Err(SweepFailed {
                message: format!("all {} image lookups failed: {}", summary.errors, e),
                summary,
            }
            .into()),
            _ => Ok(summary),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::StaticCredentials;
    use drydock_core::FakeClock;
    use drydock_core::domain::image::RegistryCredentials;
    use drydock_core::domain::schedule::PollTarget;
    use drydock_core::domain::workload::WorkloadId;
    use drydock_registry::RegistryError;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct FakeRegistry {
        digests: Mutex<HashMap<String, String>>,
        calls: AtomicUsize,
        seen_users: Mutex<Vec<Option<String>>>,
        delay: Option<Duration>,
    }

    impl FakeRegistry {
        fn with(entries: &[(&str, &str)]) -> Self {
            let registry = Self::default();
            for (image, digest) in entries {
                registry.set(image, digest);
            }
            registry
        }

        fn set(&self, image: &str, digest: &str) {
            let image = ImageReference::parse(image).unwrap().to_string();
            self.digests.lock().unwrap().insert(image, digest.to_string());
        }
    }

    #[async_trait]
    impl DigestLookup for FakeRegistry {
        async fn lookup_digest(
            &self,
            image: &ImageReference,
            credentials: Option<&RegistryCredentials>,
        ) -> drydock_registry::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen_users
                .lock()
                .unwrap()
                .push(credentials.map(|c| c.username.clone()));
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.digests
                .lock()
                .unwrap()
                .get(&image.to_string())
                .cloned()
                .ok_or_else(|| RegistryError::status(503, "unavailable"))
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        updates: Mutex<Vec<ImageUpdate>>,
    }

    #[async_trait]
    impl UpdateSink for RecordingSink {
        async fn update_available(&self, update: &ImageUpdate) {
            self.updates.lock().unwrap().push(update.clone());
        }
    }

    struct Harness {
        executor: Arc<ImageCheckExecutor>,
        registry: Arc<FakeRegistry>,
        cache: Arc<DigestCache>,
        sink: Arc<RecordingSink>,
        clock: FakeClock,
    }

    fn harness(registry: FakeRegistry, credentials: StaticCredentials) -> Harness {
        let clock = FakeClock::new();
        let registry = Arc::new(registry);
        let cache = Arc::new(DigestCache::new(
            Duration::from_secs(300),
            100,
            Arc::new(clock.clone()),
        ));
        let sink = Arc::new(RecordingSink::default());
        let executor = Arc::new(ImageCheckExecutor::new(
            registry.clone(),
            Arc::new(credentials),
            Arc::clone(&cache),
            Arc::new(LookupCoordinator::new()),
            sink.clone(),
            Arc::new(clock.clone()),
        ));
        Harness {
            executor,
            registry,
            cache,
            sink,
            clock,
        }
    }

    fn check(workload: &str, reference: &str, current: Option<&str>) -> ImageCheck {
        ImageCheck {
            workload: WorkloadId::new(workload),
            reference: reference.to_string(),
            current_digest: current.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_detects_update_and_caches_digest() {
        let h = harness(
            FakeRegistry::with(&[("nginx:1.25", "sha256:new"), ("redis:7", "sha256:same")]),
            StaticCredentials::new(),
        );
        let task = PollTask::new(
            PollTarget::Global,
            vec![
                check("web", "nginx:1.25", Some("sha256:old")),
                check("cache", "redis:7", Some("sha256:same")),
            ],
        );

        let summary = h.executor.execute(&task).await.unwrap();
        assert_eq!(summary.checked, 2);
        assert_eq!(summary.updates_available, 1);
        assert_eq!(summary.errors, 0);

        let updates = h.sink.updates.lock().unwrap().clone();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].workload, WorkloadId::new("web"));
        assert_eq!(updates[0].remote_digest, "sha256:new");

        // Second run within the TTL is served from the cache
        h.executor.execute(&task).await.unwrap();
        assert_eq!(h.registry.calls.load(Ordering::SeqCst), 2);
        assert_eq!(h.cache.stats().hits, 2);
    }

    #[tokio::test]
    async fn test_expired_cache_goes_back_to_registry() {
        let h = harness(FakeRegistry::with(&[("nginx", "sha256:a")]), StaticCredentials::new());
        let task = PollTask::new(PollTarget::Global, vec![check("web", "nginx", None)]);

        h.executor.execute(&task).await.unwrap();
        h.clock.advance(Duration::from_secs(301));
        h.executor.execute(&task).await.unwrap();

        assert_eq!(h.registry.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unknown_current_digest_is_not_an_update() {
        let h = harness(FakeRegistry::with(&[("nginx", "sha256:a")]), StaticCredentials::new());
        let task = PollTask::new(PollTarget::Global, vec![check("web", "nginx", None)]);

        let summary = h.executor.execute(&task).await.unwrap();
        assert_eq!(summary.checked, 1);
        assert_eq!(summary.updates_available, 0);
    }

    #[tokio::test]
    async fn test_digest_pinned_images_are_skipped() {
        let h = harness(FakeRegistry::default(), StaticCredentials::new());
        let pinned = format!("nginx@sha256:{}", "a".repeat(64));
        let task = PollTask::new(PollTarget::Global, vec![check("web", &pinned, None)]);

        let summary = h.executor.execute(&task).await.unwrap();
        assert_eq!(summary, SweepSummary::default());
        assert_eq!(h.registry.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_partial_failure_still_succeeds() {
        let h = harness(FakeRegistry::with(&[("nginx", "sha256:a")]), StaticCredentials::new());
        let task = PollTask::new(
            PollTarget::Global,
            vec![check("web", "nginx", None), check("db", "postgres:16", None)],
        );

        let summary = h.executor.execute(&task).await.unwrap();
        assert_eq!(summary.checked, 1);
        assert_eq!(summary.errors, 1);
    }

    #[tokio::test]
    async fn test_all_lookups_failing_fails_the_task() {
        let h = harness(FakeRegistry::default(), StaticCredentials::new());
        let task = PollTask::new(
            PollTarget::workload("db"),
            vec![check("db", "postgres:16", None), check("db", "not a ref", None)],
        );

        let err = h.executor.execute(&task).await.unwrap_err();
        let failed = err.downcast_ref::<SweepFailed>().unwrap();
        assert_eq!(failed.summary.errors, 2);
        assert!(failed.message.contains("all 2 image lookups failed"));
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let h = harness(FakeRegistry::default(), StaticCredentials::new());
        let task = PollTask::new(PollTarget::Global, vec![check("db", "postgres:16", None)]);

        assert!(h.executor.execute(&task).await.is_err());
        h.registry.set("postgres:16", "sha256:p");
        assert!(h.executor.execute(&task).await.is_ok());
        assert_eq!(h.cache.size(), 1);
    }

    #[tokio::test]
    async fn test_credentials_are_used_for_their_registry() {
        let credentials =
            StaticCredentials::new().with("ghcr.io", RegistryCredentials::new("bot", "pw"));
        let h = harness(
            FakeRegistry::with(&[("ghcr.io/org/app:1", "sha256:x"), ("nginx", "sha256:n")]),
            credentials,
        );
        let task = PollTask::new(
            PollTarget::Global,
            vec![check("app", "ghcr.io/org/app:1", None), check("web", "nginx", None)],
        );

        h.executor.execute(&task).await.unwrap();

        let users = h.registry.seen_users.lock().unwrap().clone();
        assert_eq!(users, vec![Some("bot".to_string()), None]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_overlapping_tasks_share_registry_calls() {
        let registry = FakeRegistry {
            delay: Some(Duration::from_millis(100)),
            ..FakeRegistry::default()
        };
        registry.set("nginx:1.25", "sha256:n");
        let h = harness(registry, StaticCredentials::new());

        // The global sweep and a workload entry checking the same image
        let global = PollTask::new(PollTarget::Global, vec![check("web", "nginx:1.25", None)]);
        let own = PollTask::new(
            PollTarget::workload("web"),
            vec![check("web", "nginx:1.25", None)],
        );

        let (a, b) = tokio::join!(h.executor.execute(&global), h.executor.execute(&own));
        assert_eq!(a.unwrap().checked, 1);
        assert_eq!(b.unwrap().checked, 1);
        assert_eq!(h.registry.calls.load(Ordering::SeqCst), 1);
    }
}
