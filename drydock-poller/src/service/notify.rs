//! Update notifications
//!
//! The executor reports every image whose remote digest differs from what
//! the workload runs. Delivery (webhooks, mail, the UI) sits behind
//! `UpdateSink`; the bundled sink logs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use drydock_core::domain::workload::WorkloadId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info};

/// A newer image is available for a workload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageUpdate {
    pub workload: WorkloadId,
    /// Normalised image reference
    pub image: String,
    pub current_digest: String,
    pub remote_digest: String,
    pub detected_at: DateTime<Utc>,
}

/// Receives detected updates
#[async_trait]
pub trait UpdateSink: Send + Sync {
    async fn update_available(&self, update: &ImageUpdate);
}

/// Logs each update once per remote digest
///
/// The global sweep and a workload's own schedule both detect the same
/// update on every poll until the workload is redeployed; only the first
/// detection of a given remote digest is logged at info.
#[derive(Default)]
pub struct LoggingUpdateSink {
    announced: Mutex<HashMap<(WorkloadId, String), String>>,
}

impl LoggingUpdateSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct updates announced so far
    pub fn announced(&self) -> usize {
        self.announced
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl UpdateSink for LoggingUpdateSink {
    async fn update_available(&self, update: &ImageUpdate) {
        let key = (update.workload.clone(), update.image.clone());
        let previous = self
            .announced
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, update.remote_digest.clone());

        if previous.as_deref() == Some(update.remote_digest.as_str()) {
            debug!(workload = %update.workload, image = %update.image, "Update already announced");
            return;
        }

        info!(
            workload = %update.workload,
            image = %update.image,
            current = %update.current_digest,
            remote = %update.remote_digest,
            "Image update available"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(remote: &str) -> ImageUpdate {
        ImageUpdate {
            workload: WorkloadId::new("web"),
            image: "docker.io/library/nginx:1.25".to_string(),
            current_digest: "sha256:old".to_string(),
            remote_digest: remote.to_string(),
            detected_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_repeated_update_is_announced_once() {
        let sink = LoggingUpdateSink::new();
        sink.update_available(&update("sha256:new")).await;
        sink.update_available(&update("sha256:new")).await;
        assert_eq!(sink.announced(), 1);

        // A newer push replaces the announced digest
        sink.update_available(&update("sha256:newer")).await;
        assert_eq!(sink.announced(), 1);
    }
}
