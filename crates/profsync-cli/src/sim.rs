//! Simulated remote store for the `simulate-*` commands

use async_trait::async_trait;
use profsync_core::LocalStore;
use profsync_types::{
    Asset, DeleteOutcome, EntityId, PendingEdit, RemoteId, StorageGateway, UploadError,
    UploadedAsset, WriteAck, WriteError,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// [`LocalStore`] with latency and injected failures
#[derive(Debug, Default)]
pub(crate) struct SimulatedGateway {
    inner: LocalStore,
    latency: Duration,
    failing_writes: AtomicUsize,
    fail_upload_at: Option<usize>,
    uploads: AtomicUsize,
    fail_deletes: bool,
}

impl SimulatedGateway {
    pub(crate) fn new(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    /// The next `count` writes fail as unavailable
    pub(crate) fn with_failing_writes(self, count: usize) -> Self {
        self.failing_writes.store(count, Ordering::SeqCst);
        self
    }

    /// The upload with this zero-based index fails
    pub(crate) fn with_failing_upload(mut self, index: Option<usize>) -> Self {
        self.fail_upload_at = index;
        self
    }

    /// Every delete fails, leaving orphans
    pub(crate) fn with_failing_deletes(mut self, fail: bool) -> Self {
        self.fail_deletes = fail;
        self
    }

    pub(crate) fn store(&self) -> &LocalStore {
        &self.inner
    }

    async fn delay(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

#[async_trait]
impl StorageGateway for SimulatedGateway {
    async fn write(&self, entity: &EntityId, edit: PendingEdit) -> Result<WriteAck, WriteError> {
        self.delay().await;
        let failed = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(WriteError::Unavailable("simulated outage".to_string()));
        }
        self.inner.write(entity, edit).await
    }

    async fn upload(&self, asset: &Asset) -> Result<UploadedAsset, UploadError> {
        self.delay().await;
        let index = self.uploads.fetch_add(1, Ordering::SeqCst);
        if self.fail_upload_at == Some(index) {
            return Err(UploadError::Unavailable("simulated outage".to_string()));
        }
        self.inner.upload(asset).await
    }

    async fn delete(&self, remote_id: &RemoteId) -> DeleteOutcome {
        self.delay().await;
        if self.fail_deletes {
            return DeleteOutcome::failed("simulated outage");
        }
        self.inner.delete(remote_id).await
    }
}
