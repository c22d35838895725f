//! In-process storage backend
//!
//! Used when the storage mode is `local`. Profiles and assets live in
//! memory only and are lost when the process exits.

use async_trait::async_trait;
use dashmap::DashMap;
use profsync_types::{
    Asset, DeleteOutcome, EntityId, MediaType, PendingEdit, RemoteId, StorageGateway,
    UploadError, UploadedAsset, WriteAck, WriteError,
};
use std::sync::atomic::{AtomicU64, Ordering};

/// Metadata kept for a locally stored asset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredAsset {
    /// Original asset name
    pub name: String,
    /// Media type at upload time
    pub media_type: MediaType,
    /// Content length
    pub size: u64,
}

/// Memory-backed [`StorageGateway`]
#[derive(Debug, Default)]
pub struct LocalStore {
    profiles: DashMap<EntityId, PendingEdit>,
    assets: DashMap<RemoteId, StoredAsset>,
    revision: AtomicU64,
}

impl LocalStore {
    /// Empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written for an entity so far
    #[must_use]
    pub fn profile(&self, entity: &EntityId) -> Option<PendingEdit> {
        self.profiles.get(entity).map(|p| p.value().clone())
    }

    /// Stored asset metadata
    #[must_use]
    pub fn asset(&self, remote_id: &RemoteId) -> Option<StoredAsset> {
        self.assets.get(remote_id).map(|a| a.value().clone())
    }

    /// Number of stored assets
    #[must_use]
    pub fn asset_count(&self) -> usize {
        self.assets.len()
    }
}

#[async_trait]
impl StorageGateway for LocalStore {
    async fn write(&self, entity: &EntityId, edit: PendingEdit) -> Result<WriteAck, WriteError> {
        self.profiles.entry(entity.clone()).or_default().merge(edit);
        let revision = self.revision.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(WriteAck::new(entity.clone()).with_revision(revision.to_string()))
    }

    async fn upload(&self, asset: &Asset) -> Result<UploadedAsset, UploadError> {
        let remote_id = RemoteId::new(uuid::Uuid::new_v4().to_string());
        self.assets.insert(
            remote_id.clone(),
            StoredAsset {
                name: asset.name.clone(),
                media_type: asset.media_type.clone(),
                size: asset.actual_size(),
            },
        );
        tracing::trace!(%remote_id, name = %asset.name, "asset stored locally");
        let url = format!("local://assets/{remote_id}");
        Ok(UploadedAsset::new(remote_id, url))
    }

    async fn delete(&self, remote_id: &RemoteId) -> DeleteOutcome {
        match self.assets.remove(remote_id) {
            Some(_) => DeleteOutcome::Deleted,
            None => DeleteOutcome::NotFound,
        }
    }
}
