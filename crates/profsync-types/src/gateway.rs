//! Remote store abstraction
//!
//! The coordinators are transport-agnostic: everything remote goes through
//! [`StorageGateway`]. Implementations convert their own failures into the
//! typed results below and must not panic.

use crate::asset::{Asset, UploadedAsset};
use crate::edit::{PendingEdit, WriteAck};
use crate::error::{UploadError, WriteError};
use crate::id::{EntityId, RemoteId};
use crate::reconcile::DeleteOutcome;
use async_trait::async_trait;

/// Remote profile store and object store
#[async_trait]
pub trait StorageGateway: Send + Sync {
    /// Write a partial profile. Not assumed idempotent.
    async fn write(&self, entity: &EntityId, edit: PendingEdit) -> Result<WriteAck, WriteError>;

    /// Upload one asset
    async fn upload(&self, asset: &Asset) -> Result<UploadedAsset, UploadError>;

    /// Delete one asset. All outcomes are data.
    async fn delete(&self, remote_id: &RemoteId) -> DeleteOutcome;
}
