//! Compensating deletes
//!
//! All deletes are issued at once and awaited together; one failure never
//! prevents the others from being attempted. No retries happen here.

use futures::future::join_all;
use futures::FutureExt;
use profsync_types::{DeleteOutcome, ReconciliationResult, StorageGateway, UploadedAsset};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Best-effort deletion of already-uploaded assets
#[derive(Clone)]
pub struct RollbackEngine {
    gateway: Arc<dyn StorageGateway>,
}

impl std::fmt::Debug for RollbackEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RollbackEngine").finish_non_exhaustive()
    }
}

impl RollbackEngine {
    /// Create engine over a gateway
    #[inline]
    #[must_use]
    pub fn new(gateway: Arc<dyn StorageGateway>) -> Self {
        Self { gateway }
    }

    /// Delete every asset, independently, and report what happened
    ///
    /// Takes ownership: the assets are gone (or orphaned) afterwards.
    pub async fn undo(&self, assets: Vec<UploadedAsset>) -> ReconciliationResult {
        if assets.is_empty() {
            return ReconciliationResult::default();
        }
        tracing::info!(count = assets.len(), "rolling back uploaded assets");

        let deletes = assets.into_iter().map(|asset| {
            let gateway = &self.gateway;
            async move {
                let outcome = AssertUnwindSafe(async { gateway.delete(&asset.remote_id).await })
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| DeleteOutcome::failed("delete panicked"));
                if let DeleteOutcome::Failed { reason } = &outcome {
                    tracing::warn!(
                        remote_id = %asset.remote_id,
                        url = %asset.url,
                        reason = %reason,
                        "rollback delete failed, asset orphaned"
                    );
                }
                (asset.remote_id, outcome)
            }
        });
        let result = ReconciliationResult::from_outcomes(join_all(deletes).await);

        tracing::debug!(
            deleted = result.succeeded().len(),
            already_absent = result.not_found().len(),
            failed = result.failed().len(),
            "rollback reconciled"
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mockall::predicate::eq;
    use profsync_types::{
        Asset, EntityId, PendingEdit, RemoteId, UploadError, WriteAck, WriteError,
    };

    mockall::mock! {
        Gateway {}

        #[async_trait]
        impl StorageGateway for Gateway {
            async fn write(&self, entity: &EntityId, edit: PendingEdit) -> Result<WriteAck, WriteError>;
            async fn upload(&self, asset: &Asset) -> Result<UploadedAsset, UploadError>;
            async fn delete(&self, remote_id: &RemoteId) -> DeleteOutcome;
        }
    }

    fn uploaded(id: &str) -> UploadedAsset {
        UploadedAsset::new(id, format!("https://cdn.test/{id}"))
    }

    #[tokio::test]
    async fn empty_undo_makes_no_calls() {
        let mut gateway = MockGateway::new();
        gateway.expect_delete().never();
        let engine = RollbackEngine::new(Arc::new(gateway));

        let result = engine.undo(Vec::new()).await;

        assert!(result.is_clean());
        assert_eq!(result.attempted(), 0);
    }

    #[tokio::test]
    async fn one_failure_does_not_block_the_rest() {
        let mut gateway = MockGateway::new();
        gateway
            .expect_delete()
            .with(eq(RemoteId::new("a")))
            .times(1)
            .returning(|_| DeleteOutcome::failed("permission denied"));
        gateway
            .expect_delete()
            .with(eq(RemoteId::new("b")))
            .times(1)
            .returning(|_| DeleteOutcome::Deleted);
        gateway
            .expect_delete()
            .with(eq(RemoteId::new("c")))
            .times(1)
            .returning(|_| DeleteOutcome::Deleted);
        let engine = RollbackEngine::new(Arc::new(gateway));

        let result = engine
            .undo(vec![uploaded("a"), uploaded("b"), uploaded("c")])
            .await;

        assert_eq!(result.succeeded(), &[RemoteId::new("b"), RemoteId::new("c")]);
        assert_eq!(result.failed().len(), 1);
        assert_eq!(result.failed()[0].remote_id, RemoteId::new("a"));
        assert_eq!(result.failed()[0].reason, "permission denied");
    }

    #[tokio::test]
    async fn already_absent_asset_reports_success() {
        let mut gateway = MockGateway::new();
        gateway
            .expect_delete()
            .times(1)
            .returning(|_| DeleteOutcome::NotFound);
        let engine = RollbackEngine::new(Arc::new(gateway));

        let result = engine.undo(vec![uploaded("gone")]).await;

        assert!(result.is_clean());
        assert_eq!(result.succeeded(), &[RemoteId::new("gone")]);
        assert_eq!(result.not_found(), &[RemoteId::new("gone")]);
    }

    #[tokio::test]
    async fn panicking_delete_is_an_orphan_not_a_crash() {
        let gateway = Arc::new(profsync_test_utils::ScriptedGateway::new());
        gateway.seed_asset("x");
        gateway.seed_asset("y");
        gateway.panic_on_delete("x");
        let engine = RollbackEngine::new(Arc::clone(&gateway) as Arc<dyn StorageGateway>);

        let result = engine.undo(vec![uploaded("x"), uploaded("y")]).await;

        assert_eq!(result.succeeded(), &[RemoteId::new("y")]);
        assert_eq!(result.failed().len(), 1);
        assert_eq!(result.failed()[0].remote_id, RemoteId::new("x"));
        assert_eq!(result.failed()[0].reason, "delete panicked");
        assert_eq!(gateway.stored().len(), 1);
    }
}
