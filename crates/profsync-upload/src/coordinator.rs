//! Batch upload coordinator
//!
//! Uploads run one after another, so the assets to roll back after a
//! failure are always an exact prefix of the batch.

use crate::policy::AssetPolicy;
use crate::rollback::RollbackEngine;
use futures::FutureExt;
use profsync_types::{
    Asset, BatchId, BatchUploadError, EntityId, EventBus, StorageGateway, SyncEvent, UploadError,
    UploadedAsset,
};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Progress of a running batch
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchProgress {
    /// Batch being uploaded
    pub batch: BatchId,
    /// Assets uploaded so far
    pub completed: usize,
    /// Assets in the batch
    pub total: usize,
}

impl BatchProgress {
    /// Fraction done, 0.0 to 1.0
    #[inline]
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.completed as f64 / self.total as f64
    }
}

/// Drives N uploads as a unit
#[derive(Clone)]
pub struct BatchUploadCoordinator {
    entity: EntityId,
    gateway: Arc<dyn StorageGateway>,
    rollback: RollbackEngine,
    policy: AssetPolicy,
    events: EventBus,
}

impl std::fmt::Debug for BatchUploadCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchUploadCoordinator")
            .field("entity", &self.entity)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl BatchUploadCoordinator {
    /// Create coordinator for one entity's batches
    #[must_use]
    pub fn new(
        entity: EntityId,
        gateway: Arc<dyn StorageGateway>,
        events: EventBus,
        policy: AssetPolicy,
    ) -> Self {
        Self {
            entity,
            rollback: RollbackEngine::new(Arc::clone(&gateway)),
            gateway,
            policy,
            events,
        }
    }

    /// Policy applied before upload
    #[inline]
    #[must_use]
    pub fn policy(&self) -> &AssetPolicy {
        &self.policy
    }

    /// Engine used to undo failed batches
    #[inline]
    #[must_use]
    pub fn rollback_engine(&self) -> &RollbackEngine {
        &self.rollback
    }

    /// Upload `assets` all-or-nothing
    ///
    /// # Errors
    /// - [`BatchUploadError::Validation`] before any upload
    /// - [`BatchUploadError::Upload`] after rolling back earlier uploads
    pub async fn run(&self, assets: Vec<Asset>) -> Result<Vec<UploadedAsset>, BatchUploadError> {
        self.run_with_progress(assets, |_| {}).await
    }

    /// [`Self::run`], reporting progress after each successful upload
    ///
    /// # Errors
    /// See [`Self::run`]
    pub async fn run_with_progress<F>(
        &self,
        assets: Vec<Asset>,
        mut on_progress: F,
    ) -> Result<Vec<UploadedAsset>, BatchUploadError>
    where
        F: FnMut(BatchProgress) + Send,
    {
        if let Err(e) = self.policy.check_batch(&assets) {
            tracing::debug!(entity = %self.entity, error = %e, "batch rejected before upload");
            let err = BatchUploadError::from(e);
            self.publish_failure(None, &err);
            return Err(err);
        }

        let batch = BatchId::new();
        let total = assets.len();
        tracing::info!(entity = %self.entity, batch = %batch, total, "starting upload batch");

        let mut uploaded: Vec<UploadedAsset> = Vec::with_capacity(total);
        for (index, asset) in assets.into_iter().enumerate() {
            let attempt = AssertUnwindSafe(async { self.gateway.upload(&asset).await })
                .catch_unwind()
                .await
                .unwrap_or(Err(UploadError::Aborted));
            match attempt {
                Ok(done) => {
                    tracing::debug!(
                        batch = %batch,
                        index,
                        remote_id = %done.remote_id,
                        "asset uploaded"
                    );
                    uploaded.push(done);

                    let progress = BatchProgress {
                        batch,
                        completed: uploaded.len(),
                        total,
                    };
                    self.events.emit(SyncEvent::UploadProgress {
                        entity: self.entity.clone(),
                        batch,
                        completed: progress.completed,
                        total,
                        fraction: progress.fraction(),
                    });
                    on_progress(progress);
                }
                Err(source) => {
                    tracing::error!(
                        entity = %self.entity,
                        batch = %batch,
                        index,
                        asset = %asset.name,
                        error = %source,
                        "upload failed, rolling back batch"
                    );
                    let reconciliation = self.rollback.undo(uploaded).await;
                    for orphan in reconciliation.failed() {
                        tracing::warn!(batch = %batch, %orphan, "needs out-of-band cleanup");
                    }

                    let err = BatchUploadError::Upload {
                        batch,
                        index,
                        asset: asset.name,
                        source,
                        reconciliation,
                    };
                    self.publish_failure(Some(batch), &err);
                    return Err(err);
                }
            }
        }

        tracing::info!(entity = %self.entity, batch = %batch, total, "upload batch committed");
        Ok(uploaded)
    }

    fn publish_failure(&self, batch: Option<BatchId>, err: &BatchUploadError) {
        self.events.emit(SyncEvent::BatchFailed {
            entity: self.entity.clone(),
            batch,
            reason: err.to_string(),
            orphans: err.orphans().iter().map(|w| w.remote_id.clone()).collect(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use profsync_test_utils::{drain_events, entity, png, ScriptedGateway};
    use profsync_types::{RemoteId, UploadError, ValidationError};

    fn coordinator(gateway: &Arc<ScriptedGateway>, events: &EventBus) -> BatchUploadCoordinator {
        BatchUploadCoordinator::new(
            entity("p1"),
            Arc::clone(gateway) as Arc<dyn StorageGateway>,
            events.clone(),
            AssetPolicy::default(),
        )
    }

    #[tokio::test]
    async fn full_success_commits_all_in_order() {
        let gateway = Arc::new(ScriptedGateway::new());
        let events = EventBus::default();
        let coordinator = coordinator(&gateway, &events);

        let uploaded = coordinator
            .run(vec![png("f1", 4), png("f2", 4), png("f3", 4)])
            .await
            .unwrap();

        let ids: Vec<_> = uploaded.iter().map(|u| u.remote_id.clone()).collect();
        assert_eq!(
            ids,
            vec![
                RemoteId::new("remote-1"),
                RemoteId::new("remote-2"),
                RemoteId::new("remote-3")
            ]
        );
        assert_eq!(gateway.upload_attempts(), vec!["f1", "f2", "f3"]);
        assert!(gateway.delete_attempts().is_empty());
    }

    #[tokio::test]
    async fn failure_rolls_back_prefix_and_names_failed_asset() {
        let gateway = Arc::new(ScriptedGateway::new());
        gateway.fail_upload("f3", UploadError::Unavailable("503".to_string()));
        let coordinator = coordinator(&gateway, &EventBus::default());

        let err = coordinator
            .run(vec![png("f1", 4), png("f2", 4), png("f3", 4)])
            .await
            .unwrap_err();

        assert_eq!(err.failed_asset(), Some("f3"));
        let reconciliation = err.reconciliation().unwrap();
        assert_eq!(
            reconciliation.succeeded(),
            &[RemoteId::new("remote-1"), RemoteId::new("remote-2")]
        );
        assert!(reconciliation.is_clean());
        assert_eq!(
            gateway.delete_attempts(),
            vec![RemoteId::new("remote-1"), RemoteId::new("remote-2")]
        );
        assert!(gateway.stored().is_empty());
    }

    #[tokio::test]
    async fn middle_failure_stops_and_leaves_nothing_committed() {
        let gateway = Arc::new(ScriptedGateway::new());
        gateway.fail_upload("b", UploadError::Rejected("corrupt".to_string()));
        let coordinator = coordinator(&gateway, &EventBus::default());

        let result = coordinator
            .run(vec![png("a", 4), png("b", 4), png("c", 4)])
            .await;

        assert!(matches!(
            result,
            Err(BatchUploadError::Upload { index: 1, .. })
        ));
        // c is never attempted.
        assert_eq!(gateway.upload_attempts(), vec!["a", "b"]);
        assert!(gateway.stored().is_empty());
    }

    #[tokio::test]
    async fn panicking_upload_fails_the_batch_and_rolls_back() {
        let gateway = Arc::new(ScriptedGateway::new());
        gateway.panic_on_upload("c");
        let coordinator = coordinator(&gateway, &EventBus::default());

        let err = coordinator
            .run(vec![png("a", 4), png("b", 4), png("c", 4)])
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            BatchUploadError::Upload {
                index: 2,
                source: UploadError::Aborted,
                ..
            }
        ));
        assert!(gateway.stored().is_empty());
        assert_eq!(
            gateway.delete_attempts(),
            vec![RemoteId::new("remote-1"), RemoteId::new("remote-2")]
        );
    }

    #[tokio::test]
    async fn rollback_failure_is_a_warning_not_a_different_outcome() {
        let gateway = Arc::new(ScriptedGateway::new());
        gateway.fail_upload("f2", UploadError::Transport("reset".to_string()));
        gateway.fail_delete("remote-1", "timeout");
        let events = EventBus::default();
        let mut rx = events.subscribe();
        let coordinator = coordinator(&gateway, &events);

        let err = coordinator
            .run(vec![png("f1", 4), png("f2", 4)])
            .await
            .unwrap_err();

        assert_eq!(err.failed_asset(), Some("f2"));
        assert_eq!(err.orphans().len(), 1);
        assert_eq!(err.orphans()[0].remote_id, RemoteId::new("remote-1"));

        let failed = drain_events(&mut rx)
            .into_iter()
            .find(|e| matches!(e, SyncEvent::BatchFailed { .. }))
            .unwrap();
        match failed {
            SyncEvent::BatchFailed { orphans, batch, .. } => {
                assert_eq!(orphans, vec![RemoteId::new("remote-1")]);
                assert!(batch.is_some());
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn invalid_batch_touches_nothing() {
        let gateway = Arc::new(ScriptedGateway::new());
        let events = EventBus::default();
        let mut rx = events.subscribe();
        let coordinator = coordinator(&gateway, &events);

        let err = coordinator
            .run(vec![png("ok", 4), png("bad", 4).with_declared_size(1)])
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            BatchUploadError::Validation(ValidationError::SizeMismatch { index: 1, .. })
        ));
        assert!(gateway.upload_attempts().is_empty());
        assert!(gateway.delete_attempts().is_empty());
        assert!(matches!(
            drain_events(&mut rx).as_slice(),
            [SyncEvent::BatchFailed { batch: None, .. }]
        ));
    }

    #[tokio::test]
    async fn empty_batch_is_rejected() {
        let gateway = Arc::new(ScriptedGateway::new());
        let coordinator = coordinator(&gateway, &EventBus::default());

        let err = coordinator.run(Vec::new()).await.unwrap_err();

        assert_eq!(err, BatchUploadError::Validation(ValidationError::EmptyBatch));
    }

    #[tokio::test]
    async fn progress_reported_in_submission_order() {
        let gateway = Arc::new(ScriptedGateway::new());
        let events = EventBus::default();
        let mut rx = events.subscribe();
        let coordinator = coordinator(&gateway, &events);

        let mut seen = Vec::new();
        coordinator
            .run_with_progress(
                vec![png("a", 1), png("b", 1), png("c", 1), png("d", 1)],
                |p| seen.push((p.completed, p.fraction())),
            )
            .await
            .unwrap();

        assert_eq!(seen, vec![(1, 0.25), (2, 0.5), (3, 0.75), (4, 1.0)]);
        let fractions: Vec<f64> = drain_events(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                SyncEvent::UploadProgress { fraction, .. } => Some(fraction),
                _ => None,
            })
            .collect();
        assert_eq!(fractions, vec![0.25, 0.5, 0.75, 1.0]);
    }

    #[test]
    fn progress_fraction_handles_zero_total() {
        let progress = BatchProgress {
            batch: BatchId::new(),
            completed: 0,
            total: 0,
        };
        assert_eq!(progress.fraction(), 0.0);
    }
}
