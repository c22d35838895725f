//! Editing session for one profile
//!
//! Owns the entity's save scheduler and upload coordinator, runs every
//! raw value through the sanitizer, and keeps the committed gallery.

use crate::config::ProfsyncConfig;
use crate::error::SessionError;
use crate::status::{SaveStatus, StatusIndicator};
use parking_lot::RwLock;
use profsync_save::{FlushOutcome, SaveScheduler};
use profsync_types::{
    Asset, EntityId, EventBus, FieldValue, PendingEdit, RemoteId, Sanitizer, StorageGateway,
    UploadedAsset,
};
use profsync_upload::{BatchProgress, BatchUploadCoordinator};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};

/// One committed gallery image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GalleryEntry {
    /// Store id
    pub remote_id: RemoteId,
    /// Public URL
    pub url: String,
}

impl From<&UploadedAsset> for GalleryEntry {
    fn from(asset: &UploadedAsset) -> Self {
        Self {
            remote_id: asset.remote_id.clone(),
            url: asset.url.clone(),
        }
    }
}

/// Sanitized, debounced editing of one profile plus its gallery
pub struct ProfileSession {
    entity: EntityId,
    scheduler: SaveScheduler,
    uploads: BatchUploadCoordinator,
    sanitizer: Arc<dyn Sanitizer>,
    gallery: RwLock<Vec<UploadedAsset>>,
    /// One replacement at a time, so the committed gallery matches the
    /// last reference written
    gallery_lock: Mutex<()>,
    gallery_field: String,
    status: StatusIndicator,
}

impl std::fmt::Debug for ProfileSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProfileSession")
            .field("entity", &self.entity)
            .field("scheduler", &self.scheduler)
            .field("gallery_len", &self.gallery.read().len())
            .finish_non_exhaustive()
    }
}

impl ProfileSession {
    /// Open a session
    ///
    /// Must be called inside a Tokio runtime.
    #[must_use]
    pub fn new(
        entity: EntityId,
        gateway: Arc<dyn StorageGateway>,
        events: EventBus,
        sanitizer: Arc<dyn Sanitizer>,
        config: &ProfsyncConfig,
    ) -> Self {
        let scheduler = SaveScheduler::new(
            entity.clone(),
            Arc::clone(&gateway),
            events.clone(),
            config.scheduler_config(),
        );
        let status = StatusIndicator::spawn(
            entity.clone(),
            &events,
            config.status_clear_after(),
            Some(scheduler.observer()),
        );
        let uploads = BatchUploadCoordinator::new(
            entity.clone(),
            gateway,
            events,
            config.upload.clone(),
        );
        tracing::debug!(%entity, "session opened");

        Self {
            entity,
            scheduler,
            uploads,
            sanitizer,
            gallery: RwLock::new(Vec::new()),
            gallery_lock: Mutex::new(()),
            gallery_field: config.save.gallery_field.clone(),
            status,
        }
    }

    /// Entity being edited
    #[inline]
    #[must_use]
    pub fn entity(&self) -> &EntityId {
        &self.entity
    }

    /// Underlying scheduler
    #[inline]
    #[must_use]
    pub fn scheduler(&self) -> &SaveScheduler {
        &self.scheduler
    }

    /// Sanitize one field and queue it for the next debounced write
    ///
    /// # Errors
    /// - [`SessionError::Rejected`]; nothing is queued
    /// - [`SessionError::Save`] if the session is closed
    pub fn edit(&self, field: &str, raw: FieldValue) -> Result<(), SessionError> {
        let value = self.sanitizer.clean(field, raw)?;
        self.scheduler.enqueue(PendingEdit::single(field, value))?;
        Ok(())
    }

    /// Sanitize several fields and queue them together
    ///
    /// # Errors
    /// As [`Self::edit`]; a single rejected field rejects the whole edit
    pub fn edit_many(&self, raw: PendingEdit) -> Result<(), SessionError> {
        let clean = self.sanitizer.clean_edit(raw)?;
        self.scheduler.enqueue(clean)?;
        Ok(())
    }

    /// Sanitize `raw` and write it with everything pending, now
    ///
    /// # Errors
    /// - [`SessionError::Rejected`]; nothing is queued or written
    /// - [`SessionError::Save`] if the write fails (edits stay pending)
    pub async fn save(&self, raw: PendingEdit) -> Result<FlushOutcome, SessionError> {
        let clean = self.sanitizer.clean_edit(raw)?;
        Ok(self.scheduler.flush_now(clean).await?)
    }

    /// Upload `assets` as a unit and make them the profile's gallery
    ///
    /// On success the profile's gallery field holds the new URLs and the
    /// previous gallery is replaced. On any failure the previous gallery is
    /// kept and the new assets are rolled back. Concurrent replacements on
    /// one session run one after another.
    ///
    /// # Errors
    /// - [`SessionError::Batch`] if validation or an upload failed
    /// - [`SessionError::Gallery`] if the profile write referencing the
    ///   new assets failed
    pub async fn replace_gallery(&self, assets: Vec<Asset>) -> Result<Vec<GalleryEntry>, SessionError> {
        self.replace_gallery_with_progress(assets, |_| {}).await
    }

    /// [`Self::replace_gallery`], reporting upload progress
    ///
    /// # Errors
    /// See [`Self::replace_gallery`]
    pub async fn replace_gallery_with_progress<F>(
        &self,
        assets: Vec<Asset>,
        on_progress: F,
    ) -> Result<Vec<GalleryEntry>, SessionError>
    where
        F: FnMut(BatchProgress) + Send,
    {
        let _replacing = self.gallery_lock.lock().await;
        let uploaded = self.uploads.run_with_progress(assets, on_progress).await?;
        let reference = PendingEdit::single(&self.gallery_field, gallery_urls(&uploaded));

        match self.scheduler.flush_now(reference).await {
            Ok(_) => {
                let entries: Vec<GalleryEntry> = uploaded.iter().map(GalleryEntry::from).collect();
                *self.gallery.write() = uploaded;
                tracing::info!(entity = %self.entity, count = entries.len(), "gallery replaced");
                Ok(entries)
            }
            Err(source) => {
                // The failed reference stays pending; point it back at the
                // gallery that still exists.
                let previous = gallery_urls(&self.gallery.read());
                let _ = self
                    .scheduler
                    .enqueue(PendingEdit::single(&self.gallery_field, previous));

                let reconciliation = self.uploads.rollback_engine().undo(uploaded).await;
                tracing::error!(
                    entity = %self.entity,
                    error = %source,
                    orphans = reconciliation.failed().len(),
                    "gallery reference write failed, new assets rolled back"
                );
                Err(SessionError::Gallery {
                    source,
                    reconciliation,
                })
            }
        }
    }

    /// Committed gallery
    #[must_use]
    pub fn gallery(&self) -> Vec<GalleryEntry> {
        self.gallery.read().iter().map(GalleryEntry::from).collect()
    }

    /// Current save status
    #[must_use]
    pub fn status(&self) -> SaveStatus {
        self.status.current()
    }

    /// Receiver notified on every status change
    #[must_use]
    pub fn watch_status(&self) -> watch::Receiver<SaveStatus> {
        self.status.watch()
    }

    /// Flush pending edits and refuse further ones
    ///
    /// # Errors
    /// [`SessionError::Save`] if the final write fails
    pub async fn shutdown(&self) -> Result<FlushOutcome, SessionError> {
        let outcome = self.scheduler.shutdown().await?;
        tracing::debug!(entity = %self.entity, "session closed");
        Ok(outcome)
    }
}

fn gallery_urls(assets: &[UploadedAsset]) -> FieldValue {
    FieldValue::Array(
        assets
            .iter()
            .map(|a| FieldValue::String(a.url.clone()))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use profsync_test_utils::{entity, png, ScriptedGateway};
    use profsync_types::{Rejected, WriteError};
    use serde_json::json;
    use std::time::Duration;

    struct NoScripts;

    impl Sanitizer for NoScripts {
        fn clean(&self, field: &str, raw: FieldValue) -> Result<FieldValue, Rejected> {
            match raw {
                FieldValue::String(s) if s.contains("<script") => {
                    Err(Rejected::new(field, "markup not allowed"))
                }
                FieldValue::String(s) => Ok(FieldValue::String(s.trim().to_string())),
                other => Ok(other),
            }
        }
    }

    fn session(gateway: &Arc<ScriptedGateway>) -> ProfileSession {
        ProfileSession::new(
            entity("p1"),
            Arc::clone(gateway) as Arc<dyn StorageGateway>,
            EventBus::default(),
            Arc::new(NoScripts),
            &ProfsyncConfig::default(),
        )
    }

    #[tokio::test]
    async fn edit_is_sanitized_before_queueing() {
        let gateway = Arc::new(ScriptedGateway::new());
        let session = session(&gateway);

        session.edit("bio", json!("  hello  ")).unwrap();

        assert_eq!(session.scheduler().pending().get("bio"), Some(&json!("hello")));
    }

    #[tokio::test]
    async fn rejected_edit_queues_nothing() {
        let gateway = Arc::new(ScriptedGateway::new());
        let session = session(&gateway);

        let err = session.edit("bio", json!("<script>x</script>")).unwrap_err();

        assert!(matches!(err, SessionError::Rejected(ref r) if r.field == "bio"));
        assert!(!session.scheduler().is_dirty());
    }

    #[tokio::test]
    async fn rejected_save_writes_nothing() {
        let gateway = Arc::new(ScriptedGateway::new());
        let session = session(&gateway);

        let raw = PendingEdit::new()
            .with("name", json!("Ada"))
            .with("bio", json!("<script>"));
        assert!(session.save(raw).await.is_err());

        assert_eq!(gateway.write_count(), 0);
        assert!(!session.scheduler().is_dirty());
    }

    #[tokio::test]
    async fn replace_gallery_writes_reference_and_commits() {
        let gateway = Arc::new(ScriptedGateway::new());
        let session = session(&gateway);

        let entries = session
            .replace_gallery(vec![png("a", 2), png("b", 2)])
            .await
            .unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(session.gallery(), entries);
        assert_eq!(
            gateway.profile(&entity("p1")).get("gallery"),
            Some(&json!([
                "https://cdn.test/remote-1",
                "https://cdn.test/remote-2"
            ]))
        );
    }

    #[tokio::test]
    async fn failed_reference_write_rolls_back_new_assets() {
        let gateway = Arc::new(ScriptedGateway::new());
        let session = session(&gateway);
        session.replace_gallery(vec![png("old", 2)]).await.unwrap();

        gateway.fail_next_write(WriteError::Unavailable("503".to_string()));
        let err = session
            .replace_gallery(vec![png("new1", 2), png("new2", 2)])
            .await
            .unwrap_err();

        match err {
            SessionError::Gallery { reconciliation, .. } => {
                assert_eq!(reconciliation.succeeded().len(), 2);
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(session.gallery().len(), 1);
        assert_eq!(session.gallery()[0].url, "https://cdn.test/remote-1");
        assert_eq!(
            session.scheduler().pending().get("gallery"),
            Some(&json!(["https://cdn.test/remote-1"]))
        );
        assert_eq!(gateway.stored().len(), 1);
    }

    #[tokio::test]
    async fn failed_batch_keeps_previous_gallery() {
        let gateway = Arc::new(ScriptedGateway::new());
        let session = session(&gateway);
        session.replace_gallery(vec![png("old", 2)]).await.unwrap();

        let err = session.replace_gallery(Vec::new()).await.unwrap_err();

        assert!(matches!(err, SessionError::Batch(_)));
        assert_eq!(session.gallery().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_replacements_leave_gallery_and_profile_agreeing() {
        let gateway =
            Arc::new(ScriptedGateway::new().with_write_latency(Duration::from_millis(500)));
        let session = session(&gateway);

        session.edit("bio", json!("hello")).unwrap();
        // Debounced write of the bio is in flight.
        tokio::time::sleep(Duration::from_millis(1600)).await;
        assert!(session.scheduler().is_saving());

        let (first, second) = tokio::join!(
            session.replace_gallery(vec![png("a", 2)]),
            session.replace_gallery(vec![png("b", 2)])
        );
        first.unwrap();
        second.unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;

        let committed: Vec<FieldValue> = session
            .gallery()
            .into_iter()
            .map(|entry| FieldValue::String(entry.url))
            .collect();
        assert_eq!(committed.len(), 1);
        assert_eq!(
            gateway.profile(&entity("p1")).get("gallery"),
            Some(&FieldValue::Array(committed))
        );
        assert_eq!(gateway.profile(&entity("p1")).get("bio"), Some(&json!("hello")));
    }
}
