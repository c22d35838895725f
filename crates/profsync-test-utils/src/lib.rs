//! Testing utilities for profsync workspace
//!
//! Shared gateway fake, fixtures, and helpers.

#![allow(missing_docs)]

use async_trait::async_trait;
use parking_lot::Mutex;
use profsync_types::{
    Asset, DeleteOutcome, EntityId, MediaType, PendingEdit, RemoteId, StorageGateway, SyncEvent,
    UploadError, UploadedAsset, WriteAck, WriteError,
};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

/// One call to [`StorageGateway::write`] as the fake saw it
#[derive(Debug, Clone)]
pub struct RecordedWrite {
    pub entity: EntityId,
    pub edit: PendingEdit,
    pub started_at: Instant,
}

/// Scriptable in-memory gateway
///
/// Writes succeed unless a failure was queued with [`ScriptedGateway::fail_next_write`].
/// Uploads succeed unless the asset name was registered with
/// [`ScriptedGateway::fail_upload`]. Deletes report `Deleted` for stored
/// assets, `NotFound` otherwise, unless overridden with
/// [`ScriptedGateway::fail_delete`].
#[derive(Debug, Default)]
pub struct ScriptedGateway {
    write_latency: Duration,
    upload_latency: Duration,
    write_script: Mutex<VecDeque<WriteError>>,
    panic_next_write: AtomicBool,
    writes: Mutex<Vec<RecordedWrite>>,
    profiles: Mutex<HashMap<EntityId, PendingEdit>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    upload_failures: Mutex<HashMap<String, UploadError>>,
    upload_panics: Mutex<BTreeSet<String>>,
    uploads: Mutex<Vec<String>>,
    stored: Mutex<BTreeSet<RemoteId>>,
    next_remote: AtomicUsize,
    delete_failures: Mutex<HashMap<RemoteId, String>>,
    delete_panics: Mutex<BTreeSet<RemoteId>>,
    deletes: Mutex<Vec<RemoteId>>,
}

impl ScriptedGateway {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every write takes this long
    #[must_use]
    pub fn with_write_latency(mut self, latency: Duration) -> Self {
        self.write_latency = latency;
        self
    }

    /// Every upload takes this long
    #[must_use]
    pub fn with_upload_latency(mut self, latency: Duration) -> Self {
        self.upload_latency = latency;
        self
    }

    /// Queue a failure for the next write not yet scripted
    pub fn fail_next_write(&self, error: WriteError) {
        self.write_script.lock().push_back(error);
    }

    /// Uploads of assets with this name fail
    pub fn fail_upload(&self, name: impl Into<String>, error: UploadError) {
        self.upload_failures.lock().insert(name.into(), error);
    }

    /// Deletes of this remote id fail
    pub fn fail_delete(&self, remote_id: impl Into<RemoteId>, reason: impl Into<String>) {
        self.delete_failures
            .lock()
            .insert(remote_id.into(), reason.into());
    }

    /// The next write panics instead of returning
    pub fn panic_next_write(&self) {
        self.panic_next_write.store(true, Ordering::SeqCst);
    }

    /// Uploads of assets with this name panic
    pub fn panic_on_upload(&self, name: impl Into<String>) {
        self.upload_panics.lock().insert(name.into());
    }

    /// Deletes of this remote id panic
    pub fn panic_on_delete(&self, remote_id: impl Into<RemoteId>) {
        self.delete_panics.lock().insert(remote_id.into());
    }

    /// Place an asset in the store without going through upload
    pub fn seed_asset(&self, remote_id: impl Into<RemoteId>) {
        self.stored.lock().insert(remote_id.into());
    }

    #[must_use]
    pub fn writes(&self) -> Vec<RecordedWrite> {
        self.writes.lock().clone()
    }

    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes.lock().len()
    }

    /// Most writes observed running at once
    #[must_use]
    pub fn max_concurrent_writes(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Fields persisted by successful writes, merged in order
    #[must_use]
    pub fn profile(&self, entity: &EntityId) -> PendingEdit {
        self.profiles.lock().get(entity).cloned().unwrap_or_default()
    }

    /// Names of assets whose upload was attempted, in order
    #[must_use]
    pub fn upload_attempts(&self) -> Vec<String> {
        self.uploads.lock().clone()
    }

    /// Remote ids currently stored
    #[must_use]
    pub fn stored(&self) -> BTreeSet<RemoteId> {
        self.stored.lock().clone()
    }

    /// Remote ids whose delete was attempted
    #[must_use]
    pub fn delete_attempts(&self) -> Vec<RemoteId> {
        self.deletes.lock().clone()
    }
}

#[async_trait]
impl StorageGateway for ScriptedGateway {
    async fn write(&self, entity: &EntityId, edit: PendingEdit) -> Result<WriteAck, WriteError> {
        if self.panic_next_write.swap(false, Ordering::SeqCst) {
            panic!("scripted write panic for {entity}");
        }
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        self.writes.lock().push(RecordedWrite {
            entity: entity.clone(),
            edit: edit.clone(),
            started_at: Instant::now(),
        });

        if !self.write_latency.is_zero() {
            tokio::time::sleep(self.write_latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Some(error) = self.write_script.lock().pop_front() {
            return Err(error);
        }

        let mut profiles = self.profiles.lock();
        profiles.entry(entity.clone()).or_default().merge(edit);
        let revision = self.writes.lock().len().to_string();
        Ok(WriteAck::new(entity.clone()).with_revision(revision))
    }

    async fn upload(&self, asset: &Asset) -> Result<UploadedAsset, UploadError> {
        self.uploads.lock().push(asset.name.clone());
        if self.upload_panics.lock().contains(&asset.name) {
            panic!("scripted upload panic for {}", asset.name);
        }

        if !self.upload_latency.is_zero() {
            tokio::time::sleep(self.upload_latency).await;
        }

        if let Some(error) = self.upload_failures.lock().get(&asset.name) {
            return Err(error.clone());
        }

        let n = self.next_remote.fetch_add(1, Ordering::SeqCst) + 1;
        let remote_id = RemoteId::new(format!("remote-{n}"));
        self.stored.lock().insert(remote_id.clone());
        Ok(UploadedAsset::new(
            remote_id.clone(),
            format!("https://cdn.test/{remote_id}"),
        ))
    }

    async fn delete(&self, remote_id: &RemoteId) -> DeleteOutcome {
        self.deletes.lock().push(remote_id.clone());
        if self.delete_panics.lock().contains(remote_id) {
            panic!("scripted delete panic for {remote_id}");
        }

        if let Some(reason) = self.delete_failures.lock().get(remote_id) {
            return DeleteOutcome::failed(reason.clone());
        }
        if self.stored.lock().remove(remote_id) {
            DeleteOutcome::Deleted
        } else {
            DeleteOutcome::NotFound
        }
    }
}

/// PNG-typed asset with `len` bytes of content
#[must_use]
pub fn png(name: &str, len: usize) -> Asset {
    Asset::new(name, MediaType::PNG, vec![0x89; len])
}

/// JPEG-typed asset with `len` bytes of content
#[must_use]
pub fn jpeg(name: &str, len: usize) -> Asset {
    Asset::new(name, MediaType::JPEG, vec![0xFF; len])
}

/// Drain every event currently buffered in a receiver
pub fn drain_events(rx: &mut broadcast::Receiver<SyncEvent>) -> Vec<SyncEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Entity id fixture
#[must_use]
pub fn entity(id: &str) -> EntityId {
    EntityId::new(id)
}
