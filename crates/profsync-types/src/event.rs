//! Caller-visible events
//!
//! Coordinators publish on an [`EventBus`]; the presentation layer
//! subscribes. Publishing never blocks and never fails.

use crate::id::{BatchId, EntityId, RemoteId};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Default channel capacity
const DEFAULT_CAPACITY: usize = 256;

/// Something the caller may want to render
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEvent {
    /// Edits are pending but not yet written
    Dirty { entity: EntityId },
    /// A write started
    Saving { entity: EntityId },
    /// A write was acknowledged
    Saved { entity: EntityId },
    /// A write failed; edits are retained
    SaveFailed { entity: EntityId, reason: String },
    /// One more asset of a batch was uploaded
    UploadProgress {
        entity: EntityId,
        batch: BatchId,
        completed: usize,
        total: usize,
        fraction: f64,
    },
    /// A batch failed and was rolled back
    BatchFailed {
        entity: EntityId,
        batch: Option<BatchId>,
        reason: String,
        orphans: Vec<RemoteId>,
    },
}

impl SyncEvent {
    /// Entity this event concerns
    #[must_use]
    pub fn entity(&self) -> &EntityId {
        match self {
            Self::Dirty { entity }
            | Self::Saving { entity }
            | Self::Saved { entity }
            | Self::SaveFailed { entity, .. }
            | Self::UploadProgress { entity, .. }
            | Self::BatchFailed { entity, .. } => entity,
        }
    }
}

/// Broadcast bus for [`SyncEvent`]s
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SyncEvent>,
}

impl EventBus {
    /// Create bus with capacity
    #[inline]
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish; dropped silently when nobody listens
    #[inline]
    pub fn emit(&self, event: SyncEvent) {
        let _ = self.sender.send(event);
    }

    /// Subscribe to events published from now on
    #[inline]
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.sender.subscribe()
    }

    /// Current subscriber count
    #[inline]
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emit_without_subscribers_is_silent() {
        let bus = EventBus::default();
        bus.emit(SyncEvent::Saved {
            entity: EntityId::new("p"),
        });
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn subscriber_receives_in_order() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let entity = EntityId::new("p");

        bus.emit(SyncEvent::Saving {
            entity: entity.clone(),
        });
        bus.emit(SyncEvent::Saved {
            entity: entity.clone(),
        });

        assert_eq!(rx.recv().await.unwrap(), SyncEvent::Saving { entity: entity.clone() });
        assert_eq!(rx.recv().await.unwrap().entity(), &entity);
    }

    #[test]
    fn event_serializes_with_tag() {
        let event = SyncEvent::SaveFailed {
            entity: EntityId::new("p"),
            reason: "down".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "save_failed");
        assert_eq!(json["reason"], "down");
    }
}
