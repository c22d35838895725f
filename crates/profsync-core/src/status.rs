//! Per-entity save status
//!
//! Folds the event stream for one entity into a single current status
//! that a presentation layer can watch.

use profsync_save::SchedulerObserver;
use profsync_types::{EntityId, EventBus, SyncEvent};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// What the user should see next to the form
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SaveStatus {
    /// Nothing to report
    #[default]
    Idle,
    /// Unsaved edits
    Dirty,
    /// Write in progress
    Saving,
    /// Last write acknowledged
    Saved,
    /// Last write failed
    Failed(String),
}

impl SaveStatus {
    /// `Saved` and `Failed` clear back to `Idle` after a delay
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Saved | Self::Failed(_))
    }

    /// Best guess from live scheduler state when events were missed
    fn from_scheduler(scheduler: &SchedulerObserver) -> Self {
        if scheduler.is_saving() {
            Self::Saving
        } else if scheduler.is_dirty() {
            Self::Dirty
        } else {
            Self::Idle
        }
    }

    fn from_event(event: SyncEvent) -> Option<Self> {
        match event {
            SyncEvent::Dirty { .. } => Some(Self::Dirty),
            SyncEvent::Saving { .. } => Some(Self::Saving),
            SyncEvent::Saved { .. } => Some(Self::Saved),
            SyncEvent::SaveFailed { reason, .. } => Some(Self::Failed(reason)),
            SyncEvent::UploadProgress { .. } | SyncEvent::BatchFailed { .. } => None,
        }
    }
}

/// Watches one entity's events and publishes its [`SaveStatus`]
#[derive(Debug)]
pub struct StatusIndicator {
    status: watch::Receiver<SaveStatus>,
    task: JoinHandle<()>,
}

impl StatusIndicator {
    /// Start following `entity` on `events`
    ///
    /// With a `scheduler`, a lagged subscription resynchronizes from its
    /// state instead of keeping a status whose follow-up was dropped.
    ///
    /// Must be called inside a Tokio runtime.
    #[must_use]
    pub fn spawn(
        entity: EntityId,
        events: &EventBus,
        clear_after: Duration,
        scheduler: Option<SchedulerObserver>,
    ) -> Self {
        let (tx, status) = watch::channel(SaveStatus::Idle);
        let rx = events.subscribe();
        let task = tokio::spawn(follow(entity, rx, tx, clear_after, scheduler));
        Self { status, task }
    }

    /// Status right now
    #[must_use]
    pub fn current(&self) -> SaveStatus {
        self.status.borrow().clone()
    }

    /// Receiver notified on every change
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<SaveStatus> {
        self.status.clone()
    }
}

impl Drop for StatusIndicator {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn follow(
    entity: EntityId,
    mut events: broadcast::Receiver<SyncEvent>,
    status: watch::Sender<SaveStatus>,
    clear_after: Duration,
    scheduler: Option<SchedulerObserver>,
) {
    let mut clear_at: Option<Instant> = None;

    loop {
        let deadline = clear_at.unwrap_or_else(Instant::now);
        tokio::select! {
            received = events.recv() => match received {
                Ok(event) if event.entity() == &entity => {
                    if let Some(next) = SaveStatus::from_event(event) {
                        clear_at = next.is_terminal().then(|| Instant::now() + clear_after);
                        status.send_replace(next);
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(%entity, skipped, "status indicator lagged");
                    if let Some(scheduler) = &scheduler {
                        clear_at = None;
                        status.send_replace(SaveStatus::from_scheduler(scheduler));
                    }
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            () = tokio::time::sleep_until(deadline), if clear_at.is_some() => {
                clear_at = None;
                status.send_replace(SaveStatus::Idle);
            }
        }
    }
}
