//! Save scheduler
//!
//! One [`SaveScheduler`] per entity. All mutable state lives in
//! [`SchedulerState`] behind a short synchronous lock that is never held
//! across an `.await`. The debounce timer and every write run as spawned
//! tasks whose handles are stored in that state:
//!
//! - the timer handle is aborted whenever the countdown restarts or an
//!   explicit flush takes over its edits;
//! - the write handle is a shared future that [`SaveScheduler::flush_now`]
//!   and [`SaveScheduler::shutdown`] join deliberately.
//!
//! Because writes are tasks, dropping a `flush_now` future never abandons a
//! write half-way or leaves the in-flight marker behind.

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use profsync_types::{
    EntityId, EventBus, PendingEdit, SaveError, StorageGateway, SyncEvent, WriteAck, WriteError,
};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Default quiet period before a debounced flush
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(1500);

type WriteResult = Result<WriteAck, WriteError>;
type WriteHandle = Shared<BoxFuture<'static, WriteResult>>;

/// Scheduler tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Quiet period after the last edit before a flush
    pub debounce: Duration,
}

impl SchedulerConfig {
    /// With debounce window
    #[inline]
    #[must_use]
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
        }
    }
}

/// What an explicit flush did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    /// One write carried the merged edits
    Written(WriteAck),
    /// Nothing left to write (a concurrent flush may have carried the edits)
    Clean,
}

impl FlushOutcome {
    /// Ack of the write, if one happened
    #[must_use]
    pub fn ack(&self) -> Option<&WriteAck> {
        match self {
            Self::Written(ack) => Some(ack),
            Self::Clean => None,
        }
    }
}

/// Debounce countdown
struct Timer {
    generation: u64,
    handle: JoinHandle<()>,
}

/// The write currently talking to the store
struct InFlightWrite {
    id: u64,
    snapshot: PendingEdit,
    done: WriteHandle,
}

#[derive(Default)]
struct SchedulerState {
    pending: PendingEdit,
    timer: Option<Timer>,
    in_flight: Option<InFlightWrite>,
    /// Explicit flushes waiting for the in-flight write; the drain loop
    /// yields to them instead of chaining.
    flush_waiters: usize,
    next_generation: u64,
    closed: bool,
}

impl SchedulerState {
    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.handle.abort();
        }
    }
}

struct Core {
    entity: EntityId,
    gateway: Arc<dyn StorageGateway>,
    events: EventBus,
    config: SchedulerConfig,
    state: Mutex<SchedulerState>,
}

/// Per-entity debounced save scheduler
///
/// Must be used from within a Tokio runtime.
pub struct SaveScheduler {
    core: Arc<Core>,
}

impl std::fmt::Debug for SaveScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.core.state.lock();
        f.debug_struct("SaveScheduler")
            .field("entity", &self.core.entity)
            .field("pending", &state.pending.len())
            .field("in_flight", &state.in_flight.is_some())
            .field("closed", &state.closed)
            .finish()
    }
}

impl SaveScheduler {
    /// Create scheduler for one entity
    #[must_use]
    pub fn new(
        entity: EntityId,
        gateway: Arc<dyn StorageGateway>,
        events: EventBus,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            core: Arc::new(Core {
                entity,
                gateway,
                events,
                config,
                state: Mutex::new(SchedulerState::default()),
            }),
        }
    }

    /// Entity this scheduler saves
    #[inline]
    #[must_use]
    pub fn entity(&self) -> &EntityId {
        &self.core.entity
    }

    /// Merge `update` into the pending edit and restart the countdown
    ///
    /// Returns immediately; the write happens after the debounce window.
    ///
    /// # Errors
    /// [`SaveError::Closed`] after [`SaveScheduler::shutdown`]
    ///
    /// # Panics
    /// Outside a Tokio runtime
    pub fn enqueue(&self, update: PendingEdit) -> Result<(), SaveError> {
        self.core.enqueue(update)
    }

    /// Write now, bypassing the debounce
    ///
    /// Cancels the countdown, waits for any in-flight write, merges `update`
    /// with everything accumulated meanwhile, then performs exactly one write
    /// and resolves once it settles.
    ///
    /// # Errors
    /// - [`SaveError::Write`] if the write failed; edits stay pending
    /// - [`SaveError::Closed`] after [`SaveScheduler::shutdown`]
    pub async fn flush_now(&self, update: PendingEdit) -> Result<FlushOutcome, SaveError> {
        if self.core.state.lock().closed {
            return Err(SaveError::Closed);
        }
        self.core.flush(update).await
    }

    /// Stop accepting edits and issue one best-effort final flush
    ///
    /// # Errors
    /// [`SaveError::Write`] if the final flush failed
    pub async fn shutdown(&self) -> Result<FlushOutcome, SaveError> {
        {
            let mut state = self.core.state.lock();
            state.closed = true;
            state.cancel_timer();
        }
        tracing::info!(entity = %self.core.entity, "shutting down save scheduler");

        let result = self.core.flush(PendingEdit::new()).await;
        if let Err(e) = &result {
            tracing::warn!(entity = %self.core.entity, error = %e, "final flush failed");
        }
        result
    }

    /// Snapshot of edits not yet handed to a write
    #[must_use]
    pub fn pending(&self) -> PendingEdit {
        self.core.state.lock().pending.clone()
    }

    /// Snapshot of the edit currently being written
    #[must_use]
    pub fn in_flight(&self) -> Option<PendingEdit> {
        self.core
            .state
            .lock()
            .in_flight
            .as_ref()
            .map(|w| w.snapshot.clone())
    }

    /// Edits are waiting for a write
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        !self.core.state.lock().pending.is_empty()
    }

    /// A write is in flight
    #[must_use]
    pub fn is_saving(&self) -> bool {
        self.core.state.lock().in_flight.is_some()
    }

    /// Shut down already
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.core.state.lock().closed
    }

    /// Read-only view that does not keep the scheduler alive
    #[must_use]
    pub fn observer(&self) -> SchedulerObserver {
        SchedulerObserver {
            core: Arc::downgrade(&self.core),
        }
    }
}

/// Weak view of a [`SaveScheduler`]'s state
///
/// Reports idle once the scheduler and its last write are gone.
#[derive(Clone)]
pub struct SchedulerObserver {
    core: Weak<Core>,
}

impl std::fmt::Debug for SchedulerObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerObserver")
            .field("alive", &(self.core.strong_count() > 0))
            .finish()
    }
}

impl SchedulerObserver {
    /// A write is in flight
    #[must_use]
    pub fn is_saving(&self) -> bool {
        self.core
            .upgrade()
            .is_some_and(|core| core.state.lock().in_flight.is_some())
    }

    /// Edits are waiting for a write
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.core
            .upgrade()
            .is_some_and(|core| !core.state.lock().pending.is_empty())
    }
}

impl Drop for SaveScheduler {
    fn drop(&mut self) {
        let pending = {
            let mut state = self.core.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.cancel_timer();
            state.pending.len()
        };
        if pending == 0 {
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let core = Arc::clone(&self.core);
                runtime.spawn(async move {
                    if let Err(e) = core.flush(PendingEdit::new()).await {
                        tracing::warn!(entity = %core.entity, error = %e, "final flush on drop failed");
                    }
                });
            }
            Err(_) => {
                tracing::warn!(
                    entity = %self.core.entity,
                    fields = pending,
                    "save scheduler dropped outside a runtime, pending edits not flushed"
                );
            }
        }
    }
}

/// Next step of an explicit flush, decided under the lock
enum FlushStep {
    Wait(WriteHandle),
    Write(WriteHandle),
    Clean,
}

/// Keeps `flush_waiters` honest if a flush future is dropped mid-wait
///
/// The drain loop skipped edits on behalf of the last waiter, so dropping
/// it with edits pending and nothing in flight re-arms the save.
struct WaiterGuard<'a> {
    core: &'a Arc<Core>,
    armed: bool,
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = self.core.state.lock();
        state.flush_waiters -= 1;
        if state.flush_waiters > 0 || state.in_flight.is_some() || state.pending.is_empty() {
            return;
        }
        if tokio::runtime::Handle::try_current().is_err() {
            tracing::warn!(
                entity = %self.core.entity,
                fields = state.pending.len(),
                "flush abandoned outside a runtime, pending edits not rescheduled"
            );
            return;
        }

        tracing::debug!(entity = %self.core.entity, "flush abandoned, rescheduling pending edits");
        if state.closed {
            let _ = self.core.start_write(&mut state);
        } else {
            self.core.restart_timer(&mut state);
        }
    }
}

impl Core {
    fn enqueue(self: &Arc<Self>, update: PendingEdit) -> Result<(), SaveError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(SaveError::Closed);
        }
        if update.is_empty() {
            return Ok(());
        }

        state.pending.merge(update);
        self.restart_timer(&mut state);
        tracing::debug!(entity = %self.entity, fields = state.pending.len(), "edit queued");
        self.events.emit(SyncEvent::Dirty {
            entity: self.entity.clone(),
        });
        Ok(())
    }

    fn restart_timer(self: &Arc<Self>, state: &mut SchedulerState) {
        state.cancel_timer();
        state.next_generation += 1;
        let generation = state.next_generation;
        let core: Weak<Core> = Arc::downgrade(self);
        let window = self.config.debounce;

        let handle = tokio::spawn(async move {
            tokio::time::sleep(window).await;
            if let Some(core) = core.upgrade() {
                core.on_timer(generation);
            }
        });
        state.timer = Some(Timer { generation, handle });
    }

    fn on_timer(self: &Arc<Self>, generation: u64) {
        let mut state = self.state.lock();
        if state.timer.as_ref().map(|t| t.generation) != Some(generation) {
            return;
        }
        state.timer = None;

        if state.in_flight.is_some() || state.flush_waiters > 0 {
            // The completing write or the waiting flush picks these edits up.
            tracing::debug!(entity = %self.entity, "debounce expired during a write, deferring");
            return;
        }
        if state.pending.is_empty() {
            return;
        }
        let _ = self.start_write(&mut state);
    }

    /// Snapshot pending edits and spawn the write. Caller holds the lock
    /// and has checked that nothing is in flight.
    fn start_write(self: &Arc<Self>, state: &mut SchedulerState) -> WriteHandle {
        debug_assert!(state.in_flight.is_none());
        state.cancel_timer();

        let snapshot = state.pending.take();
        state.next_generation += 1;
        let id = state.next_generation;

        let core = Arc::clone(self);
        let sent = snapshot.clone();
        let join = tokio::spawn(async move { core.run_write(id, sent).await });
        let done = async move { join.await.unwrap_or(Err(WriteError::Aborted)) }
            .boxed()
            .shared();

        state.in_flight = Some(InFlightWrite {
            id,
            snapshot,
            done: done.clone(),
        });
        done
    }

    async fn run_write(self: Arc<Self>, id: u64, snapshot: PendingEdit) -> WriteResult {
        self.events.emit(SyncEvent::Saving {
            entity: self.entity.clone(),
        });
        tracing::debug!(entity = %self.entity, fields = snapshot.len(), "writing profile");

        let write = async { self.gateway.write(&self.entity, snapshot.clone()).await };
        let result = AssertUnwindSafe(write)
            .catch_unwind()
            .await
            .unwrap_or(Err(WriteError::Aborted));

        self.complete_write(id, snapshot, &result);
        result
    }

    fn complete_write(self: &Arc<Self>, id: u64, snapshot: PendingEdit, result: &WriteResult) {
        let mut state = self.state.lock();
        if state.in_flight.as_ref().is_some_and(|w| w.id == id) {
            state.in_flight = None;
        }

        match result {
            Ok(_) => {
                tracing::info!(entity = %self.entity, fields = snapshot.len(), "profile saved");
                self.events.emit(SyncEvent::Saved {
                    entity: self.entity.clone(),
                });

                if !state.pending.is_empty() && state.flush_waiters == 0 {
                    tracing::debug!(
                        entity = %self.entity,
                        fields = state.pending.len(),
                        "draining edits that arrived during the write"
                    );
                    let _ = self.start_write(&mut state);
                }
            }
            Err(e) => {
                state.pending.absorb_older(snapshot);
                tracing::error!(
                    entity = %self.entity,
                    error = %e,
                    retained = state.pending.len(),
                    "profile write failed"
                );
                self.events.emit(SyncEvent::SaveFailed {
                    entity: self.entity.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }

    async fn flush(self: &Arc<Self>, update: PendingEdit) -> Result<FlushOutcome, SaveError> {
        let mut waiter = WaiterGuard {
            core: self,
            armed: true,
        };
        {
            let mut state = self.state.lock();
            state.cancel_timer();
            state.pending.merge(update);
            state.flush_waiters += 1;
        }

        loop {
            let step = {
                let mut state = self.state.lock();
                if let Some(write) = &state.in_flight {
                    FlushStep::Wait(write.done.clone())
                } else {
                    state.flush_waiters -= 1;
                    waiter.armed = false;
                    state.cancel_timer();
                    if state.pending.is_empty() {
                        FlushStep::Clean
                    } else {
                        FlushStep::Write(self.start_write(&mut state))
                    }
                }
            };

            match step {
                FlushStep::Wait(done) => {
                    tracing::debug!(entity = %self.entity, "explicit flush waiting for in-flight write");
                    // That write's outcome belongs to whoever started it.
                    let _ = done.await;
                }
                FlushStep::Write(done) => {
                    return done.await.map(FlushOutcome::Written).map_err(SaveError::from);
                }
                FlushStep::Clean => return Ok(FlushOutcome::Clean),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use profsync_test_utils::{drain_events, entity, ScriptedGateway};
    use serde_json::json;

    fn scheduler(gateway: &Arc<ScriptedGateway>, events: &EventBus) -> SaveScheduler {
        SaveScheduler::new(
            entity("p1"),
            Arc::clone(gateway) as Arc<dyn StorageGateway>,
            events.clone(),
            SchedulerConfig::default(),
        )
    }

    #[test]
    fn config_default_window() {
        let config = SchedulerConfig::default();
        assert_eq!(config.debounce, Duration::from_millis(1500));
        assert_eq!(
            config.with_debounce(Duration::from_secs(1)).debounce,
            Duration::from_secs(1)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn enqueue_marks_dirty_without_writing() {
        let gateway = Arc::new(ScriptedGateway::new());
        let events = EventBus::default();
        let mut rx = events.subscribe();
        let scheduler = scheduler(&gateway, &events);

        scheduler
            .enqueue(PendingEdit::single("bio", json!("a")))
            .unwrap();

        assert!(scheduler.is_dirty());
        assert!(!scheduler.is_saving());
        assert_eq!(gateway.write_count(), 0);
        assert_eq!(
            drain_events(&mut rx),
            vec![SyncEvent::Dirty { entity: entity("p1") }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn empty_enqueue_is_noop() {
        let gateway = Arc::new(ScriptedGateway::new());
        let scheduler = scheduler(&gateway, &EventBus::default());

        scheduler.enqueue(PendingEdit::new()).unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;

        assert!(!scheduler.is_dirty());
        assert_eq!(gateway.write_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn save_events_in_order() {
        let gateway = Arc::new(ScriptedGateway::new());
        let events = EventBus::default();
        let mut rx = events.subscribe();
        let scheduler = scheduler(&gateway, &events);

        scheduler
            .enqueue(PendingEdit::single("bio", json!("a")))
            .unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_eq!(
            drain_events(&mut rx),
            vec![
                SyncEvent::Dirty { entity: entity("p1") },
                SyncEvent::Saving { entity: entity("p1") },
                SyncEvent::Saved { entity: entity("p1") },
            ]
        );
        assert!(!scheduler.is_dirty());
    }

    #[tokio::test(start_paused = true)]
    async fn flush_now_with_nothing_pending_is_clean() {
        let gateway = Arc::new(ScriptedGateway::new());
        let scheduler = scheduler(&gateway, &EventBus::default());

        let outcome = scheduler.flush_now(PendingEdit::new()).await.unwrap();

        assert_eq!(outcome, FlushOutcome::Clean);
        assert!(outcome.ack().is_none());
        assert_eq!(gateway.write_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn closed_scheduler_rejects_edits() {
        let gateway = Arc::new(ScriptedGateway::new());
        let scheduler = scheduler(&gateway, &EventBus::default());

        scheduler.shutdown().await.unwrap();

        assert!(scheduler.is_closed());
        assert_eq!(
            scheduler.enqueue(PendingEdit::single("bio", json!("a"))),
            Err(SaveError::Closed)
        );
        assert_eq!(
            scheduler.flush_now(PendingEdit::new()).await,
            Err(SaveError::Closed)
        );
    }
}
