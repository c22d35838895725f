//! Session registry
//!
//! One [`ProfileSession`] per entity, created on first use and shared by
//! every caller that edits that entity.

use crate::config::{ProfsyncConfig, StorageMode};
use crate::error::{ConfigError, SessionError};
use crate::local::LocalStore;
use crate::session::ProfileSession;
use dashmap::DashMap;
use profsync_save::FlushOutcome;
use profsync_types::{EntityId, EventBus, PassthroughSanitizer, Sanitizer, StorageGateway, SyncEvent};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Entity-keyed sessions over one storage backend
pub struct SessionRegistry {
    config: ProfsyncConfig,
    gateway: Arc<dyn StorageGateway>,
    sanitizer: Arc<dyn Sanitizer>,
    events: EventBus,
    sessions: DashMap<EntityId, Arc<ProfileSession>>,
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("mode", &self.config.storage.mode)
            .field("sessions", &self.sessions.len())
            .finish_non_exhaustive()
    }
}

impl SessionRegistry {
    /// Build a registry, resolving the backend from `config.storage.mode`
    ///
    /// `remote` is required in remote mode and ignored in local mode.
    ///
    /// # Errors
    /// [`ConfigError::MissingGateway`] in remote mode without `remote`
    pub fn new(
        config: ProfsyncConfig,
        remote: Option<Arc<dyn StorageGateway>>,
    ) -> Result<Self, ConfigError> {
        let gateway: Arc<dyn StorageGateway> = match (config.storage.mode, remote) {
            (StorageMode::Remote, Some(gateway)) => gateway,
            (StorageMode::Remote, None) => return Err(ConfigError::MissingGateway),
            (StorageMode::Local, remote) => {
                if remote.is_some() {
                    tracing::warn!("storage mode is local; ignoring supplied remote gateway");
                }
                tracing::warn!("using in-process storage, nothing will persist");
                Arc::new(LocalStore::new())
            }
        };

        Ok(Self {
            events: EventBus::new(config.event_capacity),
            config,
            gateway,
            sanitizer: Arc::new(PassthroughSanitizer),
            sessions: DashMap::new(),
        })
    }

    /// With sanitizer applied by every session created afterwards
    #[must_use]
    pub fn with_sanitizer(mut self, sanitizer: Arc<dyn Sanitizer>) -> Self {
        self.sanitizer = sanitizer;
        self
    }

    /// Active configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &ProfsyncConfig {
        &self.config
    }

    /// Backend every session writes to
    #[inline]
    #[must_use]
    pub fn gateway(&self) -> Arc<dyn StorageGateway> {
        Arc::clone(&self.gateway)
    }

    /// Shared event bus
    #[inline]
    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Subscribe to every session's events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Session for `entity`, opening it if needed
    ///
    /// Must be called inside a Tokio runtime.
    #[must_use]
    pub fn session(&self, entity: &EntityId) -> Arc<ProfileSession> {
        if let Some(existing) = self.sessions.get(entity) {
            return Arc::clone(existing.value());
        }
        let entry = self.sessions.entry(entity.clone()).or_insert_with(|| {
            Arc::new(ProfileSession::new(
                entity.clone(),
                Arc::clone(&self.gateway),
                self.events.clone(),
                Arc::clone(&self.sanitizer),
                &self.config,
            ))
        });
        Arc::clone(entry.value())
    }

    /// Open session, if any
    #[must_use]
    pub fn get(&self, entity: &EntityId) -> Option<Arc<ProfileSession>> {
        self.sessions.get(entity).map(|s| Arc::clone(s.value()))
    }

    /// Number of open sessions
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// No open sessions
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Remove and shut down one session; `None` if it was not open
    pub async fn close(&self, entity: &EntityId) -> Option<Result<FlushOutcome, SessionError>> {
        let (_, session) = self.sessions.remove(entity)?;
        Some(session.shutdown().await)
    }

    /// Shut down every session, returning the ones whose final write failed
    pub async fn shutdown_all(&self) -> Vec<(EntityId, SessionError)> {
        let sessions: Vec<Arc<ProfileSession>> =
            self.sessions.iter().map(|s| Arc::clone(s.value())).collect();
        self.sessions.clear();
        tracing::info!(count = sessions.len(), "shutting down sessions");

        let mut failures = Vec::new();
        for session in sessions {
            if let Err(e) = session.shutdown().await {
                tracing::error!(entity = %session.entity(), error = %e, "final save failed");
                failures.push((session.entity().clone(), e));
            }
        }
        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use profsync_test_utils::{entity, ScriptedGateway};
    use serde_json::json;

    #[test]
    fn remote_mode_requires_gateway() {
        let err = SessionRegistry::new(ProfsyncConfig::default(), None).unwrap_err();
        assert!(matches!(err, ConfigError::MissingGateway));
    }

    #[tokio::test]
    async fn same_entity_shares_one_session() {
        let gateway = Arc::new(ScriptedGateway::new());
        let registry =
            SessionRegistry::new(ProfsyncConfig::default(), Some(gateway as Arc<dyn StorageGateway>))
                .unwrap();

        let a = registry.session(&entity("p1"));
        let b = registry.session(&entity("p1"));
        let c = registry.session(&entity("p2"));

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn close_flushes_and_removes() {
        let gateway = Arc::new(ScriptedGateway::new());
        let remote: Arc<dyn StorageGateway> = gateway.clone();
        let registry = SessionRegistry::new(ProfsyncConfig::default(), Some(remote)).unwrap();
        registry
            .session(&entity("p1"))
            .edit("name", json!("Ada"))
            .unwrap();

        let outcome = registry.close(&entity("p1")).await.unwrap().unwrap();

        assert!(outcome.ack().is_some());
        assert!(registry.get(&entity("p1")).is_none());
        assert_eq!(gateway.profile(&entity("p1")).get("name"), Some(&json!("Ada")));
        assert!(registry.close(&entity("p1")).await.is_none());
    }
}
