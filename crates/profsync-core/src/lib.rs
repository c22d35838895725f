//! profsync Core
//!
//! Entry point for applications: configuration, per-entity editing
//! sessions and the storage backend they share.
//!
//! # Architecture
//!
//! ```text
//! SessionRegistry ──▶ ProfileSession ──┬─▶ Sanitizer
//!        │                             ├─▶ SaveScheduler ──────────┐
//!        │                             ├─▶ BatchUploadCoordinator ─┤
//!        │                             └─▶ StatusIndicator         ▼
//!        └──────────── EventBus ◀──────────────────────── StorageGateway
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use profsync_core::prelude::*;
//!
//! let config = ProfsyncConfig::load("profsync.toml")?;
//! let registry = SessionRegistry::new(config, Some(gateway))?;
//! let session = registry.session(&EntityId::new("p1"));
//! session.edit("bio", json!("hello"))?;
//! session.replace_gallery(vec![asset]).await?;
//! registry.shutdown_all().await;
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

mod config;
mod error;
mod local;
mod registry;
mod session;
mod status;

pub use config::{
    ProfsyncConfig, SaveConfig, StorageConfig, StorageMode, DEFAULT_EVENT_CAPACITY,
    DEFAULT_GALLERY_FIELD, DEFAULT_STATUS_CLEAR,
};
pub use error::{ConfigError, SessionError};
pub use local::{LocalStore, StoredAsset};
pub use registry::SessionRegistry;
pub use session::{GalleryEntry, ProfileSession};
pub use status::{SaveStatus, StatusIndicator};

pub use profsync_save::{FlushOutcome, SaveScheduler, SchedulerConfig};
pub use profsync_types as types;
pub use profsync_upload::{AssetPolicy, BatchProgress, BatchUploadCoordinator, RollbackEngine};

/// Common imports
pub mod prelude {
    pub use crate::{
        ConfigError, FlushOutcome, GalleryEntry, ProfileSession, ProfsyncConfig, SaveStatus,
        SessionError, SessionRegistry, StorageMode,
    };
    pub use profsync_types::{
        Asset, EntityId, FieldValue, PendingEdit, Sanitizer, StorageGateway, SyncEvent,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
