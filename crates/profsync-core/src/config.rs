//! Runtime configuration
//!
//! Loaded from TOML. Every section and every key is optional; missing
//! values fall back to the defaults below.
//!
//! ```toml
//! [save]
//! debounce_ms = 1500
//! status_clear_ms = 3000
//! gallery_field = "gallery"
//!
//! [upload]
//! max_asset_bytes = 10485760
//! max_batch_len = 10
//! allowed_media_types = ["image/jpeg", "image/png"]
//!
//! [storage]
//! mode = "remote"
//! ```

use crate::error::ConfigError;
use profsync_save::{SchedulerConfig, DEFAULT_DEBOUNCE};
use profsync_upload::AssetPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default delay before a `Saved`/`Failed` status returns to idle
pub const DEFAULT_STATUS_CLEAR: Duration = Duration::from_secs(3);

/// Default profile field holding the gallery URLs
pub const DEFAULT_GALLERY_FIELD: &str = "gallery";

/// Default event bus capacity
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfsyncConfig {
    /// Save scheduling
    pub save: SaveConfig,
    /// Asset validation limits
    pub upload: AssetPolicy,
    /// Storage backend selection
    pub storage: StorageConfig,
    /// Events buffered per subscriber before it lags
    pub event_capacity: usize,
}

/// `[save]` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SaveConfig {
    /// Debounce window in milliseconds
    pub debounce_ms: u64,
    /// Delay before a terminal status clears, in milliseconds
    pub status_clear_ms: u64,
    /// Profile field that references the gallery
    pub gallery_field: String,
}

/// `[storage]` section
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Which backend sessions write to
    pub mode: StorageMode,
}

/// Storage backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageMode {
    /// Caller-supplied remote gateway
    #[default]
    Remote,
    /// In-process [`crate::LocalStore`]; nothing survives the process
    Local,
}

impl ProfsyncConfig {
    /// Parse from a TOML document
    ///
    /// # Errors
    /// [`ConfigError::Parse`] if the document is malformed
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(source)?)
    }

    /// Read and parse a TOML file
    ///
    /// # Errors
    /// [`ConfigError::Io`] or [`ConfigError::Parse`]
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&source)?;
        tracing::debug!(path = %path.display(), mode = ?config.storage.mode, "config loaded");
        Ok(config)
    }

    /// Render as TOML
    ///
    /// # Errors
    /// Only if a value cannot be represented in TOML
    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// With debounce window
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.save.debounce_ms = debounce.as_millis() as u64;
        self
    }

    /// With status clear delay
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn with_status_clear(mut self, after: Duration) -> Self {
        self.save.status_clear_ms = after.as_millis() as u64;
        self
    }

    /// With asset policy
    #[must_use]
    pub fn with_asset_policy(mut self, policy: AssetPolicy) -> Self {
        self.upload = policy;
        self
    }

    /// With storage backend
    #[must_use]
    pub fn with_storage_mode(mut self, mode: StorageMode) -> Self {
        self.storage.mode = mode;
        self
    }

    /// Debounce window
    #[inline]
    #[must_use]
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.save.debounce_ms)
    }

    /// Status clear delay
    #[inline]
    #[must_use]
    pub fn status_clear_after(&self) -> Duration {
        Duration::from_millis(self.save.status_clear_ms)
    }

    /// Scheduler settings derived from `[save]`
    #[must_use]
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig::default().with_debounce(self.debounce())
    }
}

impl Default for ProfsyncConfig {
    fn default() -> Self {
        Self {
            save: SaveConfig::default(),
            upload: AssetPolicy::default(),
            storage: StorageConfig::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl Default for SaveConfig {
    #[allow(clippy::cast_possible_truncation)]
    fn default() -> Self {
        Self {
            debounce_ms: DEFAULT_DEBOUNCE.as_millis() as u64,
            status_clear_ms: DEFAULT_STATUS_CLEAR.as_millis() as u64,
            gallery_field: DEFAULT_GALLERY_FIELD.to_string(),
        }
    }
}
