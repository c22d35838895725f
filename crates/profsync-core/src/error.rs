//! Error types for profsync Core

use profsync_types::{BatchUploadError, ReconciliationResult, Rejected, SaveError};
use std::path::PathBuf;

/// Errors surfaced by a [`crate::ProfileSession`]
#[derive(Debug, Clone, thiserror::Error)]
pub enum SessionError {
    /// Sanitizer refused a value; nothing was queued
    #[error(transparent)]
    Rejected(#[from] Rejected),

    /// Save failed or the session is closed
    #[error("save failed: {0}")]
    Save(#[from] SaveError),

    /// Upload batch failed (already rolled back)
    #[error("gallery upload failed: {0}")]
    Batch(#[from] BatchUploadError),

    /// Assets uploaded but the profile could not reference them; they
    /// were rolled back
    #[error("gallery reference write failed: {source}")]
    Gallery {
        /// Write failure
        source: SaveError,
        /// Rollback of the unreferenced assets
        reconciliation: ReconciliationResult,
    },
}

impl SessionError {
    /// Whether a caller-side retry could succeed
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Save(SaveError::Write(e)) | Self::Gallery { source: SaveError::Write(e), .. } => {
                e.is_retryable()
            }
            _ => false,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file unreadable
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Config file malformed
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Remote storage selected but no gateway supplied
    #[error("storage mode is remote but no gateway was provided")]
    MissingGateway,
}
