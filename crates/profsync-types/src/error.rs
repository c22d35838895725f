//! Error taxonomy
//!
//! - [`ValidationError`]: local pre-check failed, nothing touched the network
//! - [`WriteError`]: a profile write failed; pending edits are retained
//! - [`UploadError`]: one batch item failed; triggers rollback
//! - [`RollbackWarning`]: a compensating delete failed; never escalated
//! - [`SaveError`] / [`BatchUploadError`]: what the coordinators return

use crate::id::{BatchId, RemoteId};
use crate::reconcile::ReconciliationResult;
use serde::{Deserialize, Serialize};

/// Local pre-check failure (no remote effect)
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Batch has no assets
    #[error("upload batch is empty")]
    EmptyBatch,

    /// Batch has more assets than allowed
    #[error("upload batch has {len} assets (max: {max})")]
    BatchTooLarge { len: usize, max: usize },

    /// Asset has no content
    #[error("asset #{index} ({name}) is empty")]
    EmptyAsset { index: usize, name: String },

    /// Declared size does not match content
    #[error("asset #{index} ({name}) declares {declared} bytes but has {actual}")]
    SizeMismatch {
        index: usize,
        name: String,
        declared: u64,
        actual: u64,
    },

    /// Asset exceeds size limit
    #[error("asset #{index} ({name}) is {size} bytes (max: {max})")]
    TooLarge {
        index: usize,
        name: String,
        size: u64,
        max: u64,
    },

    /// Media type not on the allow-list
    #[error("asset #{index} ({name}) has unsupported media type {media_type}")]
    UnsupportedMediaType {
        index: usize,
        name: String,
        media_type: String,
    },
}

/// Remote profile write failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WriteError {
    /// Store refused the payload
    #[error("write rejected: {0}")]
    Rejected(String),

    /// Store reported a conflicting revision
    #[error("write conflict: {0}")]
    Conflict(String),

    /// Store unavailable or rate limited
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Transport failed before a response arrived
    #[error("transport error: {0}")]
    Transport(String),

    /// Write task ended without a result
    #[error("write task aborted")]
    Aborted,
}

impl WriteError {
    /// Whether a caller-side retry could succeed
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Unavailable(_) | Self::Transport(_) | Self::Aborted
        )
    }
}

/// Failure uploading one asset
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UploadError {
    /// Store refused the asset
    #[error("upload rejected: {0}")]
    Rejected(String),

    /// Store unavailable or rate limited
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Transport failed before a response arrived
    #[error("transport error: {0}")]
    Transport(String),

    /// Gateway panicked mid-upload
    #[error("upload aborted")]
    Aborted,
}

/// A compensating delete that failed; the asset is orphaned remotely
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("orphaned remote asset {remote_id}: {reason}")]
pub struct RollbackWarning {
    /// Asset left behind
    pub remote_id: RemoteId,
    /// Why the delete failed
    pub reason: String,
}

/// Error surfaced by the save scheduler
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SaveError {
    /// Remote write failed; pending edits retained
    #[error(transparent)]
    Write(#[from] WriteError),

    /// Scheduler already shut down
    #[error("save scheduler is closed")]
    Closed,
}

/// Terminal failure of an upload batch
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BatchUploadError {
    /// Rejected before any upload
    #[error("batch rejected: {0}")]
    Validation(#[from] ValidationError),

    /// An upload failed; earlier uploads were rolled back
    #[error("batch {batch} failed at asset #{index} ({asset}): {source}")]
    Upload {
        /// Batch that failed
        batch: BatchId,
        /// Position of the failed asset
        index: usize,
        /// Name of the failed asset
        asset: String,
        /// Upload failure
        source: UploadError,
        /// Rollback of the assets uploaded before the failure
        reconciliation: ReconciliationResult,
    },
}

impl BatchUploadError {
    /// Name of the asset whose upload failed
    #[must_use]
    pub fn failed_asset(&self) -> Option<&str> {
        match self {
            Self::Upload { asset, .. } => Some(asset),
            Self::Validation(_) => None,
        }
    }

    /// Rollback result, if any upload had happened
    #[must_use]
    pub fn reconciliation(&self) -> Option<&ReconciliationResult> {
        match self {
            Self::Upload { reconciliation, .. } => Some(reconciliation),
            Self::Validation(_) => None,
        }
    }

    /// Remote assets left behind by a failed rollback, for out-of-band cleanup
    #[must_use]
    pub fn orphans(&self) -> &[RollbackWarning] {
        self.reconciliation().map_or(&[], ReconciliationResult::failed)
    }

    /// Nothing reached the store
    #[inline]
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}
