//! Rollback outcomes

use crate::error::RollbackWarning;
use crate::id::RemoteId;
use serde::{Deserialize, Serialize};

/// Result of deleting one remote asset
///
/// Deletes never raise; every outcome is data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeleteOutcome {
    /// Asset removed
    Deleted,
    /// Asset was already absent
    NotFound,
    /// Delete failed
    Failed {
        /// Store-reported reason
        reason: String,
    },
}

impl DeleteOutcome {
    /// Failed outcome
    #[inline]
    #[must_use]
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }

    /// Desired end state reached (deleted or already gone)
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Deleted | Self::NotFound)
    }
}

/// Outcome of one rollback, immutable once produced
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationResult {
    succeeded: Vec<RemoteId>,
    not_found: Vec<RemoteId>,
    failed: Vec<RollbackWarning>,
}

impl ReconciliationResult {
    /// Classify per-asset delete outcomes, preserving input order
    #[must_use]
    pub fn from_outcomes(outcomes: impl IntoIterator<Item = (RemoteId, DeleteOutcome)>) -> Self {
        let mut result = Self::default();
        for (remote_id, outcome) in outcomes {
            match outcome {
                DeleteOutcome::Deleted => result.succeeded.push(remote_id),
                DeleteOutcome::NotFound => {
                    result.not_found.push(remote_id.clone());
                    result.succeeded.push(remote_id);
                }
                DeleteOutcome::Failed { reason } => {
                    result.failed.push(RollbackWarning { remote_id, reason });
                }
            }
        }
        result
    }

    /// Assets confirmed absent (includes not-found)
    #[inline]
    #[must_use]
    pub fn succeeded(&self) -> &[RemoteId] {
        &self.succeeded
    }

    /// Subset of [`Self::succeeded`] that was already gone
    #[inline]
    #[must_use]
    pub fn not_found(&self) -> &[RemoteId] {
        &self.not_found
    }

    /// Deletes that failed; orphaned remote assets
    #[inline]
    #[must_use]
    pub fn failed(&self) -> &[RollbackWarning] {
        &self.failed
    }

    /// Every asset is confirmed absent
    #[inline]
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    /// Number of assets rollback was asked to remove
    #[inline]
    #[must_use]
    pub fn attempted(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }
}
