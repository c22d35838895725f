//! profsync Types
//!
//! Shared vocabulary for the profsync workspace.
//!
//! # Core Concepts
//!
//! - [`PendingEdit`]: field-wise last-write-wins accumulation of profile edits
//! - [`Asset`] / [`UploadedAsset`]: one image before and after upload
//! - [`ReconciliationResult`]: outcome of a compensating rollback
//! - [`StorageGateway`]: the remote store (write, upload, delete)
//! - [`Sanitizer`]: cleans raw field values before they enter the core
//! - [`EventBus`]: caller-visible [`SyncEvent`] stream
//!
//! # Example
//!
//! ```rust
//! use profsync_types::PendingEdit;
//! use serde_json::json;
//!
//! let mut edit = PendingEdit::single("bio", json!("a"));
//! edit.merge(PendingEdit::single("bio", json!("ab")));
//! assert_eq!(edit.get("bio"), Some(&json!("ab")));
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

mod asset;
mod edit;
mod error;
mod event;
mod gateway;
mod id;
mod reconcile;
mod sanitize;

pub use asset::{Asset, MediaType, UploadedAsset};
pub use edit::{FieldValue, PendingEdit, WriteAck};
pub use error::{
    BatchUploadError, RollbackWarning, SaveError, UploadError, ValidationError, WriteError,
};
pub use event::{EventBus, SyncEvent};
pub use gateway::StorageGateway;
pub use id::{BatchId, EntityId, RemoteId};
pub use reconcile::{DeleteOutcome, ReconciliationResult};
pub use sanitize::{PassthroughSanitizer, Rejected, Sanitizer};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
