//! profsync Batch Uploads
//!
//! Uploads a set of assets as a unit: either every asset ends up stored, or
//! the ones that made it are deleted again.
//!
//! # Core Concepts
//!
//! - [`AssetPolicy`]: local pre-checks, run before anything touches the store
//! - [`BatchUploadCoordinator`]: sequential uploads with progress reporting
//! - [`RollbackEngine`]: best-effort, independent compensating deletes
//!
//! # Example
//!
//! ```rust,ignore
//! use profsync_upload::{AssetPolicy, BatchUploadCoordinator};
//!
//! let coordinator = BatchUploadCoordinator::new(entity, gateway, events, AssetPolicy::default());
//! match coordinator.run(assets).await {
//!     Ok(uploaded) => gallery.replace(uploaded),
//!     Err(e) => eprintln!("batch failed, {} orphans", e.orphans().len()),
//! }
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

mod coordinator;
mod policy;
mod rollback;

pub use coordinator::{BatchProgress, BatchUploadCoordinator};
pub use policy::AssetPolicy;
pub use rollback::RollbackEngine;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
