//! profsync Save Scheduling
//!
//! Turns a stream of small, frequent field edits for one entity into a
//! bounded rate of remote writes.
//!
//! # Guarantees
//!
//! - Edits inside the debounce window coalesce into one write
//! - At most one write per entity is in flight
//! - Edits that arrive during a write trigger exactly one follow-up write
//! - A failed write keeps its edits for the next save
//!
//! # Example
//!
//! ```rust,ignore
//! use profsync_save::{SaveScheduler, SchedulerConfig};
//! use profsync_types::{EventBus, PendingEdit};
//! use serde_json::json;
//!
//! let scheduler = SaveScheduler::new(entity, gateway, EventBus::default(), SchedulerConfig::default());
//! scheduler.enqueue(PendingEdit::single("bio", json!("a")))?;
//! scheduler.flush_now(PendingEdit::single("name", json!("Ada"))).await?;
//! scheduler.shutdown().await?;
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

mod scheduler;

pub use scheduler::{
    FlushOutcome, SaveScheduler, SchedulerConfig, SchedulerObserver, DEFAULT_DEBOUNCE,
};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
