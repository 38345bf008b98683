//! # Offline crate — local-first writes and queue replay
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`desk`] | [`Desk`]: the write-through layer the view calls for every save, delete and list |
//! | [`engine`] | [`SyncEngine`]: replays the pending queue when the connection returns |
//! | [`context`] | [`SyncContext`]: session token, role and online status |
//! | [`activity_log`] | [`ActivityLog`]: user-visible notifications |
//!
//! A typical native setup shares one store, one API client and one context:
//!
//! ```ignore
//! let ctx = SyncContext::new(false);
//! let desk = Desk::new(FileStore::new(dir), HttpApi::new(url)?, ctx.clone(), ActivityLog::new());
//! desk.engine().run(&ctx).await;
//! ```

pub mod activity_log;
pub mod context;
pub mod desk;
pub mod engine;
pub mod error;

#[cfg(test)]
mod testing;

pub use activity_log::{ActivityLog, LogEntry, LogLevel};
pub use context::SyncContext;
pub use desk::{Desk, SaveOutcome};
pub use engine::{FlushReport, SkipReason, SyncEngine};
pub use error::DeskError;
