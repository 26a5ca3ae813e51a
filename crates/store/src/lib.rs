//! Local persistence for synced library data.
//!
//! The database is a cache of the remote library, not its source of truth:
//! if it is deleted, the next sync rebuilds it from scratch.
//!
//! # Architecture
//! - [`EntityStore`]: every library entry, media and user, deduplicated by
//!   key, persisted to SQLite and mirrored in memory. Consumers read it
//!   through live [`ReactiveQuery`] views.
//! - [`SyncCursors`]: when each library last synced completely, which makes
//!   subsequent syncs incremental.

mod cursor;
mod db;
pub mod error;
mod load;
mod models;
mod query;
mod store;

pub use crate::cursor::SyncCursors;
pub use crate::db::Database;
pub use crate::load::{DEFAULT_MAX_RETRIES, LoadDecision, LoadState, LoadTracker};
pub use crate::query::{ReactiveQuery, Subscription};
pub use crate::store::{EntityStore, Scope, UpsertReport};
