//! Concurrent, incremental sync of remote media libraries.
//!
//! A sync fetches every [`Category`](kura_model::models::Category) of one
//! user's library in parallel (one [`CategoryFetchTask`] each), hands every
//! page to a [`PageSink`] as soon as it arrives, and only moves the
//! library's sync cursor forward once every category made it. The next sync
//! then only asks for what changed since.

pub mod error;
mod orchestrator;
mod sink;
mod task;
#[cfg(test)]
mod testing;

pub use crate::orchestrator::{
    CategoryFailure, DEFAULT_LIBRARY_PATH, DEFAULT_MAX_CONCURRENCY, DEFAULT_MAX_RETRY_COUNT, DEFAULT_PAGE_LIMIT,
    LibrarySync, SyncOptions, SyncReport, SyncRun, prune_missing,
};
pub use crate::sink::{PageSink, SinkHandle};
pub use crate::task::{CategoryFetchTask, FetchSummary, TaskState};
