//! Remote source trait and implementations.
//!
//! This module defines the [`RemoteSource`] trait: the single network
//! operation the sync engine needs, fetching one page of a filtered listing.

#[cfg(feature = "http")]
mod http;
#[cfg(feature = "mock")]
mod mock;

#[cfg(feature = "http")]
pub use self::http::HttpSource;
#[cfg(feature = "mock")]
pub use self::mock::MockSource;
use crate::error::Result;
use crate::page::{PagedRequest, RawPage};
use async_trait::async_trait;

/// Unified interface for remote listing endpoints.
///
/// # Examples
///
/// ```
/// use kura_remote::{PageCursor, PageDescriptor, PagedRequest, RemoteSource, error::Result};
///
/// async fn count_records(source: &dyn RemoteSource) -> Result<usize> {
///     let request = PagedRequest::new("/library-entries", PageDescriptor::first(50)?).filter("user_id", 1);
///     let mut cursor = PageCursor::new(request);
///     let mut total = 0;
///     while let Some(page) = cursor.next_page(source).await? {
///         total += page.len();
///     }
///     Ok(total)
/// }
/// ```
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Name of the source (used for logging only).
    fn name(&self) -> &str;

    /// Fetch one page of records for the given request.
    ///
    /// Implementations must return at most `request.page().limit()` records;
    /// returning fewer signals the end of the listing.
    async fn fetch_page(&self, request: &PagedRequest) -> Result<RawPage>;
}
