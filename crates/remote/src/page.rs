//! Paginated requests.
//!
//! A [`PagedRequest`] describes one filtered query against a remote listing
//! endpoint plus the [`PageDescriptor`] window to fetch. A [`PageCursor`]
//! walks that query page by page until the remote runs out of results.

use crate::error::{ErrorKind, Result};
use crate::source::RemoteSource;
use std::collections::BTreeMap;

/// Raw bytes of one record, exactly as the remote returned it.
pub type RawRecord = Vec<u8>;

/// One page of results.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawPage {
    /// The records matching the query. Only these count towards the page size.
    pub records: Vec<RawRecord>,
    /// Related records side-loaded alongside the page (e.g. the media and
    /// users referenced by library entries).
    pub included: Vec<RawRecord>,
}
impl RawPage {
    pub fn new(records: Vec<RawRecord>) -> Self {
        Self { records, included: Vec::new() }
    }

    pub fn with_included(mut self, included: Vec<RawRecord>) -> Self {
        self.included = included;
        self
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Offset/limit window of a paginated query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageDescriptor {
    offset: u64,
    limit: u64,
}
impl PageDescriptor {
    /// Creates a page window. The limit must be positive.
    pub fn new(offset: u64, limit: u64) -> Result<Self> {
        if limit == 0 {
            exn::bail!(ErrorKind::InvalidRequest("page limit must be positive".to_string()));
        }
        Ok(Self { offset, limit })
    }

    /// The first page of the given size.
    pub fn first(limit: u64) -> Result<Self> {
        Self::new(0, limit)
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Returns the window following this one, given how many records the
    /// remote returned for it, or `None` if this was the last page.
    ///
    /// A short page (including an empty one) is the only end-of-results
    /// signal: a full page always means "ask again", even if the next page
    /// then turns out to be empty.
    pub fn advance(self, returned: usize) -> Option<Self> {
        // Infallible on every supported platform: usize is at most 64 bits.
        let returned = u64::try_from(returned).unwrap_or(u64::MAX);
        (returned >= self.limit).then(|| Self {
            offset: self.offset.saturating_add(self.limit),
            limit: self.limit,
        })
    }
}

/// A filtered, paginated query.
///
/// Filters are opaque key/value pairs handed to the [`RemoteSource`]
/// unchanged; nothing in this crate interprets them.
///
/// # Examples
///
/// ```
/// use kura_remote::{PageDescriptor, PagedRequest};
///
/// let request = PagedRequest::new("/library-entries", PageDescriptor::first(20).unwrap())
///     .filter("user_id", 42)
///     .filter("status", "current")
///     .include("media");
/// assert_eq!(request.filters().get("user_id").map(String::as_str), Some("42"));
/// assert_eq!(request.page().offset(), 0);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PagedRequest {
    path: String,
    filters: BTreeMap<String, String>,
    includes: Vec<String>,
    page: PageDescriptor,
}
impl PagedRequest {
    pub fn new(path: impl Into<String>, page: PageDescriptor) -> Self {
        Self {
            path: path.into(),
            filters: BTreeMap::new(),
            includes: Vec::new(),
            page,
        }
    }

    /// Adds (or replaces) a filter.
    pub fn filter(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.filters.insert(key.into(), value.to_string());
        self
    }

    /// Asks the remote to side-load a related resource.
    pub fn include(mut self, relation: impl Into<String>) -> Self {
        let relation = relation.into();
        if !self.includes.contains(&relation) {
            self.includes.push(relation);
        }
        self
    }

    pub fn with_page(mut self, page: PageDescriptor) -> Self {
        self.page = page;
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn filters(&self) -> &BTreeMap<String, String> {
        &self.filters
    }

    pub fn includes(&self) -> &[String] {
        &self.includes
    }

    pub fn page(&self) -> PageDescriptor {
        self.page
    }
}

/// Walks a [`PagedRequest`] until the remote is exhausted.
///
/// Pages are strictly sequential: the window for page `n + 1` is only known
/// once page `n` has come back.
#[derive(Debug, Clone)]
pub struct PageCursor {
    request: PagedRequest,
    exhausted: bool,
}
impl PageCursor {
    pub fn new(request: PagedRequest) -> Self {
        Self { request, exhausted: false }
    }

    /// The request that the next call to [`next_page`](Self::next_page) will send.
    pub fn request(&self) -> &PagedRequest {
        &self.request
    }

    /// Returns `false` once a short page has been received.
    pub fn has_more(&self) -> bool {
        !self.exhausted
    }

    /// Fetches the next page and advances the cursor.
    ///
    /// Returns `Ok(None)` once the cursor is exhausted. On error the cursor
    /// is left untouched, so the same page can be requested again.
    pub async fn next_page(&mut self, source: &dyn RemoteSource) -> Result<Option<RawPage>> {
        if self.exhausted {
            return Ok(None);
        }
        let page = source.fetch_page(&self.request).await?;
        match self.request.page.advance(page.len()) {
            Some(next) => self.request.page = next,
            None => {
                tracing::trace!(
                    source = source.name(),
                    path = self.request.path(),
                    offset = self.request.page.offset(),
                    "listing exhausted"
                );
                self.exhausted = true;
            },
        }
        Ok(Some(page))
    }
}
