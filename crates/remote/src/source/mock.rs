//! In-memory remote source for testing.

use super::RemoteSource;
use crate::error::{ErrorKind, Result};
use crate::page::{PagedRequest, RawPage, RawRecord};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

#[derive(Default)]
struct Route {
    records: Vec<RawRecord>,
    included: Vec<RawRecord>,
    /// Number of upcoming requests that fail; `u32::MAX` fails forever.
    failures: u32,
}

/// Scripted remote source for testing.
///
/// Records are grouped into *routes*, selected by the value of one filter
/// (the route key) on each request; requests are paged over the route's
/// records exactly like a real listing endpoint would. Every request is
/// logged so tests can assert on what was asked for.
///
/// # Examples
///
/// ```
/// use kura_remote::{MockSource, PageCursor, PageDescriptor, PagedRequest, RemoteSource};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let source = MockSource::new("status").with_records("current", vec![b"{}".to_vec(); 3]);
/// let request = PagedRequest::new("/entries", PageDescriptor::first(2).unwrap()).filter("status", "current");
/// let page = source.fetch_page(&request).await.unwrap();
/// assert_eq!(page.len(), 2);
/// # Ok(())
/// # }
/// ```
pub struct MockSource {
    name: String,
    route_key: String,
    routes: RwLock<HashMap<String, Route>>,
    requests: Mutex<Vec<PagedRequest>>,
    latency: Option<Duration>,
}

impl MockSource {
    /// Create an empty mock source, routing requests on the value of the
    /// `route_key` filter. Requests for unknown routes get an empty page.
    pub fn new(route_key: impl Into<String>) -> Self {
        Self {
            name: "mock".to_string(),
            route_key: route_key.into(),
            routes: RwLock::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
            latency: None,
        }
    }

    /// Set the records served for a route (replacing any previous ones).
    pub fn with_records(mut self, route: impl Into<String>, records: Vec<RawRecord>) -> Self {
        self.routes.get_mut().entry(route.into()).or_default().records = records;
        self
    }

    /// Set related records that are side-loaded with every non-empty page
    /// of a route.
    pub fn with_included(mut self, route: impl Into<String>, included: Vec<RawRecord>) -> Self {
        self.routes.get_mut().entry(route.into()).or_default().included = included;
        self
    }

    /// Make the next `times` requests for a route fail with a network error.
    /// Pass `u32::MAX` for a route that never succeeds.
    pub fn failing(mut self, route: impl Into<String>, times: u32) -> Self {
        self.routes.get_mut().entry(route.into()).or_default().failures = times;
        self
    }

    /// Delay every response.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Replace the records of a route on a live source (e.g. to simulate the
    /// remote changing between two syncs).
    pub async fn set_records(&self, route: impl Into<String>, records: Vec<RawRecord>) {
        self.routes.write().await.entry(route.into()).or_default().records = records;
    }

    /// Every request received so far, in arrival order.
    pub async fn requests(&self) -> Vec<PagedRequest> {
        self.requests.lock().await.clone()
    }

    /// Every request received so far for one route, in arrival order.
    pub async fn requests_for(&self, route: &str) -> Vec<PagedRequest> {
        self.requests
            .lock()
            .await
            .iter()
            .filter(|r| r.filters().get(&self.route_key).is_some_and(|v| v == route))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl RemoteSource for MockSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_page(&self, request: &PagedRequest) -> Result<RawPage> {
        self.requests.lock().await.push(request.clone());
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let route = request.filters().get(&self.route_key).cloned().unwrap_or_default();
        let mut routes = self.routes.write().await;
        let Some(entry) = routes.get_mut(&route) else {
            return Ok(RawPage::default());
        };
        if entry.failures > 0 {
            if entry.failures != u32::MAX {
                entry.failures -= 1;
            }
            exn::bail!(ErrorKind::Network(format!("scripted failure for route {route:?}")));
        }
        let page = request.page();
        let len = entry.records.len();
        let start = usize::try_from(page.offset()).unwrap_or(usize::MAX).min(len);
        let end = start.saturating_add(usize::try_from(page.limit()).unwrap_or(usize::MAX)).min(len);
        let included = if start < end { entry.included.clone() } else { Vec::new() };
        Ok(RawPage::new(entry.records[start..end].to_vec()).with_included(included))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::{PageCursor, PageDescriptor};
    use rstest::rstest;

    fn records(n: usize) -> Vec<RawRecord> {
        (0..n).map(|i| i.to_string().into_bytes()).collect()
    }

    fn request(route: &str, limit: u64) -> PagedRequest {
        PagedRequest::new("/library-entries", PageDescriptor::first(limit).unwrap()).filter("status", route)
    }

    #[rstest]
    #[case::short_last_page(25, vec![20, 5])]
    #[case::exact_multiple(40, vec![20, 20, 0])]
    #[case::empty_listing(0, vec![0])]
    #[case::single_short_page(3, vec![3])]
    fn test_cursor_walks_until_short_page(#[case] total: usize, #[case] expected: Vec<usize>) {
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        runtime.block_on(async {
            let source = MockSource::new("status").with_records("current", records(total));
            let mut cursor = PageCursor::new(request("current", 20));
            let mut sizes = Vec::new();
            while let Some(page) = cursor.next_page(&source).await.unwrap() {
                sizes.push(page.len());
            }
            assert_eq!(sizes, expected);
            assert!(!cursor.has_more());
            // Exhausted cursors never hit the network again.
            assert!(cursor.next_page(&source).await.unwrap().is_none());
            assert_eq!(source.requests().await.len(), expected.len());
        });
    }

    #[tokio::test]
    async fn test_pages_are_delivered_in_order() {
        let source = MockSource::new("status").with_records("current", records(5));
        let mut cursor = PageCursor::new(request("current", 2));
        let mut seen = Vec::new();
        while let Some(page) = cursor.next_page(&source).await.unwrap() {
            seen.extend(page.records);
        }
        assert_eq!(seen, records(5));
        let offsets: Vec<_> = source.requests().await.iter().map(|r| r.page().offset()).collect();
        assert_eq!(offsets, vec![0, 2, 4]);
    }

    #[tokio::test]
    async fn test_failure_leaves_cursor_in_place() {
        let source = MockSource::new("status").with_records("current", records(3)).failing("current", 1);
        let mut cursor = PageCursor::new(request("current", 2));
        let err = cursor.next_page(&source).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(cursor.request().page().offset(), 0);
        assert_eq!(cursor.next_page(&source).await.unwrap().unwrap().len(), 2);
        assert_eq!(cursor.next_page(&source).await.unwrap().unwrap().len(), 1);
        assert!(!cursor.has_more());
    }

    #[tokio::test]
    async fn test_always_failing_route() {
        let source = MockSource::new("status").failing("dropped", u32::MAX);
        for _ in 0..10 {
            assert!(source.fetch_page(&request("dropped", 20)).await.is_err());
        }
        assert_eq!(source.requests_for("dropped").await.len(), 10);
        assert!(source.requests_for("current").await.is_empty());
    }

    #[tokio::test]
    async fn test_included_only_with_records() {
        let source = MockSource::new("status")
            .with_records("current", records(2))
            .with_included("current", vec![b"media".to_vec()]);
        let mut cursor = PageCursor::new(request("current", 2));
        let first = cursor.next_page(&source).await.unwrap().unwrap();
        assert_eq!(first.included, vec![b"media".to_vec()]);
        let last = cursor.next_page(&source).await.unwrap().unwrap();
        assert!(last.is_empty());
        assert!(last.included.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_route_is_empty() {
        let source = MockSource::new("status");
        let page = source.fetch_page(&request("planned", 20)).await.unwrap();
        assert!(page.is_empty());
    }
}
