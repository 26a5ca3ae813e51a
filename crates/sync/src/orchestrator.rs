//! Full library sync.
//!
//! A library is split into one [`Category`] per status, and every category is
//! fetched by its own [`CategoryFetchTask`]. [`LibrarySync`] runs those tasks
//! with bounded concurrency, retries the ones that fail transiently, and
//! reports once every category is done.

use crate::error::{Error, ErrorKind, Result};
use crate::sink::{PageSink, SinkHandle};
use crate::task::{CategoryFetchTask, FetchSummary};
use exn::ResultExt;
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use kura_model::ParserHandle;
use kura_model::models::{Category, LibraryEntry, MediaKind};
use kura_remote::{PageDescriptor, PagedRequest, SourceHandle};
use kura_store::{EntityStore, Scope, SyncCursors};
use std::collections::{HashMap, HashSet, VecDeque};
use time::format_description::well_known::Rfc3339;
use time::{OffsetDateTime, UtcDateTime};
use tokio::sync::oneshot;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::instrument;

/// Default endpoint of the library listing.
pub const DEFAULT_LIBRARY_PATH: &str = "/library-entries";
/// Default number of entries per page.
pub const DEFAULT_PAGE_LIMIT: u64 = 20;
/// Default number of categories fetched at the same time.
pub const DEFAULT_MAX_CONCURRENCY: usize = 5;
/// Default number of times a failed category is retried.
pub const DEFAULT_MAX_RETRY_COUNT: u32 = 3;

const EPOCH: &str = "1970-01-01T00:00:00Z";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOptions {
    /// Path of the library listing, relative to the remote's base URL.
    pub library_path: String,
    pub page_limit: u64,
    pub max_concurrency: usize,
    /// How many times a category is retried after a transient failure (so
    /// it is attempted at most `max_retry_count + 1` times).
    pub max_retry_count: u32,
}
impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            library_path: DEFAULT_LIBRARY_PATH.to_string(),
            page_limit: DEFAULT_PAGE_LIMIT,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            max_retry_count: DEFAULT_MAX_RETRY_COUNT,
        }
    }
}
impl SyncOptions {
    fn validate(&self) -> Result<()> {
        if self.page_limit == 0 {
            exn::bail!(ErrorKind::InvalidOptions("page limit must be positive"));
        }
        if self.max_concurrency == 0 {
            exn::bail!(ErrorKind::InvalidOptions("max concurrency must be positive"));
        }
        if self.library_path.is_empty() {
            exn::bail!(ErrorKind::InvalidOptions("library path must not be empty"));
        }
        Ok(())
    }
}

/// A category that could not be synced.
#[derive(Debug)]
pub struct CategoryFailure {
    pub category: Category,
    /// How many times the category was launched (zero if the sync was
    /// cancelled before it ever started).
    pub attempts: u32,
    pub error: Error,
}

/// Outcome of a sync run. Produced exactly once per run.
#[derive(Debug)]
pub struct SyncReport {
    pub owner_id: i64,
    pub media_kind: MediaKind,
    /// When the run started; the cursor moves here if the run succeeded.
    pub started_at: UtcDateTime,
    /// Only changes after this instant were requested.
    pub since: UtcDateTime,
    pub completed: Vec<FetchSummary>,
    pub failures: Vec<CategoryFailure>,
    pub cursor_advanced: bool,
}
impl SyncReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// `true` if every entry of the library was requested, not just the
    /// recently changed ones.
    pub fn is_full(&self) -> bool {
        self.since == UtcDateTime::UNIX_EPOCH
    }

    /// Ids of every library entry received during the run.
    pub fn fetched_entries(&self) -> HashSet<i64> {
        self.completed.iter().flat_map(|summary| summary.entry_ids.iter().copied()).collect()
    }
}

/// Syncs whole libraries from a remote source.
///
/// Cloning is cheap; clones share the source, parser and cursors.
#[derive(Clone)]
pub struct LibrarySync {
    source: SourceHandle,
    parser: ParserHandle,
    cursors: SyncCursors,
    options: SyncOptions,
}
impl LibrarySync {
    pub fn new(source: SourceHandle, parser: ParserHandle, cursors: SyncCursors, options: SyncOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            source,
            parser,
            cursors,
            options,
        })
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    fn request(&self, owner_id: i64, media_kind: MediaKind, category: Category, since: &str) -> Result<PagedRequest> {
        let page = PageDescriptor::first(self.options.page_limit)
            .or_raise(|| ErrorKind::InvalidOptions("page limit must be positive"))?;
        Ok(PagedRequest::new(&self.options.library_path, page)
            .filter("user_id", owner_id)
            .filter("media_type", media_kind.library_filter())
            .filter("status", category.as_str())
            .filter("since", since)
            .include("media")
            .include("user"))
    }

    async fn baseline(&self, owner_id: i64, media_kind: MediaKind) -> UtcDateTime {
        match self.cursors.get(owner_id, media_kind).await {
            Ok(Some(at)) => at,
            Ok(None) => UtcDateTime::UNIX_EPOCH,
            Err(err) => {
                // A full fetch is always correct, just slower.
                tracing::warn!(error = ?err, "could not read sync cursor, fetching everything");
                UtcDateTime::UNIX_EPOCH
            },
        }
    }

    /// Syncs every category of one library, delivering each page to `sink`
    /// as soon as it arrives.
    ///
    /// Always returns a report, even when every category failed or the run
    /// was cancelled. The sync cursor only advances if every category
    /// completed.
    #[instrument(skip(self, media_kind, sink, cancel), fields(%media_kind))]
    pub async fn run(
        &self,
        owner_id: i64,
        media_kind: MediaKind,
        sink: &dyn PageSink,
        cancel: &CancellationToken,
    ) -> SyncReport {
        let now = UtcDateTime::now();
        // The cursor only has second precision.
        let started_at = UtcDateTime::from_unix_timestamp(now.unix_timestamp()).unwrap_or(now);
        let since = self.baseline(owner_id, media_kind).await;
        let since_filter = OffsetDateTime::from_unix_timestamp(since.unix_timestamp())
            .ok()
            .and_then(|at| at.format(&Rfc3339).ok())
            .unwrap_or_else(|| EPOCH.to_string());
        tracing::info!(since = %since_filter, "starting library sync");

        let mut queue: VecDeque<Category> = Category::ALL.into_iter().collect();
        let mut attempts: HashMap<Category, u32> = HashMap::new();
        let mut completed = Vec::new();
        let mut failures = Vec::new();
        let mut running = FuturesUnordered::new();
        loop {
            while running.len() < self.options.max_concurrency && !cancel.is_cancelled() {
                let Some(category) = queue.pop_front() else {
                    break;
                };
                let attempt = *attempts.entry(category).and_modify(|a| *a += 1).or_insert(1);
                let request = match self.request(owner_id, media_kind, category, &since_filter) {
                    Ok(request) => request,
                    Err(error) => {
                        failures.push(CategoryFailure { category, attempts: attempt, error });
                        continue;
                    },
                };
                let task = CategoryFetchTask::new(
                    category,
                    request,
                    self.source.clone(),
                    self.parser.clone(),
                    cancel.child_token(),
                );
                running.push(async move { (category, attempt, task.run(sink).await) });
            }
            let Some((category, attempt, outcome)) = running.next().await else {
                break;
            };
            match outcome {
                Ok(summary) => {
                    tracing::debug!(%category, attempt, entities = summary.entities, "category synced");
                    completed.push(summary);
                },
                Err(error) if error.is_retryable() && attempt <= self.options.max_retry_count && !cancel.is_cancelled() => {
                    tracing::warn!(%category, attempt, error = ?error, "category failed, retrying");
                    // Retry before moving on to categories that were never tried.
                    queue.push_front(category);
                },
                Err(error) => {
                    tracing::warn!(%category, attempt, error = ?error, "category failed");
                    failures.push(CategoryFailure { category, attempts: attempt, error });
                },
            }
        }
        // Only reachable with categories left over if the run was cancelled.
        for category in queue.drain(..) {
            failures.push(CategoryFailure {
                category,
                attempts: attempts.get(&category).copied().unwrap_or(0),
                error: exn::Exn::from(ErrorKind::Cancelled),
            });
        }

        let cursor_advanced = failures.is_empty()
            && match self.cursors.advance(owner_id, media_kind, started_at).await {
                Ok(()) => true,
                Err(err) => {
                    tracing::error!(error = ?err, "could not advance sync cursor");
                    false
                },
            };
        tracing::info!(completed = completed.len(), failed = failures.len(), cursor_advanced, "library sync finished");
        SyncReport {
            owner_id,
            media_kind,
            started_at,
            since,
            completed,
            failures,
            cursor_advanced,
        }
    }

    /// Starts syncing a library in the background.
    ///
    /// Dropping the returned [`SyncRun`] cancels the sync.
    pub fn start(&self, owner_id: i64, media_kind: MediaKind, sink: SinkHandle) -> SyncRun {
        let cancel = CancellationToken::new();
        let (sender, receiver) = oneshot::channel();
        let sync = self.clone();
        let token = cancel.clone();
        tokio::spawn(async move {
            let report = sync.run(owner_id, media_kind, sink.as_ref(), &token).await;
            // The receiver may be gone already; nobody is waiting for the report then.
            _ = sender.send(report);
        });
        SyncRun {
            _guard: cancel.clone().drop_guard(),
            cancel,
            receiver,
        }
    }
}

/// Handle on a sync started with [`LibrarySync::start`].
pub struct SyncRun {
    cancel: CancellationToken,
    receiver: oneshot::Receiver<SyncReport>,
    _guard: DropGuard,
}
impl SyncRun {
    /// Cancels the sync. The report is still produced, listing every
    /// unfinished category as cancelled.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Waits for the report.
    pub async fn wait(self) -> Result<SyncReport> {
        let Self { receiver, _guard, .. } = self;
        let report = receiver.await.or_raise(|| ErrorKind::Aborted)?;
        // The run is over; defuse so dropping the guard doesn't cancel anything.
        _guard.disarm();
        Ok(report)
    }
}

/// After a successful full sync, deletes every stored entry of the library
/// that the remote no longer returned. Returns how many entries were deleted.
///
/// Incremental or failed runs only saw part of the library, so nothing is
/// deleted for them.
pub async fn prune_missing(store: &EntityStore, report: &SyncReport) -> Result<usize> {
    if !report.is_full() || !report.is_success() {
        return Ok(0);
    }
    let scope = Scope {
        owner_id: Some(report.owner_id),
        media_kind: Some(report.media_kind),
        category: None,
    };
    store.delete_missing::<LibraryEntry>(&report.fetched_entries(), scope).await.or_raise(|| ErrorKind::Storage)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{OWNER, anime_record, category_records, entry_record, user_record};
    use async_trait::async_trait;
    use kura_model::models::{Entity, Media};
    use kura_model::{JsonApiParser, Parse};
    use kura_remote::error::Result as RemoteResult;
    use kura_remote::{MockSource, RawPage, RemoteSource};
    use kura_store::Database;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Stores every batch, counting deliveries.
    struct CountingSink {
        store: EntityStore,
        calls: AtomicUsize,
    }
    #[async_trait]
    impl PageSink for CountingSink {
        async fn on_fetch(&self, entities: Vec<Entity>) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.store.on_fetch(entities).await
        }
    }

    struct BrokenSink;
    #[async_trait]
    impl PageSink for BrokenSink {
        async fn on_fetch(&self, _entities: Vec<Entity>) -> Result<()> {
            exn::bail!(ErrorKind::Storage)
        }
    }

    /// Tracks how many requests are in flight at once.
    struct Gauge {
        inner: MockSource,
        current: AtomicUsize,
        peak: AtomicUsize,
    }
    #[async_trait]
    impl RemoteSource for Gauge {
        fn name(&self) -> &str {
            "gauge"
        }

        async fn fetch_page(&self, request: &PagedRequest) -> RemoteResult<RawPage> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            let page = self.inner.fetch_page(request).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            page
        }
    }

    /// Every category holds `per_category` entries; every non-empty page
    /// side-loads the same three anime and the owner.
    fn library(per_category: usize) -> MockSource {
        Category::ALL.into_iter().fold(MockSource::new("status"), |source, category| {
            source
                .with_records(category.as_str(), category_records(category, per_category))
                .with_included(category.as_str(), vec![anime_record(1), anime_record(2), anime_record(3), user_record()])
        })
    }

    struct Fixture {
        db: Database,
        store: EntityStore,
        source: Arc<MockSource>,
        sync: LibrarySync,
    }

    async fn fixture(source: MockSource, options: SyncOptions) -> Fixture {
        let db = Database::connect_in_memory().await.unwrap();
        let store = EntityStore::open(&db).await.unwrap();
        let source = Arc::new(source);
        let sync = LibrarySync::new(source.clone(), Arc::new(JsonApiParser), SyncCursors::from(&db), options).unwrap();
        Fixture { db, store, source, sync }
    }

    fn rfc3339(at: UtcDateTime) -> String {
        OffsetDateTime::from_unix_timestamp(at.unix_timestamp()).unwrap().format(&Rfc3339).unwrap()
    }

    #[tokio::test]
    async fn test_full_sync() {
        let f = fixture(library(25), SyncOptions::default()).await;
        let sink = CountingSink { store: f.store.clone(), calls: AtomicUsize::new(0) };
        let report = f.sync.run(OWNER, MediaKind::Anime, &sink, &CancellationToken::new()).await;

        assert!(report.is_success(), "{:?}", report.failures);
        assert!(report.is_full());
        assert_eq!(report.completed.len(), 5);
        // Two pages per category (20 + 5), each delivered once.
        assert_eq!(sink.calls.load(Ordering::SeqCst), 10);
        assert_eq!(f.source.requests().await.len(), 10);
        assert!(report.cursor_advanced);
        let cursor = SyncCursors::from(&f.db).get(OWNER, MediaKind::Anime).await.unwrap();
        assert_eq!(cursor, Some(report.started_at));

        // Media shared by every category is stored once.
        assert_eq!(f.store.query::<Media>(|_| true, |a, b| a.id.cmp(&b.id)).len(), 3);
        assert_eq!(f.store.len(), 5 * 25 + 3 + 1);
        for category in Category::ALL {
            assert_eq!(f.store.library(OWNER, MediaKind::Anime, category).len(), 25);
        }
    }

    #[tokio::test]
    async fn test_requests_carry_library_filters() {
        let f = fixture(library(1), SyncOptions::default()).await;
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        f.sync.run(OWNER, MediaKind::Manga, &tx, &CancellationToken::new()).await;
        let requests = f.source.requests().await;
        assert_eq!(requests.len(), 5);
        for request in &requests {
            assert_eq!(request.path(), DEFAULT_LIBRARY_PATH);
            assert_eq!(request.filters()["user_id"], OWNER.to_string());
            assert_eq!(request.filters()["media_type"], "Manga");
            assert_eq!(request.filters()["since"], EPOCH);
            assert_eq!(request.includes(), ["media".to_string(), "user".to_string()]);
        }
        let statuses: HashSet<&str> = requests.iter().map(|r| r.filters()["status"].as_str()).collect();
        assert_eq!(statuses, Category::ALL.iter().map(Category::as_str).collect::<HashSet<_>>());
    }

    #[tokio::test]
    async fn test_retry_bound_after_consecutive_failures() {
        let f = fixture(library(5).failing("current", 4), SyncOptions::default()).await;
        let report = f.sync.run(OWNER, MediaKind::Anime, &f.store, &CancellationToken::new()).await;

        assert_eq!(report.failures.len(), 1);
        let failure = &report.failures[0];
        assert_eq!(failure.category, Category::Current);
        assert_eq!(failure.attempts, 4);
        assert_eq!(*failure.error, ErrorKind::Remote);
        assert_eq!(f.source.requests_for("current").await.len(), 4);
        assert_eq!(report.completed.len(), 4);
        assert!(!report.cursor_advanced);
        assert_eq!(SyncCursors::from(&f.db).get(OWNER, MediaKind::Anime).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let f = fixture(library(5).failing("planned", 2), SyncOptions::default()).await;
        let report = f.sync.run(OWNER, MediaKind::Anime, &f.store, &CancellationToken::new()).await;
        assert!(report.is_success());
        // Two failures, then a single short page.
        assert_eq!(f.source.requests_for("planned").await.len(), 3);
        assert_eq!(f.store.library(OWNER, MediaKind::Anime, Category::Planned).len(), 5);
    }

    #[tokio::test]
    async fn test_every_category_failing() {
        let source = Category::ALL.into_iter().fold(MockSource::new("status"), |source, category| {
            source.failing(category.as_str(), u32::MAX)
        });
        let f = fixture(source, SyncOptions::default()).await;
        let report = f.sync.run(OWNER, MediaKind::Anime, &f.store, &CancellationToken::new()).await;
        assert_eq!(report.failures.len(), 5);
        assert!(report.failures.iter().all(|failure| failure.attempts == 4));
        assert_eq!(f.source.requests().await.len(), 20);
        assert!(!report.cursor_advanced);
    }

    #[tokio::test]
    async fn test_storage_failures_are_not_retried() {
        let f = fixture(library(5), SyncOptions::default()).await;
        let report = f.sync.run(OWNER, MediaKind::Anime, &BrokenSink, &CancellationToken::new()).await;
        assert_eq!(report.failures.len(), 5);
        for failure in &report.failures {
            assert_eq!(failure.attempts, 1);
            assert_eq!(*failure.error, ErrorKind::Storage);
        }
        assert_eq!(f.source.requests().await.len(), 5);
    }

    #[tokio::test]
    async fn test_second_sync_is_incremental() {
        let f = fixture(library(3), SyncOptions::default()).await;
        let first = f.sync.run(OWNER, MediaKind::Anime, &f.store, &CancellationToken::new()).await;
        assert!(first.cursor_advanced);
        let before = f.source.requests().await.len();

        let second = f.sync.run(OWNER, MediaKind::Anime, &f.store, &CancellationToken::new()).await;
        assert!(!second.is_full());
        assert_eq!(second.since, first.started_at);
        let requests = f.source.requests().await;
        let expected = rfc3339(first.started_at);
        assert!(requests[before..].iter().all(|r| r.filters()["since"] == expected));
        // Other libraries of the same user still start from scratch.
        assert_eq!(SyncCursors::from(&f.db).get(OWNER, MediaKind::Manga).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_remote_changes_between_syncs() {
        let f = fixture(library(3), SyncOptions::default()).await;
        let first = f.sync.run(OWNER, MediaKind::Anime, &f.store, &CancellationToken::new()).await;
        assert!(first.is_success());

        // One entry kept, two gone, one new.
        let mut current = category_records(Category::Current, 1);
        current.push(entry_record(5000, 2, Category::Current));
        f.source.set_records(Category::Current.as_str(), current).await;

        let second = f.sync.run(OWNER, MediaKind::Anime, &f.store, &CancellationToken::new()).await;
        assert!(second.is_success());
        assert_eq!(second.since, first.started_at);
        let library = f.store.library(OWNER, MediaKind::Anime, Category::Current);
        assert_eq!(library.len(), 4);
        assert!(library.current_items().iter().any(|entry| entry.id == 5000));
        // An incremental run cannot tell what was removed.
        assert_eq!(prune_missing(&f.store, &second).await.unwrap(), 0);

        assert!(SyncCursors::from(&f.db).reset(OWNER, MediaKind::Anime).await.unwrap());
        let third = f.sync.run(OWNER, MediaKind::Anime, &f.store, &CancellationToken::new()).await;
        assert!(third.is_full());
        assert_eq!(prune_missing(&f.store, &third).await.unwrap(), 2);
        assert_eq!(library.len(), 2);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        for max_concurrency in [1, 2, 5] {
            let gauge = Arc::new(Gauge {
                inner: library(3).with_latency(Duration::from_millis(20)),
                current: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            });
            let db = Database::connect_in_memory().await.unwrap();
            let options = SyncOptions { max_concurrency, ..SyncOptions::default() };
            let sync = LibrarySync::new(gauge.clone(), Arc::new(JsonApiParser), SyncCursors::from(&db), options).unwrap();
            let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
            let report = sync.run(OWNER, MediaKind::Anime, &tx, &CancellationToken::new()).await;
            assert!(report.is_success());
            assert_eq!(gauge.peak.load(Ordering::SeqCst), max_concurrency);
        }
    }

    #[tokio::test]
    async fn test_cancel_reports_every_category() {
        let options = SyncOptions { max_concurrency: 2, ..SyncOptions::default() };
        let f = fixture(library(3).with_latency(Duration::from_secs(30)), options).await;
        let run = f.sync.start(OWNER, MediaKind::Anime, Arc::new(f.store.clone()));
        tokio::time::sleep(Duration::from_millis(50)).await;
        run.cancel();
        assert!(run.is_cancelled());
        let report = tokio::time::timeout(Duration::from_secs(5), run.wait()).await.unwrap().unwrap();

        assert_eq!(report.failures.len(), 5);
        assert!(report.failures.iter().all(|failure| *failure.error == ErrorKind::Cancelled));
        // Two categories were in flight, the other three never started.
        let mut attempts: Vec<u32> = report.failures.iter().map(|failure| failure.attempts).collect();
        attempts.sort();
        assert_eq!(attempts, vec![0, 0, 0, 1, 1]);
        assert_eq!(f.source.requests().await.len(), 2);
        assert!(!report.cursor_advanced);
        assert!(f.store.is_empty());
    }

    #[tokio::test]
    async fn test_start_and_wait() {
        let f = fixture(library(2), SyncOptions::default()).await;
        let run = f.sync.start(OWNER, MediaKind::Anime, Arc::new(f.store.clone()));
        let report = run.wait().await.unwrap();
        assert!(report.is_success());
        assert_eq!(f.store.library(OWNER, MediaKind::Anime, Category::Dropped).len(), 2);
    }

    #[tokio::test]
    async fn test_prune_after_full_sync_only() {
        let f = fixture(library(2), SyncOptions::default()).await;
        // An entry that no longer exists remotely.
        let stale = JsonApiParser.parse(&entry_record(999, 1, Category::Current)).unwrap();
        f.store.on_fetch(vec![stale]).await.unwrap();
        let report = f.sync.run(OWNER, MediaKind::Anime, &f.store, &CancellationToken::new()).await;
        assert_eq!(prune_missing(&f.store, &report).await.unwrap(), 1);
        assert_eq!(f.store.library(OWNER, MediaKind::Anime, Category::Current).len(), 2);

        let incremental = f.sync.run(OWNER, MediaKind::Anime, &f.store, &CancellationToken::new()).await;
        assert_eq!(prune_missing(&f.store, &incremental).await.unwrap(), 0);
    }

    #[test]
    fn test_invalid_options() {
        for options in [
            SyncOptions { page_limit: 0, ..SyncOptions::default() },
            SyncOptions { max_concurrency: 0, ..SyncOptions::default() },
            SyncOptions { library_path: String::new(), ..SyncOptions::default() },
        ] {
            let err = options.validate().unwrap_err();
            assert!(matches!(&*err, ErrorKind::InvalidOptions(_)));
        }
        assert!(SyncOptions::default().validate().is_ok());
    }
}
