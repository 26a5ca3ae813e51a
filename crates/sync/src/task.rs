//! Fetching one category of a library.

use crate::error::{ErrorKind, Result};
use crate::sink::PageSink;
use async_stream::stream;
use exn::ResultExt;
use futures::Stream;
use kura_model::ParserHandle;
use kura_model::models::{Category, Entity};
use kura_remote::{PageCursor, PagedRequest, RawRecord, SourceHandle};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// No page has been requested yet.
    Idle,
    /// At least one page has been requested and more may follow.
    Fetching,
    /// Every page has been fetched.
    Completed,
    /// A page failed, or the task was cancelled.
    Failed,
}

/// What a completed category fetch did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchSummary {
    pub category: Category,
    /// Pages received, including a trailing empty one.
    pub pages: usize,
    /// Entities delivered to the sink (records plus side-loaded records).
    pub entities: usize,
    /// Records that could not be parsed and were skipped.
    pub skipped: usize,
    /// Ids of the library entries delivered, in delivery order.
    pub entry_ids: Vec<i64>,
}

/// Walks every page of one library category, parsing each page into
/// entities.
///
/// Pages are fetched strictly one after the other. Malformed records are
/// logged and skipped; any other failure ends the task for good, since
/// retrying is the orchestrator's decision.
pub struct CategoryFetchTask {
    category: Category,
    cursor: PageCursor,
    source: SourceHandle,
    parser: ParserHandle,
    cancel: CancellationToken,
    state: TaskState,
    summary: FetchSummary,
}
impl CategoryFetchTask {
    pub fn new(
        category: Category,
        request: PagedRequest,
        source: SourceHandle,
        parser: ParserHandle,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            category,
            cursor: PageCursor::new(request),
            source,
            parser,
            cancel,
            state: TaskState::Idle,
            summary: FetchSummary {
                category,
                pages: 0,
                entities: 0,
                skipped: 0,
                entry_ids: Vec::new(),
            },
        }
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    /// Fetches and parses the next page.
    ///
    /// Returns `Ok(None)` once every page has been fetched (and from then on).
    /// A page may parse into an empty batch, e.g. the trailing empty page of
    /// a listing whose size is a multiple of the page limit.
    ///
    /// Cancellation is checked before a request is sent and while it is in
    /// flight; an in-flight request is dropped and its response discarded.
    pub async fn next_batch(&mut self) -> Result<Option<Vec<Entity>>> {
        match self.state {
            TaskState::Completed => return Ok(None),
            TaskState::Failed => exn::bail!(ErrorKind::Cancelled),
            TaskState::Idle | TaskState::Fetching => {},
        }
        if self.cancel.is_cancelled() {
            return self.fail(ErrorKind::Cancelled);
        }
        self.state = TaskState::Fetching;
        let source = self.source.clone();
        let outcome = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            page = self.cursor.next_page(source.as_ref()) => Some(page),
        };
        let page = match outcome {
            None => return self.fail(ErrorKind::Cancelled),
            Some(page) => match page.or_raise(|| ErrorKind::Remote) {
                Ok(page) => page,
                Err(err) => {
                    self.state = TaskState::Failed;
                    return Err(err);
                },
            },
        };
        let Some(page) = page else {
            self.state = TaskState::Completed;
            return Ok(None);
        };
        self.summary.pages += 1;
        if !self.cursor.has_more() {
            self.state = TaskState::Completed;
        }
        tracing::debug!(
            category = %self.category,
            page = self.summary.pages,
            records = page.len(),
            included = page.included.len(),
            "received page"
        );
        let batch = page.records.iter().chain(page.included.iter()).filter_map(|record| self.parse(record)).collect();
        Ok(Some(batch))
    }

    fn parse(&mut self, record: &RawRecord) -> Option<Entity> {
        match self.parser.parse(record) {
            Ok(entity) => Some(entity),
            Err(err) => {
                self.summary.skipped += 1;
                tracing::warn!(category = %self.category, error = %*err, "skipping malformed record");
                None
            },
        }
    }

    fn fail<T>(&mut self, kind: ErrorKind) -> Result<T> {
        self.state = TaskState::Failed;
        exn::bail!(kind)
    }

    /// Fetches every page, handing each non-empty batch to `sink` in page
    /// order.
    #[instrument(level = "debug", skip_all, fields(category = %self.category))]
    pub async fn run(mut self, sink: &dyn PageSink) -> Result<FetchSummary> {
        while let Some(batch) = self.next_batch().await? {
            if batch.is_empty() {
                continue;
            }
            // Don't deliver anything once the sync is being torn down.
            if self.cancel.is_cancelled() {
                exn::bail!(ErrorKind::Cancelled);
            }
            let count = batch.len();
            let ids: Vec<i64> = batch
                .iter()
                .filter_map(|entity| match entity {
                    Entity::LibraryEntry(entry) => Some(entry.id),
                    _ => None,
                })
                .collect();
            sink.on_fetch(batch).await.or_raise(|| ErrorKind::Storage)?;
            self.summary.entities += count;
            self.summary.entry_ids.extend(ids);
        }
        tracing::debug!(pages = self.summary.pages, entities = self.summary.entities, "category complete");
        Ok(self.summary)
    }

    /// The same page walk as [`run`](Self::run), as a stream of non-empty
    /// batches. The stream ends after the last page or the first error.
    pub fn into_stream(mut self) -> impl Stream<Item = Result<Vec<Entity>>> + Send {
        stream! {
            loop {
                match self.next_batch().await {
                    Ok(Some(batch)) if batch.is_empty() => continue,
                    Ok(Some(batch)) => yield Ok(batch),
                    Ok(None) => break,
                    Err(err) => {
                        yield Err(err);
                        break;
                    },
                }
            }
        }
    }
}
