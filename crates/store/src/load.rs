//! Loading state of a library view.
//!
//! A view fetches its library through a sync, but renders from a
//! [`ReactiveQuery`](crate::ReactiveQuery). [`LoadTracker`] decides when to
//! retry a failed fetch and whether a loading indicator should be visible.

/// Default number of times a view retries a failed fetch.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    /// No fetch has settled yet.
    Loading,
    /// A fetch succeeded.
    Loaded,
    /// Every attempt failed; the view shows whatever is stored locally.
    Failed,
}

/// What the view should do after a fetch settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadDecision {
    /// Fetch again; `attempt` counts retries, starting at 1.
    Retry { attempt: u32 },
    Settled(LoadState),
}

/// Retry budget and loading indicator of one library view.
///
/// # Examples
///
/// ```
/// use kura_store::{LoadDecision, LoadState, LoadTracker};
///
/// let mut tracker = LoadTracker::new(1);
/// assert!(tracker.show_indicator());
/// assert_eq!(tracker.on_fetch_result(false), LoadDecision::Retry { attempt: 1 });
/// assert_eq!(tracker.on_fetch_result(false), LoadDecision::Settled(LoadState::Failed));
/// assert!(!tracker.show_indicator());
/// ```
#[derive(Debug, Clone)]
pub struct LoadTracker {
    max_retries: u32,
    retries: u32,
    state: LoadState,
    has_items: bool,
}
impl Default for LoadTracker {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES)
    }
}
impl LoadTracker {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            retries: 0,
            state: LoadState::Loading,
            has_items: false,
        }
    }

    pub fn state(&self) -> LoadState {
        self.state
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Records how many items the view currently holds.
    pub fn on_items(&mut self, count: usize) {
        self.has_items = count > 0;
    }

    /// Records the outcome of a fetch and decides what happens next.
    pub fn on_fetch_result(&mut self, ok: bool) -> LoadDecision {
        if ok {
            self.state = LoadState::Loaded;
        } else if self.retries < self.max_retries {
            self.retries += 1;
            return LoadDecision::Retry { attempt: self.retries };
        } else {
            self.state = LoadState::Failed;
        }
        LoadDecision::Settled(self.state)
    }

    /// Whether a loading indicator should be shown: only while nothing is
    /// displayed and no fetch has settled.
    pub fn show_indicator(&self) -> bool {
        !self.has_items && self.state == LoadState::Loading
    }

    /// Starts over with a fresh retry budget (e.g. on pull-to-refresh).
    pub fn reset(&mut self) {
        self.retries = 0;
        self.state = LoadState::Loading;
    }
}
