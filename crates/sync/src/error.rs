//! Sync Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};

/// A sync error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for sync operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Fetching a page from the remote failed.
    #[display("remote fetch failed")]
    Remote,
    /// Fetched entities could not be handed over to the sink.
    #[display("storing fetched entities failed")]
    Storage,
    /// The sync was cancelled before the category finished.
    #[display("sync cancelled")]
    Cancelled,
    #[display("invalid sync options: {_0}")]
    InvalidOptions(#[error(not(source))] &'static str),
    /// The sync run went away without producing a report.
    #[display("sync run aborted before reporting")]
    Aborted,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Remote => true,
            Self::Storage | Self::Cancelled | Self::InvalidOptions(_) | Self::Aborted => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(ErrorKind::Remote, true)]
    #[case(ErrorKind::Storage, false)]
    #[case(ErrorKind::Cancelled, false)]
    #[case(ErrorKind::Aborted, false)]
    fn test_retryable(#[case] kind: ErrorKind, #[case] expected: bool) {
        assert_eq!(kind.is_retryable(), expected);
    }
}
