//! Remote Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};

/// A remote fetch error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for remote operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Connection failures, timeouts, dropped responses.
    #[display("network error: {_0}")]
    Network(#[error(not(source))] String),
    /// The server answered with a non-success status code.
    #[display("unexpected HTTP status: {_0}")]
    Http(#[error(not(source))] u16),
    /// The response body could not be understood as a page of records.
    #[display("invalid response")]
    InvalidResponse,
    /// The request itself is invalid (e.g. a zero page limit); sending it
    /// again won't help.
    #[display("invalid request: {_0}")]
    InvalidRequest(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::InvalidResponse => true,
            // Rate limiting and server-side failures are transient.
            Self::Http(status) => *status == 429 || *status >= 500,
            Self::InvalidRequest(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(ErrorKind::Network("connection reset".to_string()), true)]
    #[case(ErrorKind::InvalidResponse, true)]
    #[case(ErrorKind::Http(503), true)]
    #[case(ErrorKind::Http(429), true)]
    #[case(ErrorKind::Http(404), false)]
    #[case(ErrorKind::InvalidRequest("limit must be positive".to_string()), false)]
    fn test_retryable(#[case] kind: ErrorKind, #[case] expected: bool) {
        assert_eq!(kind.is_retryable(), expected);
    }

    #[test]
    fn test_display() {
        assert_eq!(ErrorKind::Http(502).to_string(), "unexpected HTTP status: 502");
        assert_eq!(ErrorKind::Network("timed out".to_string()).to_string(), "network error: timed out");
    }
}
