use std::time::Duration;

use thiserror::Error;

/// An error that happens when serving a request from the cache.
///
/// Errors are cloned out to every caller waiting on the same fetch, which is why all variants
/// carry owned, cheaply cloneable data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// The request handed to a cache type is not the request type it was registered for.
    ///
    /// This is a programming error and is never retried.
    #[error("request has wrong type: {found}, expected {expected}")]
    WrongRequestType {
        /// The request type the fetcher accepts.
        expected: &'static str,
        /// The request type that was supplied.
        found: &'static str,
    },
    /// No cache type is registered under the given name.
    #[error("unknown cache type: {0}")]
    TypeNotRegistered(String),
    /// The backend failed to answer the query.
    ///
    /// The attached string contains the backend's error message.
    #[error("backend error: {0}")]
    Backend(String),
    /// The caller gave up waiting.
    #[error("request canceled")]
    Canceled,
    /// The caller's deadline passed before a result was available.
    #[error("deadline exceeded after {0:?}")]
    DeadlineExceeded(Duration),
    /// A prepopulated result is older than what the cache already holds.
    #[error("cannot seed index {offered}, cache already holds index {current}")]
    IndexRegression {
        /// The index currently cached.
        current: u64,
        /// The index that was offered.
        offered: u64,
    },
}

impl CacheError {
    /// Creates a [`CacheError::Backend`] out of any error type.
    pub fn backend<E: std::error::Error + ?Sized>(err: &E) -> Self {
        Self::Backend(err.to_string())
    }

    /// Whether this error is caused by the caller rather than by the backend.
    pub fn is_programming_error(&self) -> bool {
        matches!(
            self,
            Self::WrongRequestType { .. } | Self::TypeNotRegistered(_)
        )
    }

    /// A short, stable name used to tag metrics.
    pub fn metrics_tag(&self) -> &'static str {
        match self {
            Self::WrongRequestType { .. } => "wrong-request-type",
            Self::TypeNotRegistered(_) => "type-not-registered",
            Self::Backend(_) => "backend",
            Self::Canceled => "canceled",
            Self::DeadlineExceeded(_) => "deadline-exceeded",
            Self::IndexRegression { .. } => "index-regression",
        }
    }
}
