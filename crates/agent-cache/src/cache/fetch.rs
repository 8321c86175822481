use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{CacheError, Request, RequestType};

/// An opaque cached value.
///
/// Callers downcast it to the reply type of the cache type they queried.
pub type Value = Arc<dyn Any + Send + Sync>;

/// Options passed to every [`Fetcher::fetch`] call.
#[derive(Clone, Debug, Default)]
pub struct FetchOptions {
    /// The index the cache already has. A blocking fetcher must not return before the backend
    /// has data newer than this, or the timeout elapsed.
    pub min_index: u64,
    /// The maximum time the backend may block.
    pub timeout: Duration,
    /// The last successful result, if there is one.
    ///
    /// Its presence allows the backend to answer with "not modified".
    pub last_result: Option<FetchResult>,
}

/// The result of a single fetch.
#[derive(Clone)]
pub struct FetchResult {
    /// The fetched value.
    pub value: Value,
    /// The backend index of the value.
    pub index: u64,
    /// Set when the backend reported that the previous value is still current.
    ///
    /// In that case `value` is the previous value, and `index` is the index the backend
    /// reported with its answer.
    pub not_modified: bool,
}

impl FetchResult {
    /// Creates a result for a freshly fetched value.
    pub fn new<T: Any + Send + Sync>(value: T, index: u64) -> Self {
        Self {
            value: Arc::new(value),
            index,
            not_modified: false,
        }
    }

    /// Creates a result reusing the previous value.
    pub fn not_modified(previous: &FetchResult, index: u64) -> Self {
        Self {
            value: Arc::clone(&previous.value),
            index,
            not_modified: true,
        }
    }

    /// Returns the value if it is of type `T`.
    pub fn value_as<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref()
    }
}

impl fmt::Debug for FetchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchResult")
            .field("index", &self.index)
            .field("not_modified", &self.not_modified)
            .finish_non_exhaustive()
    }
}

/// Controls how the cache treats the entries of a cache type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegisterOptions {
    /// Keep entries fresh with background fetches, even while nobody waits on them.
    pub refresh: bool,
    /// The pause between two background fetches.
    pub refresh_timer: Duration,
    /// The upper bound for a single blocking fetch. Uses the cache default if `None`.
    pub query_timeout: Option<Duration>,
    /// Whether the backend understands `min_index` and blocks until newer data arrives.
    pub supports_blocking: bool,
    /// How long an entry is kept after it was last read. Uses the cache default if `None`.
    pub last_get_ttl: Option<Duration>,
}

impl RegisterOptions {
    /// Options for blocking queries kept up to date in the background.
    pub fn blocking_refresh() -> Self {
        Self {
            refresh: true,
            refresh_timer: Duration::ZERO,
            query_timeout: Some(Duration::from_secs(10 * 60)),
            supports_blocking: true,
            last_get_ttl: None,
        }
    }

    /// Options for plain queries that are only fetched on demand.
    pub fn no_refresh() -> Self {
        Self {
            refresh: false,
            refresh_timer: Duration::ZERO,
            query_timeout: None,
            supports_blocking: false,
            last_get_ttl: None,
        }
    }
}

/// The contract every cache type implements.
///
/// A fetcher turns one cache-level fetch into exactly one backend round trip. It holds no
/// state across calls, and never retries: retries are the business of the cache.
#[async_trait]
pub trait Fetcher: Send + Sync + 'static {
    /// The request type this fetcher accepts.
    fn request_type(&self) -> RequestType;

    /// Controls how the cache treats entries of this type.
    fn register_options(&self) -> RegisterOptions;

    /// Performs one fetch.
    ///
    /// Must fail with [`CacheError::WrongRequestType`] without contacting the backend if
    /// `request` is not of [`request_type`](Self::request_type).
    async fn fetch(
        &self,
        options: FetchOptions,
        request: &dyn Request,
    ) -> Result<FetchResult, CacheError>;
}
