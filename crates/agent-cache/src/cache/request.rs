use std::any::{Any, TypeId};
use std::fmt;
use std::time::Duration;

use super::CacheError;

/// Everything the cache needs to know about a request.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestInfo {
    /// Uniquely identifies the request within its cache type and datacenter.
    ///
    /// An empty key means the request must not be cached, and is always sent to the backend.
    pub key: String,
    /// The token used for the request, part of the cache key.
    pub token: String,
    /// The datacenter the request is targeted at, part of the cache key.
    pub datacenter: String,
    /// The index the caller already has. The cache only answers with data newer than this.
    pub min_index: u64,
    /// How long the caller is willing to wait for newer data.
    ///
    /// A zero timeout waits until newer data arrives or the caller gives up.
    pub timeout: Duration,
    /// If non-zero, cached values older than this are fetched again.
    ///
    /// Ignored for cache types that refresh in the background.
    pub max_age: Duration,
    /// Forces a fetch even if a cached value exists, and surfaces backend errors instead of
    /// serving stale data.
    ///
    /// Ignored for cache types that refresh in the background.
    pub must_revalidate: bool,
}

/// A request that can be served through the cache.
///
/// Requests are handed to the cache as trait objects, and each [`Fetcher`](super::Fetcher)
/// downcasts them to the concrete type it was registered for.
pub trait Request: Any + Send + Sync + fmt::Debug {
    /// Returns the information the cache uses for keying and blocking.
    fn cache_info(&self) -> RequestInfo;

    /// Returns `self` as [`Any`], to allow downcasting.
    fn as_any(&self) -> &dyn Any;

    /// The name of the concrete request type, used in error messages.
    fn type_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// The concrete request type a [`Fetcher`](super::Fetcher) accepts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RequestType {
    id: TypeId,
    name: &'static str,
}

impl RequestType {
    pub fn of<R: Request>() -> Self {
        Self {
            id: TypeId::of::<R>(),
            name: std::any::type_name::<R>(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Checks that `request` is of this type.
    pub fn check(&self, request: &dyn Request) -> Result<(), CacheError> {
        if request.as_any().type_id() == self.id {
            Ok(())
        } else {
            Err(CacheError::WrongRequestType {
                expected: self.name,
                found: request.type_name(),
            })
        }
    }
}

/// Downcasts `request` to the concrete request type `R`.
///
/// Fails with [`CacheError::WrongRequestType`] for any other request type.
pub fn downcast_request<R: Request>(request: &dyn Request) -> Result<&R, CacheError> {
    request
        .as_any()
        .downcast_ref::<R>()
        .ok_or_else(|| CacheError::WrongRequestType {
            expected: std::any::type_name::<R>(),
            found: request.type_name(),
        })
}
