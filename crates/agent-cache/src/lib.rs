//! An agent-side cache for blocking queries against a versioned backend.
//!
//! See the [`cache`] module for how requests flow through the cache and how cache types
//! plug into it.

#[macro_use]
pub mod metrics;

pub mod cache;
pub mod config;
pub mod logging;
pub mod utils;


pub use cache::{
    Cache, CacheError, CacheKey, FetchOptions, FetchResult, Fetcher, RegisterOptions, Request,
    RequestInfo, RequestType, ResultMeta, UpdateEvent, Value, downcast_request,
};
