//! # Blocking-query cache
//!
//! The agent keeps local views of cluster state, such as the mesh gateways of a datacenter. Every
//! view is the answer to a *blocking query*: a request that the backend holds open until its data
//! changes past a given index, or a timeout elapses. This module turns such queries into cached,
//! deduplicated, continuously refreshed values.
//!
//! ## Cache types
//!
//! A cache type is a [`Fetcher`] registered under a name with [`Cache::register_type`]. The
//! fetcher performs exactly one backend round trip per call, and declares through its
//! [`RegisterOptions`] whether the backend supports blocking and whether entries should be kept
//! fresh in the background.
//!
//! Requests are passed as [`Request`] trait objects. The cache checks the concrete request type
//! against the fetcher's [`RequestType`] before doing anything else, so a mismatch fails with
//! [`CacheError::WrongRequestType`] without ever reaching the backend.
//!
//! ## Entries
//!
//! Every request reports a [`RequestInfo`], from which a [`CacheKey`] is derived. All requests
//! with the same key share one entry. An entry holds the last value and its index, and runs at
//! most one fetch loop at any time:
//!
//! - A [`Cache::get`] that can be answered from the entry returns right away.
//! - Otherwise the caller registers as a waiter and starts the fetch loop, unless it is already
//!   running. The loop fetches with the entry's index as `min_index`, records the result, and
//!   wakes all waiters.
//! - The loop keeps going while waiters wait for a higher index, or forever for cache types
//!   that refresh in the background. Failed fetches are retried with backoff.
//!
//! The index of an entry never decreases. A "not modified" answer keeps the value and its index,
//! and only raises the index the next fetch blocks on.
//!
//! A caller that gives up, because it was canceled or its timeout elapsed, gets the last known
//! value with [`ResultMeta::outdated`] set. The same goes for failed fetches, unless the request
//! asked to revalidate. Errors are only returned if no value was ever fetched.
//!
//! Requests with an empty key are not cached at all, and go straight to the fetcher.
//!
//! Entries are evicted once they were not read for the `last_get_ttl` of their type, which stops
//! their fetch loop.
//!
//! ### Metrics
//!
//! All metrics are tagged with the `type` of the cache entry:
//!
//! - `cache.access`: All accesses.
//! - `cache.hit`: Accesses answered without waiting for a fetch.
//! - `cache.bypass`: Accesses with an empty key, which skip the cache.
//! - `cache.fetch`: Fetches, tagged with their `status`.
//! - `cache.fetch.duration`: The time a fetch took, including the time the backend blocked.
//! - `cache.evict`: Evicted entries.
//! - `cache.notify.events`: Events delivered by [`Cache::notify`].

mod backoff;
mod engine;
mod entry;
mod error;
mod fetch;
mod key;
mod notify;
mod request;

pub use engine::{Cache, ResultMeta};
pub use error::CacheError;
pub use fetch::{FetchOptions, FetchResult, Fetcher, RegisterOptions, Value};
pub use key::{CacheKey, CacheKeyBuilder};
pub use notify::UpdateEvent;
pub use request::{Request, RequestInfo, RequestType, downcast_request};
