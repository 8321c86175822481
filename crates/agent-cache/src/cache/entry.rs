use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::backoff::FailureBackoff;
use super::{CacheError, CacheKey, FetchResult, Value};

type EntryRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// How the last fetch of an entry ended.
#[derive(Clone, Debug, PartialEq)]
pub(super) enum Outcome {
    /// A value was stored, possibly with the same index as before.
    Updated,
    /// The backend confirmed the cached value.
    NotModified,
    /// The fetch failed, or was aborted.
    Failed(CacheError),
}

/// The mutable part of an [`Entry`].
#[derive(Debug, Default)]
pub(super) struct EntryState {
    pub value: Option<Value>,
    /// The index of `value`. Never decreases.
    pub index: u64,
    /// The index the next fetch blocks on.
    ///
    /// This is raised above `index` by "not modified" answers.
    pub refresh_index: u64,
    pub fetched_at: Option<Instant>,
    /// The error of the last fetch, cleared by the next successful one.
    pub error: Option<CacheError>,
    pub last_outcome: Option<Outcome>,
    /// Waiting callers, by waiter id, with the index they wait to be exceeded.
    pub waiters: HashMap<u64, u64>,
    /// Whether a fetch loop is running for this entry.
    pub task_active: bool,
}

impl EntryState {
    /// The last successful result, handed to fetchers so they can answer "not modified".
    pub fn last_result(&self) -> Option<FetchResult> {
        self.value.as_ref().map(|value| FetchResult {
            value: Arc::clone(value),
            index: self.index,
            not_modified: false,
        })
    }

    /// Whether any waiter still waits for an index past the current one.
    fn has_unsatisfied_waiters(&self) -> bool {
        self.waiters
            .values()
            .any(|&min_index| self.index <= min_index)
    }
}

/// One entry of the cache.
pub(super) struct Entry {
    pub key: CacheKey,
    state: Mutex<EntryState>,
    /// Bumped every time a fetch outcome is recorded.
    generation: watch::Sender<u64>,
    /// How long this entry is kept after it was last read.
    pub ttl: Duration,
    /// Canceled when the entry is evicted, stopping its fetch loop.
    pub evicted: CancellationToken,
    limiter: Option<EntryRateLimiter>,
    next_waiter_id: AtomicU64,
}

impl std::fmt::Debug for Entry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entry")
            .field("key", &self.key)
            .field("state", &self.state)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl Entry {
    pub fn new(
        key: CacheKey,
        ttl: Duration,
        fetch_rate: Option<NonZeroU32>,
        max_burst: NonZeroU32,
    ) -> Self {
        let limiter = fetch_rate
            .map(|rate| RateLimiter::direct(Quota::per_second(rate).allow_burst(max_burst)));

        Self {
            key,
            state: Mutex::default(),
            generation: watch::Sender::new(0),
            ttl,
            evicted: CancellationToken::new(),
            limiter,
            next_waiter_id: AtomicU64::new(0),
        }
    }

    pub fn lock(&self) -> parking_lot::MutexGuard<'_, EntryState> {
        self.state.lock()
    }

    pub fn next_waiter_id(&self) -> u64 {
        self.next_waiter_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Registers a waiter and returns a receiver that is notified on the next outcome.
    ///
    /// Must be called with the state locked, so no outcome can slip in between the caller's
    /// check of the state and the subscription.
    pub fn register_waiter(
        &self,
        state: &mut EntryState,
        waiter_id: u64,
        min_index: u64,
    ) -> watch::Receiver<u64> {
        state.waiters.insert(waiter_id, min_index);
        self.generation.subscribe()
    }

    pub fn remove_waiter(&self, waiter_id: u64) {
        self.state.lock().waiters.remove(&waiter_id);
    }

    /// Waits until the rate limiter allows the next fetch.
    pub async fn until_ready(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
    }

    /// Records the result of a fetch, decides whether the fetch loop goes on, and wakes all
    /// waiters.
    ///
    /// Returns the outcome and whether the loop runs another iteration. If it does not, the
    /// loop is marked inactive before any waiter is woken, so a caller that registers after
    /// this either sees the outcome or starts a new loop.
    pub fn apply(
        &self,
        result: Result<FetchResult, CacheError>,
        refresh: bool,
        backoff: &mut FailureBackoff,
    ) -> (Outcome, bool) {
        let mut state = self.state.lock();
        let outcome = match result {
            Ok(result) if result.not_modified && state.value.is_some() => {
                state.refresh_index = state.refresh_index.max(result.index);
                state.fetched_at = Some(Instant::now());
                state.error = None;
                Outcome::NotModified
            }
            Ok(result) => {
                // an index of 0 is never valid once a value exists
                let index = result.index.max(1);
                if index < state.index {
                    tracing::warn!(
                        key = %self.key,
                        current = state.index,
                        offered = index,
                        "Discarding fetch result with lower index"
                    );
                    let err = CacheError::Backend(format!(
                        "index went backwards from {} to {index}",
                        state.index
                    ));
                    state.error = Some(err.clone());
                    Outcome::Failed(err)
                } else {
                    state.value = Some(result.value);
                    state.index = index;
                    state.refresh_index = index;
                    state.fetched_at = Some(Instant::now());
                    state.error = None;
                    Outcome::Updated
                }
            }
            Err(err) => {
                state.error = Some(err.clone());
                Outcome::Failed(err)
            }
        };

        match outcome {
            Outcome::Failed(_) => backoff.failed(),
            _ => backoff.succeeded(),
        }

        let keep_going = match &outcome {
            Outcome::Failed(err) if err.is_programming_error() => false,
            _ if refresh => true,
            Outcome::Updated => state.has_unsatisfied_waiters(),
            _ => false,
        };
        if !keep_going {
            state.task_active = false;
        }

        self.publish(&mut state, outcome.clone());
        (outcome, keep_going)
    }

    /// Seeds the entry with a result that did not come from a fetch.
    pub fn seed(&self, result: FetchResult) -> Result<(), CacheError> {
        let mut state = self.state.lock();
        let index = result.index.max(1);
        if index < state.index {
            return Err(CacheError::IndexRegression {
                current: state.index,
                offered: index,
            });
        }

        state.value = Some(result.value);
        state.index = index;
        state.refresh_index = state.refresh_index.max(index);
        state.fetched_at = Some(Instant::now());
        state.error = None;
        self.publish(&mut state, Outcome::Updated);
        Ok(())
    }

    /// Marks the fetch loop as gone, releasing all waiters with [`CacheError::Canceled`].
    pub fn abort_task(&self) {
        let mut state = self.state.lock();
        state.task_active = false;
        if !state.waiters.is_empty() {
            self.publish(&mut state, Outcome::Failed(CacheError::Canceled));
        }
    }

    fn publish(&self, state: &mut EntryState, outcome: Outcome) {
        state.last_outcome = Some(outcome);
        self.generation.send_modify(|generation| *generation += 1);
    }
}
