use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use moka::notification::RemovalCause;
use parking_lot::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::backoff::FailureBackoff;
use super::entry::{Entry, EntryState, Outcome};
use super::{
    CacheError, CacheKey, FetchOptions, FetchResult, Fetcher, RegisterOptions, Request,
    RequestInfo, Value,
};
use crate::config::CacheConfig;
use crate::utils::defer::defer;

/// Metadata returned alongside every cached value.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResultMeta {
    /// Whether the value was served from the cache without waiting for a fetch.
    pub hit: bool,
    /// The time since the value was fetched.
    ///
    /// Only computed for cache types that do not refresh in the background.
    pub age: Duration,
    /// The index of the value.
    pub index: u64,
    /// Why the value may be outdated, if a stale value was returned instead of an error.
    pub outdated: Option<CacheError>,
}

/// A registered cache type.
#[derive(Clone)]
pub(super) struct Registration {
    pub name: Arc<str>,
    pub fetcher: Arc<dyn Fetcher>,
    pub options: RegisterOptions,
    pub query_timeout: Duration,
    pub last_get_ttl: Duration,
}

/// A struct implementing [`moka::Expiry`] that expires entries once they were not read for
/// their type's `last_get_ttl`.
struct LastGetExpiration;

impl moka::Expiry<CacheKey, Arc<Entry>> for LastGetExpiration {
    fn expire_after_create(
        &self,
        _key: &CacheKey,
        value: &Arc<Entry>,
        _created_at: std::time::Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_read(
        &self,
        _key: &CacheKey,
        value: &Arc<Entry>,
        _read_at: std::time::Instant,
        _duration_until_expiry: Option<Duration>,
        _last_modified_at: std::time::Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

type EntryTable = moka::sync::Cache<CacheKey, Arc<Entry>>;

pub(super) struct CacheInner {
    config: CacheConfig,
    registry: RwLock<HashMap<String, Registration>>,
    entries: EntryTable,
    /// Canceled by [`Cache::close`].
    pub closed: CancellationToken,
}

/// The blocking-query cache.
///
/// Cheap to clone; all clones share the same entries and registered types.
#[derive(Clone)]
pub struct Cache {
    pub(super) inner: Arc<CacheInner>,
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let types: Vec<_> = self.inner.registry.read().keys().cloned().collect();
        f.debug_struct("Cache")
            .field("config", &self.inner.config)
            .field("types", &types)
            .field("entries", &self.inner.entries.entry_count())
            .field("closed", &self.inner.closed.is_cancelled())
            .finish()
    }
}

impl Cache {
    pub fn new(config: CacheConfig) -> Self {
        let entries = EntryTable::builder()
            .max_capacity(config.max_entries)
            .name("agent-cache")
            .expire_after(LastGetExpiration)
            .eviction_listener(|key: Arc<CacheKey>, entry: Arc<Entry>, cause| {
                entry.evicted.cancel();
                if cause != RemovalCause::Replaced {
                    tracing::debug!(%key, ?cause, "Evicted cache entry");
                    metric!(counter("cache.evict") += 1, "type" => key.type_name());
                }
            })
            .build();

        Self {
            inner: Arc::new(CacheInner {
                config,
                registry: RwLock::default(),
                entries,
                closed: CancellationToken::new(),
            }),
        }
    }

    /// Registers a cache type under `name`.
    ///
    /// Registering a name again replaces the previous fetcher. Fetch loops that are already
    /// running keep the fetcher they were started with.
    pub fn register_type(&self, name: &str, fetcher: Arc<dyn Fetcher>) {
        let options = fetcher.register_options();
        let registration = Registration {
            name: name.into(),
            query_timeout: options
                .query_timeout
                .unwrap_or(self.inner.config.query_timeout),
            last_get_ttl: options
                .last_get_ttl
                .unwrap_or(self.inner.config.last_get_ttl),
            fetcher,
            options,
        };

        let previous = self
            .inner
            .registry
            .write()
            .insert(name.to_owned(), registration);
        if previous.is_some() {
            tracing::warn!(name, "Replacing already registered cache type");
        }
    }

    pub(super) fn registration(&self, type_name: &str) -> Result<Registration, CacheError> {
        self.inner
            .registry
            .read()
            .get(type_name)
            .cloned()
            .ok_or_else(|| CacheError::TypeNotRegistered(type_name.to_owned()))
    }

    /// Returns the value for `request`, fetching it if necessary.
    ///
    /// If the request carries a `min_index`, this waits until a value with a higher index is
    /// available, the request's timeout elapses, or `cancel` is canceled. In the latter two
    /// cases the last known value is returned with [`ResultMeta::outdated`] set.
    pub async fn get<R: Request>(
        &self,
        cancel: &CancellationToken,
        type_name: &str,
        request: R,
    ) -> Result<(Value, ResultMeta), CacheError> {
        let registration = self.registration(type_name)?;
        registration.fetcher.request_type().check(&request)?;

        let info = request.cache_info();
        self.get_with_info(cancel, &registration, Arc::new(request), info)
            .await
    }

    pub(super) async fn get_with_info(
        &self,
        cancel: &CancellationToken,
        registration: &Registration,
        request: Arc<dyn Request>,
        mut info: RequestInfo,
    ) -> Result<(Value, ResultMeta), CacheError> {
        let type_name = &*registration.name;
        metric!(counter("cache.access") += 1, "type" => type_name);

        if !registration.options.supports_blocking {
            info.min_index = 0;
        }
        if registration.options.refresh {
            info.max_age = Duration::ZERO;
            info.must_revalidate = false;
        }

        if info.key.is_empty() {
            return self.fetch_direct(cancel, registration, &*request, &info).await;
        }

        let key = CacheKey::for_request(type_name, &info);
        let entry = self.entry(key, registration);
        let deadline = (!info.timeout.is_zero()).then(|| Instant::now() + info.timeout);

        let waiter_id = entry.next_waiter_id();
        let _waiter = defer(|| entry.remove_waiter(waiter_id));

        let mut first_pass = true;
        loop {
            let mut generation = {
                let mut state = entry.lock();
                let result = if first_pass {
                    check_cached(&state, &info, registration.options.refresh)
                } else {
                    check_outcome(&state, &info, registration.options.refresh)
                };
                if let Some(result) = result {
                    if first_pass && result.is_ok() {
                        metric!(counter("cache.hit") += 1, "type" => type_name);
                    }
                    return result;
                }

                if !state.task_active {
                    if self.inner.closed.is_cancelled() {
                        let refresh = registration.options.refresh;
                        return fallback(&state, CacheError::Canceled, refresh);
                    }
                    state.task_active = true;
                    self.spawn_fetch_loop(&entry, registration, Arc::clone(&request));
                }
                entry.register_waiter(&mut state, waiter_id, info.min_index)
            };
            first_pass = false;

            let deadline_reached = async {
                match deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            };

            let reason = tokio::select! {
                changed = generation.changed() => {
                    // the sender lives as long as the entry we hold
                    debug_assert!(changed.is_ok());
                    continue;
                }
                _ = cancel.cancelled() => CacheError::Canceled,
                _ = deadline_reached => CacheError::DeadlineExceeded(info.timeout),
            };

            let state = entry.lock();
            return fallback(&state, reason, registration.options.refresh);
        }
    }

    /// Fetches an uncacheable request, without touching any entry.
    async fn fetch_direct(
        &self,
        cancel: &CancellationToken,
        registration: &Registration,
        request: &dyn Request,
        info: &RequestInfo,
    ) -> Result<(Value, ResultMeta), CacheError> {
        metric!(counter("cache.bypass") += 1, "type" => &*registration.name);

        let timeout = if info.timeout.is_zero() {
            registration.query_timeout
        } else {
            info.timeout.min(registration.query_timeout)
        };
        let options = FetchOptions {
            min_index: info.min_index,
            timeout,
            last_result: None,
        };

        let result = tokio::select! {
            result = registration.fetcher.fetch(options, request) => result?,
            _ = cancel.cancelled() => return Err(CacheError::Canceled),
        };
        let meta = ResultMeta {
            index: result.index,
            ..Default::default()
        };
        Ok((result.value, meta))
    }

    /// Seeds the cache with a value, without fetching it.
    ///
    /// `datacenter`, `token` and `key` must match what the requests of this type report in
    /// their [`RequestInfo`]. Fails with [`CacheError::IndexRegression`] if the cache already
    /// holds a value with a higher index.
    pub fn prepopulate(
        &self,
        type_name: &str,
        result: FetchResult,
        datacenter: &str,
        token: &str,
        key: &str,
    ) -> Result<(), CacheError> {
        let registration = self.registration(type_name)?;
        let key = CacheKey::from_parts(type_name, datacenter, token, key);
        tracing::trace!(%key, index = result.index, "Prepopulating cache entry");
        self.entry(key, &registration).seed(result)
    }

    /// Stops all fetch loops and notify loops.
    ///
    /// Values already in the cache can still be read.
    pub fn close(&self) {
        self.inner.closed.cancel();
    }

    /// Runs pending maintenance of the entry table, such as evicting expired entries.
    pub fn run_pending_tasks(&self) {
        self.inner.entries.run_pending_tasks();
    }

    /// The approximate number of entries.
    pub fn entry_count(&self) -> u64 {
        self.inner.entries.entry_count()
    }

    fn entry(&self, key: CacheKey, registration: &Registration) -> Arc<Entry> {
        let config = &self.inner.config;
        self.inner.entries.get_with_by_ref(&key, || {
            Arc::new(Entry::new(
                key.clone(),
                registration.last_get_ttl,
                config.entry_fetch_rate,
                config.entry_fetch_max_burst,
            ))
        })
    }

    fn spawn_fetch_loop(
        &self,
        entry: &Arc<Entry>,
        registration: &Registration,
        request: Arc<dyn Request>,
    ) {
        let entry = Arc::clone(entry);
        let registration = registration.clone();
        let closed = self.inner.closed.clone();
        tokio::spawn(async move {
            run_fetch_loop(entry, registration, request, closed).await;
        });
    }
}

/// Fetches an entry until nobody needs it to be fetched anymore.
///
/// Refreshing cache types keep fetching until the entry is evicted or the cache is closed.
async fn run_fetch_loop(
    entry: Arc<Entry>,
    registration: Registration,
    request: Arc<dyn Request>,
    closed: CancellationToken,
) {
    let type_name = &*registration.name;
    let options = &registration.options;
    // resets the entry if this task is aborted in any way
    let task = defer(|| entry.abort_task());
    let mut backoff = FailureBackoff::default();

    loop {
        tokio::select! {
            _ = entry.until_ready() => {}
            _ = entry.evicted.cancelled() => break,
            _ = closed.cancelled() => break,
        }

        let fetch_options = {
            let state = entry.lock();
            FetchOptions {
                min_index: if options.supports_blocking {
                    state.refresh_index
                } else {
                    0
                },
                timeout: registration.query_timeout,
                last_result: state.last_result(),
            }
        };

        tracing::trace!(key = %entry.key, min_index = fetch_options.min_index, "Fetching cache entry");
        let start = Instant::now();
        let result = tokio::select! {
            result = registration.fetcher.fetch(fetch_options, &*request) => result,
            _ = entry.evicted.cancelled() => break,
            _ = closed.cancelled() => break,
        };
        metric!(timer("cache.fetch.duration") = start.elapsed(), "type" => type_name);

        let status = match &result {
            Ok(result) if result.not_modified => "not-modified",
            Ok(_) => "ok",
            Err(err) => err.metrics_tag(),
        };
        metric!(counter("cache.fetch") += 1, "type" => type_name, "status" => status);

        let (outcome, keep_going) = entry.apply(result, options.refresh, &mut backoff);
        match &outcome {
            Outcome::Failed(err) => tracing::warn!(
                key = %entry.key,
                failures = backoff.failures(),
                error = err as &dyn std::error::Error,
                "Failed to fetch cache entry"
            ),
            outcome => tracing::debug!(key = %entry.key, ?outcome, "Fetched cache entry"),
        }

        if !keep_going {
            task.cancel();
            return;
        }

        let delay = options.refresh_timer + backoff.next_delay();
        if delay.is_zero() {
            tokio::task::yield_now().await;
            continue;
        }
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = entry.evicted.cancelled() => break,
            _ = closed.cancelled() => break,
        }
    }

    tracing::debug!(key = %entry.key, "Stopped fetching cache entry");
}

fn result_meta(state: &EntryState, hit: bool, refresh: bool) -> ResultMeta {
    let age = match state.fetched_at {
        Some(fetched_at) if !refresh => fetched_at.elapsed(),
        _ => Duration::ZERO,
    };
    ResultMeta {
        hit,
        age,
        index: state.index,
        outdated: None,
    }
}

/// Answers a request straight from the entry, if the cached value is good enough.
fn check_cached(
    state: &EntryState,
    info: &RequestInfo,
    refresh: bool,
) -> Option<Result<(Value, ResultMeta), CacheError>> {
    let value = state.value.as_ref()?;
    if info.must_revalidate {
        return None;
    }
    if info.min_index > 0 && state.index <= info.min_index {
        return None;
    }
    if !info.max_age.is_zero() {
        let fetched_at = state.fetched_at?;
        if fetched_at.elapsed() > info.max_age {
            return None;
        }
    }

    Some(Ok((Arc::clone(value), result_meta(state, true, refresh))))
}

/// Answers a waiting request after a fetch completed, or returns `None` to keep waiting.
fn check_outcome(
    state: &EntryState,
    info: &RequestInfo,
    refresh: bool,
) -> Option<Result<(Value, ResultMeta), CacheError>> {
    match (&state.value, &state.last_outcome) {
        (Some(value), Some(Outcome::Updated | Outcome::NotModified))
            if state.index > info.min_index
                || state.last_outcome == Some(Outcome::NotModified) =>
        {
            Some(Ok((Arc::clone(value), result_meta(state, false, refresh))))
        }
        (Some(value), Some(Outcome::Failed(err))) if !info.must_revalidate => {
            let mut meta = result_meta(state, false, refresh);
            meta.outdated = Some(err.clone());
            Some(Ok((Arc::clone(value), meta)))
        }
        (_, Some(Outcome::Failed(err))) => Some(Err(err.clone())),
        _ => None,
    }
}

/// The answer for a caller that stopped waiting.
fn fallback(
    state: &EntryState,
    reason: CacheError,
    refresh: bool,
) -> Result<(Value, ResultMeta), CacheError> {
    match &state.value {
        Some(value) => {
            let mut meta = result_meta(state, false, refresh);
            meta.outdated = Some(reason);
            Ok((Arc::clone(value), meta))
        }
        None => Err(state.error.clone().unwrap_or(reason)),
    }
}
