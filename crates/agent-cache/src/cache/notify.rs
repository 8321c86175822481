use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::backoff::FailureBackoff;
use super::engine::Registration;
use super::{Cache, CacheError, Request, RequestInfo, ResultMeta, Value};

/// The poll interval for cache types that do not support blocking queries, unless the type
/// configures a `refresh_timer`.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// A change of a watched request, delivered by [`Cache::notify`].
#[derive(Debug)]
pub struct UpdateEvent {
    /// The identifier the watch was started with.
    pub correlation_id: String,
    /// The new value, or the error that prevented fetching it.
    pub result: Result<(Value, ResultMeta), CacheError>,
}

impl Cache {
    /// Watches `request` and sends an [`UpdateEvent`] to `sender` every time its value changes.
    ///
    /// The watch runs in the background until `cancel` is canceled, the receiving end of
    /// `sender` is dropped, or the cache is closed. Unknown types and wrong request types are
    /// reported right away.
    pub fn notify<R: Request>(
        &self,
        cancel: &CancellationToken,
        type_name: &str,
        request: R,
        correlation_id: impl Into<String>,
        sender: mpsc::Sender<UpdateEvent>,
    ) -> Result<(), CacheError> {
        let registration = self.registration(type_name)?;
        registration.fetcher.request_type().check(&request)?;

        let info = request.cache_info();
        let watch = Watch {
            cache: self.clone(),
            cancel: cancel.child_token(),
            registration,
            request: Arc::new(request),
            info,
            correlation_id: correlation_id.into(),
            sender,
        };

        let closed = self.inner.closed.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = watch.run() => {}
                _ = watch.sender.closed() => {}
                _ = closed.cancelled() => {}
            }
            tracing::trace!(correlation_id = %watch.correlation_id, "Stopped watching request");
        });
        Ok(())
    }
}

struct Watch {
    cache: Cache,
    cancel: CancellationToken,
    registration: Registration,
    request: Arc<dyn Request>,
    info: RequestInfo,
    correlation_id: String,
    sender: mpsc::Sender<UpdateEvent>,
}

impl Watch {
    async fn run(&self) {
        if self.registration.options.supports_blocking {
            self.run_blocking().await
        } else {
            self.run_polling().await
        }
    }

    /// Issues one blocking query after the other, each waiting for the index of the last one.
    async fn run_blocking(&self) {
        let mut index = 0;
        let mut backoff = FailureBackoff::default();

        loop {
            let info = RequestInfo {
                min_index: index,
                ..self.info.clone()
            };
            let result = self.get(info).await;
            if self.cancel.is_cancelled() {
                return;
            }

            let mut changed = true;
            match &result {
                Ok((_, meta)) => {
                    changed = meta.index != index || is_failure(meta);
                    // follows the backend even if its index went back after a reset
                    index = meta.index;
                    if meta.index == 0 || is_failure(meta) {
                        backoff.failed();
                    } else {
                        backoff.succeeded();
                    }
                }
                Err(_) => backoff.failed(),
            }

            if changed && !self.send(result).await {
                return;
            }
            if !self.pause(backoff.next_delay()).await {
                return;
            }
        }
    }

    /// Polls the cache, reporting a change whenever a new value shows up.
    async fn run_polling(&self) {
        let interval = match self.registration.options.refresh_timer {
            Duration::ZERO => DEFAULT_POLL_INTERVAL,
            timer => timer,
        };
        let mut last: Option<(Value, u64)> = None;
        let mut backoff = FailureBackoff::default();

        loop {
            let info = RequestInfo {
                max_age: interval,
                ..self.info.clone()
            };
            let result = self.get(info).await;
            if self.cancel.is_cancelled() {
                return;
            }

            let changed = match &result {
                Ok((value, meta)) => {
                    let changed = match &last {
                        Some((last_value, last_index)) => {
                            *last_index != meta.index || !Arc::ptr_eq(last_value, value)
                        }
                        None => true,
                    };
                    last = Some((Arc::clone(value), meta.index));
                    if is_failure(meta) {
                        backoff.failed();
                    } else {
                        backoff.succeeded();
                    }
                    changed || is_failure(meta)
                }
                Err(_) => {
                    backoff.failed();
                    true
                }
            };

            if changed && !self.send(result).await {
                return;
            }
            if !self.pause(interval + backoff.next_delay()).await {
                return;
            }
        }
    }

    async fn get(&self, info: RequestInfo) -> Result<(Value, ResultMeta), CacheError> {
        self.cache
            .get_with_info(
                &self.cancel,
                &self.registration,
                Arc::clone(&self.request),
                info,
            )
            .await
    }

    /// Delivers an event, returning `false` if nobody listens anymore.
    async fn send(&self, result: Result<(Value, ResultMeta), CacheError>) -> bool {
        metric!(counter("cache.notify.events") += 1, "type" => &*self.registration.name);
        let event = UpdateEvent {
            correlation_id: self.correlation_id.clone(),
            result,
        };
        tokio::select! {
            sent = self.sender.send(event) => sent.is_ok(),
            _ = self.cancel.cancelled() => false,
        }
    }

    /// Sleeps for `delay`, returning `false` if the watch was canceled meanwhile.
    async fn pause(&self, delay: Duration) -> bool {
        if delay.is_zero() {
            return !self.cancel.is_cancelled();
        }
        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            _ = self.cancel.cancelled() => false,
        }
    }
}

/// Whether the value was returned because fetching a newer one failed.
fn is_failure(meta: &ResultMeta) -> bool {
    matches!(meta.outdated, Some(CacheError::Backend(_)))
}
