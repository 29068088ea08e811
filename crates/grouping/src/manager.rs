//! Request coalescing over a shared lock/cache store
//!
//! For one cache key, at most one caller across the fleet runs the wrapped
//! operation while holding the lock; everyone else is served from the cache
//! or polls until the executor's result lands there. Coordination is advisory:
//! when the store cannot be reached, callers run the operation themselves.

use std::future::Future;
use std::sync::Arc;

use tracing::{debug, instrument, warn};
use trafficlight_core::constants::GROUPING_HIT_VALUE;
use trafficlight_core::{CachedValue, Response, Result};

use crate::config::GroupingConfig;
use crate::context::RequestContext;
use crate::policy::{self, CacheClass};
use crate::stats::{GroupingStats, GroupingStatsSnapshot};
use crate::store::GroupingStore;

/// Coalescing manager for one store
#[derive(Debug)]
pub struct GroupingManager<S> {
    store: S,
    config: GroupingConfig,
    stats: Arc<GroupingStats>,
}

impl<S: GroupingStore> GroupingManager<S> {
    /// Create a manager with the default protocol timings
    pub fn new(store: S) -> Self {
        Self::with_config(store, GroupingConfig::default())
    }

    pub fn with_config(store: S, config: GroupingConfig) -> Self {
        Self {
            store,
            config,
            stats: Arc::new(GroupingStats::new()),
        }
    }

    pub fn config(&self) -> &GroupingConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn stats(&self) -> GroupingStatsSnapshot {
        self.stats.snapshot()
    }

    /// Serve `cache_key` from the cache, wait for a concurrent executor, or
    /// become the executor and run `operation`
    ///
    /// `operation` is invoked at most once. Its errors are returned verbatim
    /// and never cached. The only way this returns an error of its own is
    /// cancellation of `ctx`, checked at the top of every attempt.
    #[instrument(skip_all, fields(cache_key = %cache_key))]
    pub async fn handle_request<F, Fut>(
        &self,
        ctx: &RequestContext,
        cache_key: &str,
        operation: F,
    ) -> Result<Response>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Response>>,
    {
        let response_key = self.config.response_key(cache_key);
        let lock_key = cache_key;

        loop {
            ctx.check()?;

            match self.store.fetch_response(ctx, &response_key).await {
                Ok(Some(cached)) => {
                    self.stats.record_hit();
                    debug!("served from cache");
                    return Ok(self.mark_hit(cached));
                }
                Ok(None) => self.stats.record_miss(),
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    warn!(error = %e, "cache fetch failed, running operation uncoordinated");
                    return self.fail_open(operation).await;
                }
            }

            match self.store.acquire_lock(ctx, lock_key).await {
                Ok(true) => {
                    return self
                        .execute(ctx, lock_key, &response_key, operation)
                        .await;
                }
                Ok(false) => {
                    self.stats.record_wait();
                    debug!(
                        poll_interval = ?self.config.poll_interval,
                        "another caller is executing, waiting"
                    );
                    // Cancellation is only observed at the top of the loop
                    tokio::time::sleep(self.config.poll_interval).await;
                }
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    warn!(error = %e, "lock attempt failed, running operation uncoordinated");
                    return self.fail_open(operation).await;
                }
            }
        }
    }

    async fn execute<F, Fut>(
        &self,
        ctx: &RequestContext,
        lock_key: &str,
        response_key: &str,
        operation: F,
    ) -> Result<Response>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Response>>,
    {
        self.stats.record_execution();
        debug!("lock acquired, executing operation");

        let outcome = operation().await;
        // Cache write and release outlive the caller's cancellation
        let settle = RequestContext::background();
        if ctx.is_done() {
            debug!("caller finished during operation, settling anyway");
        }

        let response = match outcome {
            Ok(response) => response,
            Err(e) => {
                self.stats.record_operation_failure();
                self.store.release_lock(&settle, lock_key).await;
                return Err(e);
            }
        };

        let class = policy::classify(&response);
        if class == CacheClass::SoftFailure {
            self.stats.record_soft_failure();
            debug!(status = response.status, "soft failure, caching briefly");
        }

        self.store
            .store_response(&settle, response_key, &response, self.config.ttl_for(class))
            .await;
        // Released even when the write above was skipped
        self.store.release_lock(&settle, lock_key).await;

        Ok(response)
    }

    async fn fail_open<F, Fut>(&self, operation: F) -> Result<Response>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Response>>,
    {
        self.stats.record_fail_open();
        operation().await
    }

    fn mark_hit(&self, cached: CachedValue) -> Response {
        let mut response = Response::from(cached);
        response
            .headers
            .append(self.config.hit_header.as_str(), GROUPING_HIT_VALUE);
        response
    }
}
