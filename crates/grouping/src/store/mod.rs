//! Lock and response storage over a shared key-value backend
//!
//! Two layers live here:
//!
//! - [`StoreBackend`]: the raw primitives a shared store must offer
//!   (atomic set-if-absent with expiry, delete, set with expiry, get).
//! - [`GroupingStore`]: the four operations the coalescing manager relies on.
//!   [`Store`] implements it over any backend, adding the wire codec and the
//!   best-effort error policy.
//!
//! The manager only ever sees a [`GroupingStore`], so tests can swap in a
//! scripted store without touching a backend.

mod memory;
#[cfg(feature = "redis")]
mod redis;

pub use memory::MemoryBackend;
#[cfg(feature = "redis")]
pub use self::redis::RedisBackend;

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};
use trafficlight_core::constants::LOCK_TTL;
use trafficlight_core::{CachedValue, Response, Result};

use crate::codec;
use crate::config::GroupingConfig;
use crate::context::RequestContext;

/// Marker value written under a held lock key
pub const LOCK_MARKER: &[u8] = b"1";

/// Raw primitives required from a shared key-value store
#[async_trait]
pub trait StoreBackend: Send + Sync {
    /// Atomically create `key` unless it already exists. Returns whether the
    /// value was written. Never waits for the key to disappear.
    async fn set_if_absent(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool>;

    /// Remove `key`; removing a missing key is not an error
    async fn delete(&self, key: &str) -> Result<()>;

    /// Unconditionally write `key` with an expiry
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()>;

    /// Read `key`; `Ok(None)` means absent, `Err` means the read failed
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
}

/// Operations the coalescing manager needs from its store
#[async_trait]
pub trait GroupingStore: Send + Sync {
    /// Try to take the lock for `lock_key` without waiting
    async fn acquire_lock(&self, ctx: &RequestContext, lock_key: &str) -> Result<bool>;

    /// Drop the lock. Failures are logged, never returned; the lock expiry
    /// bounds the damage.
    async fn release_lock(&self, ctx: &RequestContext, lock_key: &str);

    /// Best-effort write of `response` under `response_key`
    async fn store_response(
        &self,
        ctx: &RequestContext,
        response_key: &str,
        response: &Response,
        ttl: Duration,
    );

    /// Read a stored response. Absent is `Ok(None)`; transport and decode
    /// failures are errors.
    async fn fetch_response(
        &self,
        ctx: &RequestContext,
        response_key: &str,
    ) -> Result<Option<CachedValue>>;
}

/// [`GroupingStore`] over a [`StoreBackend`]
#[derive(Debug, Clone)]
pub struct Store<B> {
    backend: B,
    lock_ttl: Duration,
}

impl<B: StoreBackend> Store<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            lock_ttl: LOCK_TTL,
        }
    }

    /// Store whose lock expiry follows `config`
    pub fn with_config(backend: B, config: &GroupingConfig) -> Self {
        Self::new(backend).with_lock_ttl(config.lock_ttl)
    }

    /// Override the lock expiry
    pub fn with_lock_ttl(mut self, lock_ttl: Duration) -> Self {
        self.lock_ttl = lock_ttl;
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn lock_ttl(&self) -> Duration {
        self.lock_ttl
    }
}

#[async_trait]
impl<B: StoreBackend> GroupingStore for Store<B> {
    async fn acquire_lock(&self, ctx: &RequestContext, lock_key: &str) -> Result<bool> {
        let acquired = ctx
            .run(self.backend.set_if_absent(lock_key, LOCK_MARKER, self.lock_ttl))
            .await?;
        debug!(lock_key, acquired, "lock attempt");
        Ok(acquired)
    }

    async fn release_lock(&self, ctx: &RequestContext, lock_key: &str) {
        if let Err(e) = ctx.run(self.backend.delete(lock_key)).await {
            warn!(lock_key, error = %e, "failed to release lock; it will expire on its own");
        }
    }

    async fn store_response(
        &self,
        ctx: &RequestContext,
        response_key: &str,
        response: &Response,
        ttl: Duration,
    ) {
        let payload = match codec::encode(response_key, response) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(response_key, error = %e, "skipping cache write");
                return;
            }
        };

        match ctx.run(self.backend.set(response_key, &payload, ttl)).await {
            Ok(()) => debug!(
                response_key,
                bytes = payload.len(),
                ttl_secs = ttl.as_secs(),
                "stored response"
            ),
            Err(e) => warn!(response_key, error = %e, "cache write failed"),
        }
    }

    async fn fetch_response(
        &self,
        ctx: &RequestContext,
        response_key: &str,
    ) -> Result<Option<CachedValue>> {
        let Some(bytes) = ctx.run(self.backend.get(response_key)).await? else {
            return Ok(None);
        };

        codec::decode(response_key, &bytes).map(Some).map_err(|e| {
            warn!(response_key, error = %e, "unreadable cache entry");
            e
        })
    }
}
