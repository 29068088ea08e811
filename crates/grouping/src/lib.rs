//! Request grouping for trafficlight
//!
//! This crate coalesces identical upstream calls across a fleet of processes:
//! - Cache-aside reads of previously stored responses
//! - A per-key lock so at most one caller runs the upstream operation
//! - Polling waiters that pick up the executor's result from the cache
//! - Fail-open behavior whenever the shared store misbehaves
//! - Short cache lifetimes for soft failures
//!
//! Stores are pluggable through [`StoreBackend`]. An in-process backend is
//! always available; a Redis backend is built with the `redis` feature.

pub mod codec;
pub mod config;
pub mod context;
pub mod manager;
pub mod policy;
pub mod stats;
pub mod store;

pub use config::{GroupingConfig, GroupingConfigBuilder};
#[cfg(feature = "redis")]
pub use config::RedisConfig;
pub use context::RequestContext;
pub use manager::GroupingManager;
pub use policy::{classify, CacheClass};
pub use stats::{GroupingStats, GroupingStatsSnapshot};
#[cfg(feature = "redis")]
pub use store::RedisBackend;
pub use store::{GroupingStore, MemoryBackend, Store, StoreBackend};

pub use trafficlight_core::{CachedValue, Error, Headers, Response, Result};
