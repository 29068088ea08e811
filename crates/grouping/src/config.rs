//! Grouping configuration with environment overrides and validation
use std::time::Duration;

use trafficlight_core::constants::{
    GROUPING_HIT_HEADER, LOCK_TTL, POLL_INTERVAL, RESPONSE_KEY_PREFIX, SOFT_FAILURE_TTL,
    SUCCESS_TTL,
};
use trafficlight_core::{Error, Result};

use crate::policy::CacheClass;

pub const POLL_INTERVAL_MS_VAR: &str = "TRAFFICLIGHT_GROUPING_POLL_INTERVAL_MS";
pub const LOCK_TTL_SECS_VAR: &str = "TRAFFICLIGHT_GROUPING_LOCK_TTL_SECS";
pub const SUCCESS_TTL_SECS_VAR: &str = "TRAFFICLIGHT_GROUPING_SUCCESS_TTL_SECS";
pub const SOFT_FAILURE_TTL_SECS_VAR: &str = "TRAFFICLIGHT_GROUPING_SOFT_FAILURE_TTL_SECS";
pub const RESPONSE_PREFIX_VAR: &str = "TRAFFICLIGHT_GROUPING_RESPONSE_PREFIX";

/// Timings and naming used by the coalescing protocol
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupingConfig {
    /// Sleep between attempts while another caller holds the lock
    pub poll_interval: Duration,
    /// Expiry of a lock entry
    pub lock_ttl: Duration,
    /// Cache lifetime of a successful response
    pub success_ttl: Duration,
    /// Cache lifetime of a non-2xx response or one carrying an errors list
    pub soft_failure_ttl: Duration,
    /// Prefix turning a cache key into its response key
    pub response_key_prefix: String,
    /// Header appended to responses served from the cache
    pub hit_header: String,
}

impl Default for GroupingConfig {
    fn default() -> Self {
        Self {
            poll_interval: POLL_INTERVAL,
            lock_ttl: LOCK_TTL,
            success_ttl: SUCCESS_TTL,
            soft_failure_ttl: SOFT_FAILURE_TTL,
            response_key_prefix: RESPONSE_KEY_PREFIX.to_string(),
            hit_header: GROUPING_HIT_HEADER.to_string(),
        }
    }
}

impl GroupingConfig {
    pub fn builder() -> GroupingConfigBuilder {
        GroupingConfigBuilder::new()
    }

    /// Defaults overlaid with `TRAFFICLIGHT_GROUPING_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Defaults overlaid with values from `lookup`
    ///
    /// A variable that is present but cannot be parsed is an error rather
    /// than silently falling back to the default.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut builder = GroupingConfigBuilder::new();

        if let Some(ms) = parse_u64(&lookup, POLL_INTERVAL_MS_VAR)? {
            builder = builder.with_poll_interval(Duration::from_millis(ms));
        }
        if let Some(secs) = parse_u64(&lookup, LOCK_TTL_SECS_VAR)? {
            builder = builder.with_lock_ttl(Duration::from_secs(secs));
        }
        if let Some(secs) = parse_u64(&lookup, SUCCESS_TTL_SECS_VAR)? {
            builder = builder.with_success_ttl(Duration::from_secs(secs));
        }
        if let Some(secs) = parse_u64(&lookup, SOFT_FAILURE_TTL_SECS_VAR)? {
            builder = builder.with_soft_failure_ttl(Duration::from_secs(secs));
        }
        if let Some(prefix) = lookup(RESPONSE_PREFIX_VAR) {
            builder = builder.with_response_key_prefix(prefix);
        }

        builder.build()
    }

    /// Response key for a cache key
    pub fn response_key(&self, cache_key: &str) -> String {
        format!("{}{}", self.response_key_prefix, cache_key)
    }

    /// Cache lifetime for a classified response
    pub fn ttl_for(&self, class: CacheClass) -> Duration {
        match class {
            CacheClass::Success => self.success_ttl,
            CacheClass::SoftFailure => self.soft_failure_ttl,
        }
    }
}

fn parse_u64<F>(lookup: &F, var: &str) -> Result<Option<u64>>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(None),
        Some(raw) => raw.trim().parse::<u64>().map(Some).map_err(|e| {
            Error::configuration(format!("{var} must be a non-negative integer, got '{raw}': {e}"))
        }),
    }
}

/// Builder for creating grouping configurations
#[derive(Debug, Clone, Default)]
pub struct GroupingConfigBuilder {
    config: GroupingConfig,
}

impl GroupingConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    pub fn with_lock_ttl(mut self, ttl: Duration) -> Self {
        self.config.lock_ttl = ttl;
        self
    }

    pub fn with_success_ttl(mut self, ttl: Duration) -> Self {
        self.config.success_ttl = ttl;
        self
    }

    pub fn with_soft_failure_ttl(mut self, ttl: Duration) -> Self {
        self.config.soft_failure_ttl = ttl;
        self
    }

    pub fn with_response_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.response_key_prefix = prefix.into();
        self
    }

    pub fn with_hit_header(mut self, header: impl Into<String>) -> Self {
        self.config.hit_header = header.into();
        self
    }

    /// Validate and return the configuration
    pub fn build(self) -> Result<GroupingConfig> {
        let config = self.config;

        let durations = [
            ("poll_interval", config.poll_interval),
            ("lock_ttl", config.lock_ttl),
            ("success_ttl", config.success_ttl),
            ("soft_failure_ttl", config.soft_failure_ttl),
        ];
        for (name, value) in durations {
            if value.is_zero() {
                return Err(Error::configuration(format!("{name} must be greater than zero")));
            }
        }
        // An empty prefix would put responses in the lock namespace
        if config.response_key_prefix.is_empty() {
            return Err(Error::configuration("response_key_prefix must not be empty"));
        }
        if config.hit_header.trim().is_empty() {
            return Err(Error::configuration("hit_header must not be empty"));
        }

        Ok(config)
    }
}

#[cfg(feature = "redis")]
pub use redis_config::*;

#[cfg(feature = "redis")]
mod redis_config {
    use super::*;

    pub const REDIS_URL_VAR: &str = "TRAFFICLIGHT_REDIS_URL";
    pub const REDIS_PREFIX_VAR: &str = "TRAFFICLIGHT_REDIS_PREFIX";
    pub const REDIS_CONNECT_TIMEOUT_SECS_VAR: &str = "TRAFFICLIGHT_REDIS_CONNECT_TIMEOUT_SECS";
    pub const REDIS_OPERATION_TIMEOUT_SECS_VAR: &str = "TRAFFICLIGHT_REDIS_OPERATION_TIMEOUT_SECS";

    /// Redis connection configuration
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct RedisConfig {
        /// Redis connection URL (e.g., "redis://localhost:6379")
        pub url: String,
        /// Namespace prepended to every lock and response key
        pub key_prefix: String,
        pub connect_timeout: Duration,
        /// Upper bound on a single store call
        pub operation_timeout: Duration,
    }

    impl Default for RedisConfig {
        fn default() -> Self {
            Self {
                url: "redis://localhost:6379".to_string(),
                key_prefix: String::new(),
                connect_timeout: Duration::from_secs(5),
                operation_timeout: Duration::from_secs(2),
            }
        }
    }

    impl RedisConfig {
        pub fn from_env() -> Result<Self> {
            Self::from_lookup(|name| std::env::var(name).ok())
        }

        pub fn from_lookup<F>(lookup: F) -> Result<Self>
        where
            F: Fn(&str) -> Option<String>,
        {
            let mut config = Self::default();
            if let Some(url) = lookup(REDIS_URL_VAR) {
                config.url = url;
            }
            if let Some(prefix) = lookup(REDIS_PREFIX_VAR) {
                config.key_prefix = prefix;
            }
            if let Some(secs) = parse_u64(&lookup, REDIS_CONNECT_TIMEOUT_SECS_VAR)? {
                config.connect_timeout = Duration::from_secs(secs);
            }
            if let Some(secs) = parse_u64(&lookup, REDIS_OPERATION_TIMEOUT_SECS_VAR)? {
                config.operation_timeout = Duration::from_secs(secs);
            }
            Ok(config)
        }
    }
}
