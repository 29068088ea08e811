/// Constants used throughout the trafficlight grouping layer
use std::time::Duration;

// Store key namespaces
pub const RESPONSE_KEY_PREFIX: &str = "res:";

// Response header added when a caller is served from the cache
pub const GROUPING_HIT_HEADER: &str = "x-trafficlight-grouping-hit";
pub const GROUPING_HIT_VALUE: &str = "hit";

// Lock lifetime; a crashed holder's lock disappears after this
pub const LOCK_TTL: Duration = Duration::from_secs(60);

// Delay between attempts while another caller holds the lock
pub const POLL_INTERVAL: Duration = Duration::from_millis(400);

// Cache lifetimes chosen by the executor
pub const SUCCESS_TTL: Duration = Duration::from_secs(10 * 60);
pub const SOFT_FAILURE_TTL: Duration = Duration::from_secs(60);

// Environment variable names
pub const TRAFFICLIGHT_LOG_VAR: &str = "TRAFFICLIGHT_LOG";
