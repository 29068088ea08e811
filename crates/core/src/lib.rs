//! Core domain types, errors, and constants for trafficlight request grouping.
//!
//! ## Key Components
//!
//! - **`errors`**: The `Error` enum and `Result` alias shared by the store and
//!   the coalescing manager.
//! - **`response`**: The uniform `{status, headers, body}` response and its
//!   persisted `CachedValue` form.
//! - **`constants`**: Header names, key prefixes and protocol timings.
//! - **`telemetry`**: Tracing subscriber bootstrap.

pub mod constants;
pub mod errors;
pub mod response;
pub mod telemetry;

pub use self::{
    constants::*,
    errors::{Error, Result},
    response::{CachedValue, Headers, Response},
};
