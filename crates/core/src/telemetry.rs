use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::constants::TRAFFICLIGHT_LOG_VAR;

type InitResult = Result<(), Box<dyn std::error::Error + Send + Sync + 'static>>;

/// Initialize the tracing system
///
/// The filter comes from `TRAFFICLIGHT_LOG`, then `RUST_LOG`, then defaults to
/// `info`. Events go to stderr in the compact format. Calling this twice
/// returns an error from the second call; the first subscriber stays active.
pub fn init() -> InitResult {
    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .compact()
        .with_target(true)
        .with_thread_ids(false)
        .with_level(true);

    tracing_subscriber::registry()
        .with(env_filter()?)
        .with(fmt_layer)
        .try_init()?;

    Ok(())
}

/// Initialize tracing for tests, writing through the libtest capture
pub fn init_for_tests() -> InitResult {
    fmt()
        .with_env_filter(env_filter()?)
        .with_test_writer()
        .try_init()
}

fn env_filter() -> Result<EnvFilter, Box<dyn std::error::Error + Send + Sync + 'static>> {
    let filter = EnvFilter::try_from_env(TRAFFICLIGHT_LOG_VAR)
        .or_else(|_| EnvFilter::try_from_default_env())
        .or_else(|_| EnvFilter::try_new("info"))?;
    Ok(filter)
}
