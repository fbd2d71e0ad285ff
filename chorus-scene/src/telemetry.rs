//! Optional tracing setup for binaries and tests.
//!
//! The library never installs a subscriber on its own.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install a global subscriber.
///
/// Priority: `RUST_LOG` > `log_level` > `"info"`. Pretty output in debug
/// builds, JSON in release. A second call is a no-op.
pub fn init_tracing(log_level: &str) {
    let level = if log_level.trim().is_empty() {
        "info"
    } else {
        log_level
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    #[cfg(debug_assertions)]
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false))
            .try_init()
            .ok();
    }

    #[cfg(not(debug_assertions))]
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().with_current_span(true))
            .try_init()
            .ok();
    }
}
