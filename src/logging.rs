//! Logging setup
//!
//! `tracing` is used throughout the crate. The subscriber is installed once by
//! the binary: JSON lines in production, compact human output elsewhere.
//! `RUST_LOG` takes precedence over the configured level.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Install the global tracing subscriber
pub fn init_tracing(log_level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let console_layer = if json {
        fmt::layer().json().with_filter(filter).boxed()
    } else {
        fmt::layer().compact().with_filter(filter).boxed()
    };

    tracing_subscriber::registry().with(console_layer).init();
}

/// Log a bridging step; `info` for requests that asked for verbose logging,
/// `debug` otherwise.
///
/// ```ignore
/// bridge_step!(request.verbose, queue = %name, "Producer created");
/// ```
#[macro_export]
macro_rules! bridge_step {
    ($verbose:expr, $($arg:tt)+) => {
        if $verbose {
            ::tracing::info!($($arg)+);
        } else {
            ::tracing::debug!($($arg)+);
        }
    };
}
