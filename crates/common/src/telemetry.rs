//! Telemetry and observability initialization for the Meridian gateway.
//!
//! Sets up a `tracing` subscriber with environment-driven filtering. The
//! gateway logs with per-subsystem targets (`cache`, `chain`, `jobs`) so a
//! filter like `MERIDIAN_LOG=info,cache=debug` narrows to one subsystem.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Environment variable consulted for the log filter.
pub const LOG_ENV_VAR: &str = "MERIDIAN_LOG";

/// Initialize the global tracing subscriber.
///
/// Safe to call once per process; subsequent calls are ignored so tests
/// that race on initialization do not panic.
pub fn init_telemetry(default_filter: &str) {
    let filter = EnvFilter::try_from_env(LOG_ENV_VAR)
        .unwrap_or_else(|_| EnvFilter::new(default_filter));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .try_init();
}
