//! Tracing setup for binaries.
//!
//! Library code only emits `tracing` events; whoever owns `main` decides
//! where they go.

use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter.
pub const LOG_ENV: &str = "TALE_LOG";

/// Install a fmt subscriber filtered by `TALE_LOG` (default `info`).
///
/// Safe to call more than once; later calls are ignored.
pub fn init() {
    init_with_default("info");
}

/// Like [`init`] with a different fallback filter.
pub fn init_with_default(default_filter: &str) {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default_filter));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
