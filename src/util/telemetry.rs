//! Telemetry helpers for structured logging.
//!
//! Resolvers tag log lines that need a human with `[alert-operator]` and
//! expected-but-noteworthy paths with `[not-a-bug]`.

use tracing_subscriber::EnvFilter;

/// Directive used when `RUST_LOG` is not set.
pub const DEFAULT_LOG_DIRECTIVE: &str = "prometheus_task_queue=info";

/// Install a default env-based subscriber unless one is already set.
pub fn init_tracing() {
    init_tracing_with(DEFAULT_LOG_DIRECTIVE);
}

/// Install a subscriber using `RUST_LOG`, falling back to `default_directive`.
pub fn init_tracing_with(default_directive: &str) {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
