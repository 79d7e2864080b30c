//! JSON-lines tracing subscriber.
//!
//! One JSON object per event with a system-clock timestamp. Module targets
//! are omitted; spans from `#[instrument]` carry the identifiers instead.

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info";

/// `RUST_LOG` when set and valid, otherwise `info`.
pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Parse `directives`, falling back to `info` when they are invalid.
pub fn filter_from(directives: &str) -> EnvFilter {
    EnvFilter::try_new(directives).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

pub fn init() {
    install(env_filter());
}

pub fn init_with_filter(directives: &str) {
    install(filter_from(directives));
}

fn install(filter: EnvFilter) {
    // A second installation fails; the first subscriber stays in place.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false)
        .try_init();
}
