//! Tracing setup for embedding harnesses

use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber
///
/// Reads `RUST_LOG` with an `info` default. Call once, from the embedding
/// test harness; repeated calls are ignored.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init();
}
