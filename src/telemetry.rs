//! Tracing initialization.

use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber.
///
/// Filter comes from `RUST_LOG`, defaulting to `info` for this crate and
/// `warn` for dependencies. Safe to call once; a second call is a no-op.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "warn,{}=info",
            env!("CARGO_PKG_NAME").replace('-', "_")
        ))
    });
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
