//! Structured logging initialization via `tracing`.

/// Initialize the tracing subscriber.
///
/// Checks `RUST_LOG` first, then the explicit `level` argument. `json`
/// selects machine-readable output for log shippers.
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::EnvFilter;
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new(level.to_string())
    };
    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
