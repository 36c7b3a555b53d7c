pub mod socket_guard;

/// Initializes a `tracing` subscriber for integration tests, once per
/// process. Without this, `tracing::debug!`/`warn!` calls inside the engines
/// under test are silently dropped; run with `RUST_LOG=debug` to see them.
pub fn init_test_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}
