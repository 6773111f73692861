pub mod builders;
pub mod fake_backend;

use std::sync::Once;
use std::time::Duration;

use tracing_subscriber::{EnvFilter, fmt};

static INIT: Once = Once::new();

/// Upper bound on any single coordinator-loop test.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Initialise tracing for tests. Output is captured per-test and only
/// shown for failures (unless `-- --nocapture`); set `RUST_LOG=debug`
/// for more detail.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .init();
    });
}

/// Run a future under [`TEST_TIMEOUT`]; a hung coordinator loop fails
/// the test instead of wedging the suite.
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(TEST_TIMEOUT, f)
        .await
        .expect("test timed out")
}
