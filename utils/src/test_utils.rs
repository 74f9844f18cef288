//! Helpers shared by the test suites of the workspace crates.

use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

/// Initialize logging for a test. Safe to call from every test; only the
/// first call in a process installs the subscriber.
pub fn setup_test() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_test_writer())
        .try_init();
}
