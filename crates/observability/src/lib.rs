//! Tracing and logging setup shared by binaries and tests.

/// Initialize process-wide logging.
///
/// Safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Initialize logging for tests: human-readable, captured by the test harness.
pub fn init_for_tests() {
    tracing::init_with(tracing::LogFormat::Test);
}

/// Subscriber configuration (filters, output format).
pub mod tracing;
