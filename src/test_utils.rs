//! Shared helpers for unit tests.

use std::fs;
use std::path::Path;
use std::sync::Once;

static INIT_LOGGING: Once = Once::new();

/// Installs a test-writer tracing subscriber once per process.
pub fn init_test_logging() {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
            )
            .with_test_writer()
            .try_init();
    });
}

/// Writes `content` to `path`, creating parent directories.
pub fn write_file(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create parent directories");
    }
    fs::write(path, content).expect("write file");
}

/// Logs the start of a test phase.
#[macro_export]
#[doc(hidden)]
macro_rules! test_phase {
    ($name:expr) => {
        ::tracing::info!(test = $name, "=== test phase ===");
    };
}

/// Logs test completion.
#[macro_export]
#[doc(hidden)]
macro_rules! test_complete {
    ($name:expr) => {
        ::tracing::info!(test = $name, "=== test complete ===");
    };
}

/// Asserts a condition and logs the expected and actual values first.
#[macro_export]
#[doc(hidden)]
macro_rules! assert_with_log {
    ($cond:expr, $what:expr, $expected:expr, $actual:expr) => {{
        ::tracing::debug!(
            check = $what,
            expected = ?$expected,
            actual = ?$actual,
            "assert"
        );
        assert!($cond, "{}: expected {:?}, got {:?}", $what, $expected, $actual);
    }};
}
