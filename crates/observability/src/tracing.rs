//! Tracing/logging initialization.
//!
//! Events are written as JSON lines to stderr so stdout stays free for
//! command output.

use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset or unparsable.
pub const DEFAULT_DIRECTIVE: &str = "info";

/// Initialize tracing/logging for the process.
///
/// `RUST_LOG` takes precedence over `default_directive`. Safe to call
/// multiple times (subsequent calls are no-ops).
pub fn init(default_directive: &str) {
    let filter = filter_or(std::env::var(EnvFilter::DEFAULT_ENV).ok().as_deref(), default_directive);

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn filter_or(directives: Option<&str>, default_directive: &str) -> EnvFilter {
    directives
        .filter(|d| !d.trim().is_empty())
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new(default_directive))
}
