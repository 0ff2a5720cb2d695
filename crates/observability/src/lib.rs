//! Process-wide tracing setup shared by the ledger binaries.

/// Initialize process-wide tracing with the default `info` filter.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init(tracing::DEFAULT_DIRECTIVE);
}

/// Tracing configuration (filters, layers).
pub mod tracing;
