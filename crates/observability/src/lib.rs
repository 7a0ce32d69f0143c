//! Tracing setup and the lifecycle event logger.

/// Initialize process-wide observability (tracing/logging).
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Tracing configuration (filters, layers).
pub mod tracing;

/// Job lifecycle logging and counters.
pub mod lifecycle;

pub use lifecycle::{CounterSnapshot, EventLoggerHandle, LifecycleCounters, spawn_event_logger};
