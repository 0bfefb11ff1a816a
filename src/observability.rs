//! Logging infrastructure for SpanJoin.
//!
//! SpanJoin uses `tracing` for structured logging. All events use target
//! "spanjoin" and carry an `event` field for filtering and a `component`
//! field naming the subsystem ("codec", "partitioner", "sweep", "pipeline").
//!
//! The library never installs a global subscriber; the `spanjoin` binary
//! does that with `tracing_subscriber`.

/// Target for all SpanJoin log events.
pub(crate) const SPANJOIN_TARGET: &str = "spanjoin";

/// Macro for info-level log events.
///
/// # Example
/// ```ignore
/// log_info!(
///     component = "pipeline",
///     event = "partitions_built",
///     partitions = table.num_partitions(),
/// );
/// ```
macro_rules! log_info {
    ($($field:tt)*) => {
        ::tracing::info!(target: $crate::observability::SPANJOIN_TARGET, $($field)*)
    };
}

/// Macro for debug-level log events.
macro_rules! log_debug {
    ($($field:tt)*) => {
        ::tracing::debug!(target: $crate::observability::SPANJOIN_TARGET, $($field)*)
    };
}

/// Macro for warn-level log events.
macro_rules! log_warn {
    ($($field:tt)*) => {
        ::tracing::warn!(target: $crate::observability::SPANJOIN_TARGET, $($field)*)
    };
}

pub(crate) use log_debug;
pub(crate) use log_info;
pub(crate) use log_warn;
