use serde::{Deserialize, Serialize};

/// Configuration for a [`DispatchCore`](crate::DispatchCore) and its components.
///
/// Controls log retention, sample history, command parsing, and display refresh cadence.
///
/// Deserializes from partial documents; missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Maximum entries kept in each operation's own log.
    pub max_log_entries: usize,
    /// Maximum entries kept in the tracker-wide journal.
    pub journal_capacity: usize,
    /// Performance samples retained per operation name.
    pub performance_history: usize,
    /// Maximum entries kept in the error log.
    pub error_log_capacity: usize,
    /// Separator between command path segments.
    pub command_delimiter: char,
    /// Step count given to operations started by the dispatcher.
    pub default_total_steps: u32,
    /// Interval between display refreshes in milliseconds.
    pub refresh_interval_ms: u64,
    /// Capacity of queued listener delivery before the oldest event is dropped.
    pub event_queue_capacity: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_log_entries: 1000,
            journal_capacity: 1000,
            performance_history: 32,
            error_log_capacity: 1000,
            command_delimiter: '.',
            default_total_steps: 100,
            refresh_interval_ms: 100,
            event_queue_capacity: 256,
        }
    }
}
