use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use switchyard_core::time::now_millis;
use switchyard_core::{ErrorRecord, Remediation, RemediationOutcome, Value};

use crate::tracker::listener::panic_message;

// ---------------------------------------------------------------------------
// RemediationHandler trait
// ---------------------------------------------------------------------------

/// Best-effort corrective action for one error kind.
///
/// Invoked at most once per failure; the outcome is reported, never re-applied.
pub trait RemediationHandler: Send + Sync {
    /// # Errors
    ///
    /// An error is reported as [`RemediationOutcome::Failed`].
    fn remediate(&self, record: &ErrorRecord) -> anyhow::Result<Remediation>;
}

impl<F> RemediationHandler for F
where
    F: Fn(&ErrorRecord) -> anyhow::Result<Remediation> + Send + Sync,
{
    fn remediate(&self, record: &ErrorRecord) -> anyhow::Result<Remediation> {
        self(record)
    }
}

// ---------------------------------------------------------------------------
// ErrorRegistry
// ---------------------------------------------------------------------------

/// Maps error kinds to remediation handlers and keeps a bounded error log.
pub struct ErrorRegistry {
    handlers: DashMap<String, Arc<dyn RemediationHandler>>,
    log: Mutex<VecDeque<ErrorRecord>>,
    capacity: usize,
}

impl ErrorRegistry {
    /// Creates an empty registry retaining at most `capacity` error records.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            handlers: DashMap::new(),
            log: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    /// Registers `handler` for `error_kind`, replacing any previous handler.
    pub fn register<H>(&self, error_kind: impl Into<String>, handler: H)
    where
        H: RemediationHandler + 'static,
    {
        self.handlers.insert(error_kind.into(), Arc::new(handler));
    }

    /// Removes the handler for `error_kind`. Returns `false` if none was registered.
    pub fn unregister(&self, error_kind: &str) -> bool {
        self.handlers.remove(error_kind).is_some()
    }

    #[must_use]
    pub fn has_handler(&self, error_kind: &str) -> bool {
        self.handlers.contains_key(error_kind)
    }

    /// Routes `record` to the handler for its kind.
    ///
    /// Returns `None` when no handler is registered. A handler that errors or
    /// panics yields [`RemediationOutcome::Failed`].
    #[must_use]
    pub fn dispatch(&self, record: &ErrorRecord) -> Option<RemediationOutcome> {
        // Clone out of the map so the handler runs without holding a shard lock.
        let handler = self
            .handlers
            .get(&record.error_kind)
            .map(|entry| Arc::clone(entry.value()))?;

        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| handler.remediate(record))) {
            Ok(Ok(remediation)) => {
                tracing::info!(
                    error_kind = %record.error_kind,
                    action = %remediation.action,
                    "remediation applied"
                );
                RemediationOutcome::Applied(remediation)
            }
            Ok(Err(err)) => {
                tracing::warn!(error_kind = %record.error_kind, error = %err, "remediation failed");
                RemediationOutcome::Failed {
                    error: format!("{err:#}"),
                }
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::warn!(error_kind = %record.error_kind, panic = %message, "remediation panicked");
                RemediationOutcome::Failed { error: message }
            }
        };
        Some(outcome)
    }

    /// Appends an error record to the log and returns it.
    pub fn log_error(
        &self,
        error_kind: &str,
        message: &str,
        operation_name: &str,
        context: Value,
    ) -> ErrorRecord {
        let record = ErrorRecord {
            error_kind: error_kind.to_string(),
            message: message.to_string(),
            operation_name: operation_name.to_string(),
            context,
            timestamp_ms: now_millis(),
        };
        let mut log = self.log.lock();
        log.push_back(record.clone());
        while log.len() > self.capacity {
            log.pop_front();
        }
        record
    }

    /// Logged errors, oldest first.
    #[must_use]
    pub fn error_log(&self) -> Vec<ErrorRecord> {
        self.log.lock().iter().cloned().collect()
    }

    pub fn clear_error_log(&self) {
        self.log.lock().clear();
    }
}

impl Default for ErrorRegistry {
    fn default() -> Self {
        Self::new(crate::config::DispatchConfig::default().error_log_capacity)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
