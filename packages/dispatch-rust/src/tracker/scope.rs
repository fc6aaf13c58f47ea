//! Closure-scoped operations.
//!
//! [`OperationTracker::track`] starts an operation, runs a closure with a
//! [`ProgressHandle`], and finalizes the operation from the closure's result.

use std::fmt::Display;
use std::panic::{self, AssertUnwindSafe};

use switchyard_core::{Operation, OperationStatus};

use super::listener::panic_message;
use super::{OperationTracker, ProgressUpdate, TrackerError};

/// Progress reporting for one tracked operation, borrowed for the duration of a
/// [`track`](OperationTracker::track) closure.
pub struct ProgressHandle<'a> {
    tracker: &'a OperationTracker,
    id: String,
}

impl<'a> ProgressHandle<'a> {
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn tracker(&self) -> &'a OperationTracker {
        self.tracker
    }

    /// # Errors
    ///
    /// Fails once the operation has left `InProgress`.
    pub fn step(&self, step: u32) -> Result<Operation, TrackerError> {
        self.update(ProgressUpdate::step(step))
    }

    /// # Errors
    ///
    /// Fails once the operation has left `InProgress`, or for a non-finite fraction.
    pub fn fraction(&self, fraction: f64) -> Result<Operation, TrackerError> {
        self.update(ProgressUpdate::fraction(fraction))
    }

    /// # Errors
    ///
    /// Fails once the operation has left `InProgress`.
    pub fn message(&self, message: impl Into<String>) -> Result<Operation, TrackerError> {
        self.update(ProgressUpdate::message(message))
    }

    /// # Errors
    ///
    /// See [`OperationTracker::update`].
    pub fn update(&self, update: ProgressUpdate) -> Result<Operation, TrackerError> {
        self.tracker.update(&self.id, update)
    }

    #[must_use]
    pub fn status(&self) -> Option<OperationStatus> {
        self.tracker.status(&self.id)
    }

    /// `true` once this operation (or an ancestor's cascade) has cancelled it.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.status() == Some(OperationStatus::Cancelled)
    }

    /// Runs `f` as a tracked child of this operation.
    ///
    /// # Errors
    ///
    /// See [`OperationTracker::track`].
    pub fn child<T, E, F>(
        &self,
        id: &str,
        name: &str,
        total_steps: u32,
        f: F,
    ) -> Result<Result<T, E>, TrackerError>
    where
        E: Display,
        F: FnOnce(&ProgressHandle<'_>) -> Result<T, E>,
    {
        self.tracker.track(id, name, total_steps, Some(&self.id), f)
    }
}

impl OperationTracker {
    /// Starts an operation, runs `f`, and finalizes the operation from its result.
    ///
    /// `Ok` completes the operation and `Err` fails it with the error's `Display`
    /// text. If `f` already moved the operation out of `InProgress` (completed it,
    /// paused it, or it was cancelled) the status is left untouched. A panic in `f`
    /// fails the operation and then resumes unwinding.
    ///
    /// # Errors
    ///
    /// Returns the [`TrackerError`] from starting the operation; `f` is not run.
    pub fn track<T, E, F>(
        &self,
        id: &str,
        name: &str,
        total_steps: u32,
        parent_id: Option<&str>,
        f: F,
    ) -> Result<Result<T, E>, TrackerError>
    where
        E: Display,
        F: FnOnce(&ProgressHandle<'_>) -> Result<T, E>,
    {
        self.start(id, name, total_steps, parent_id)?;
        let handle = ProgressHandle {
            tracker: self,
            id: id.to_string(),
        };

        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| f(&handle))) {
            Ok(outcome) => outcome,
            Err(payload) => {
                if self.status(id) == Some(OperationStatus::InProgress) {
                    let message = format!("panicked: {}", panic_message(payload.as_ref()));
                    if let Err(err) = self.fail(id, &message) {
                        tracing::debug!(operation_id = id, error = %err, "tracked operation already finalized");
                    }
                }
                panic::resume_unwind(payload);
            }
        };

        if self.status(id) == Some(OperationStatus::InProgress) {
            let finalized = match &outcome {
                Ok(_) => self.complete(id, None),
                Err(err) => self.fail(id, &err.to_string()),
            };
            if let Err(err) = finalized {
                // Lost a race with a concurrent cancel.
                tracing::debug!(operation_id = id, error = %err, "tracked operation already finalized");
            }
        }
        Ok(outcome)
    }
}
