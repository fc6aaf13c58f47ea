//! Progress events delivered to tracker listeners.

use serde::{Deserialize, Serialize};

use crate::operation::{OperationSnapshot, OperationStatus};

/// Kind of transition that produced a [`ProgressEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Started,
    Updated,
    Completed,
    Failed,
    Cancelled,
    Paused,
    Resumed,
}

impl EventKind {
    /// The event emitted when an operation enters `status` through a transition
    /// other than a plain update.
    #[must_use]
    pub fn entering(status: OperationStatus) -> Self {
        match status {
            OperationStatus::NotStarted | OperationStatus::InProgress => Self::Resumed,
            OperationStatus::Completed => Self::Completed,
            OperationStatus::Failed => Self::Failed,
            OperationStatus::Cancelled => Self::Cancelled,
            OperationStatus::Paused => Self::Paused,
        }
    }
}

/// A single transition notification: what happened and the operation right after it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub kind: EventKind,
    pub operation: OperationSnapshot,
}

impl ProgressEvent {
    #[must_use]
    pub fn new(kind: EventKind, operation: OperationSnapshot) -> Self {
        Self { kind, operation }
    }

    #[must_use]
    pub fn operation_id(&self) -> &str {
        &self.operation.id
    }
}
