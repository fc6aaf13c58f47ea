//! Handler failures, error records, remediation outcomes, and the command result envelope.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::perf::PerformanceSample;
use crate::types::Value;

/// Error kind assigned to panics caught at the handler boundary.
pub const PANIC_KIND: &str = "Panic";

// ---------------------------------------------------------------------------
// HandlerError
// ---------------------------------------------------------------------------

/// Failure reported by a command handler.
///
/// `kind` is the key used to look up a remediation callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct HandlerError {
    pub kind: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl HandlerError {
    #[must_use]
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            details: None,
        }
    }

    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Wraps a panic message caught at the handler boundary.
    #[must_use]
    pub fn panic(message: impl Into<String>) -> Self {
        Self::new(PANIC_KIND, message)
    }
}

// ---------------------------------------------------------------------------
// ErrorRecord / remediation
// ---------------------------------------------------------------------------

/// Entry in the error log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub error_kind: String,
    pub message: String,
    pub operation_name: String,
    /// Parameters or other context captured at failure time.
    pub context: Value,
    pub timestamp_ms: u64,
}

/// What a remediation callback attempted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Remediation {
    pub action: String,
    #[serde(default)]
    pub result: Value,
}

impl Remediation {
    #[must_use]
    pub fn new(action: impl Into<String>, result: Value) -> Self {
        Self {
            action: action.into(),
            result,
        }
    }
}

/// Result of routing an error through a registered remediation callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RemediationOutcome {
    Applied(Remediation),
    /// The callback itself errored or panicked.
    Failed { error: String },
}

// ---------------------------------------------------------------------------
// CommandResult
// ---------------------------------------------------------------------------

/// Classification of a failed command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    InvalidCommand,
    ModuleNotFound,
    FunctionNotFound,
    HandlerError,
    Cancelled,
    DuplicateId,
    NotFound,
    InvalidTransition,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Success,
    Error,
}

/// Logged error and any remediation attempted for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub record: ErrorRecord,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remediation: Option<RemediationOutcome>,
}

/// Structured outcome of executing a command. Failures are never raised, only returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResult {
    pub status: CommandStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    /// Registry segment that failed to resolve.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub missing_segment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub performance_metrics: Option<PerformanceSample>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_info: Option<ErrorInfo>,
}

impl CommandResult {
    #[must_use]
    pub fn success(operation_id: impl Into<String>, result: Value) -> Self {
        Self {
            status: CommandStatus::Success,
            result: Some(result),
            message: None,
            error_kind: None,
            missing_segment: None,
            operation_id: Some(operation_id.into()),
            performance_metrics: None,
            error_info: None,
        }
    }

    #[must_use]
    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            status: CommandStatus::Error,
            result: None,
            message: Some(message.into()),
            error_kind: Some(kind),
            missing_segment: None,
            operation_id: None,
            performance_metrics: None,
            error_info: None,
        }
    }

    #[must_use]
    pub fn with_operation(mut self, operation_id: impl Into<String>) -> Self {
        self.operation_id = Some(operation_id.into());
        self
    }

    #[must_use]
    pub fn with_missing_segment(mut self, segment: impl Into<String>) -> Self {
        self.missing_segment = Some(segment.into());
        self
    }

    #[must_use]
    pub fn with_metrics(mut self, sample: PerformanceSample) -> Self {
        self.performance_metrics = Some(sample);
        self
    }

    #[must_use]
    pub fn with_error_info(mut self, info: ErrorInfo) -> Self {
        self.error_info = Some(info);
        self
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == CommandStatus::Success
    }
}

/// Discovery metadata for a registered command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandInfo {
    pub name: String,
    pub description: String,
}
