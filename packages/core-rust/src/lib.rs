//! Switchyard core: operation records, status state machine, progress events,
//! performance samples, and command result types.

pub mod event;
pub mod operation;
pub mod perf;
pub mod report;
pub mod time;
pub mod types;

pub use event::{EventKind, ProgressEvent};
pub use operation::{
    JournalEntry, LogEntry, Operation, OperationSnapshot, OperationStatus, Transition,
    MAX_OPEN_PROGRESS,
};
pub use perf::{PerformanceSample, PerformanceSummary};
pub use report::{
    CommandInfo, CommandResult, CommandStatus, ErrorInfo, ErrorKind, ErrorRecord, HandlerError,
    Remediation, RemediationOutcome, PANIC_KIND,
};
pub use types::{Params, Value};
