//! Operation record, status state machine, and display snapshot.
//!
//! An [`Operation`] is a trackable unit of work. Its [`OperationStatus`] only moves
//! along the edges encoded in [`OperationStatus::apply`]; the three terminal states
//! (`Completed`, `Failed`, `Cancelled`) accept no further transitions.

use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Largest progress value an operation may report while it is not `Completed`.
///
/// Keeps `progress == 1.0` reserved for the `Completed` status. This is the
/// predecessor of `1.0` in `f64` (`1 - 2^-53`).
pub const MAX_OPEN_PROGRESS: f64 = 1.0 - f64::EPSILON / 2.0;

// ---------------------------------------------------------------------------
// OperationStatus
// ---------------------------------------------------------------------------

/// Lifecycle status of an [`Operation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    NotStarted,
    InProgress,
    Completed,
    Failed,
    Cancelled,
    Paused,
}

/// A requested state change, checked against the state machine before it is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    Start,
    Update,
    Complete,
    Fail,
    Cancel,
    Pause,
    Resume,
}

impl OperationStatus {
    /// `Completed`, `Failed` and `Cancelled` are terminal.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Returns the status reached by applying `transition`, or `None` when the
    /// state machine has no such edge.
    #[must_use]
    pub fn apply(self, transition: Transition) -> Option<Self> {
        match (self, transition) {
            (Self::NotStarted, Transition::Start) | (Self::InProgress, Transition::Update) => {
                Some(Self::InProgress)
            }
            (Self::InProgress, Transition::Complete) => Some(Self::Completed),
            (Self::InProgress, Transition::Fail) => Some(Self::Failed),
            (Self::InProgress, Transition::Cancel) => Some(Self::Cancelled),
            (Self::InProgress, Transition::Pause) => Some(Self::Paused),
            (Self::Paused, Transition::Resume) => Some(Self::InProgress),
            _ => None,
        }
    }

    /// Human-readable label used by displays.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::NotStarted => "Not started",
            Self::InProgress => "In progress",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
            Self::Cancelled => "Cancelled",
            Self::Paused => "Paused",
        }
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Start => "start",
            Self::Update => "update",
            Self::Complete => "complete",
            Self::Fail => "fail",
            Self::Cancel => "cancel",
            Self::Pause => "pause",
            Self::Resume => "resume",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Log entries
// ---------------------------------------------------------------------------

/// A timestamped message in an operation's own log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Wall-clock time in milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    pub message: String,
}

/// A timestamped message in the tracker-wide journal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub timestamp_ms: u64,
    pub operation_id: String,
    pub message: String,
}

// ---------------------------------------------------------------------------
// Operation
// ---------------------------------------------------------------------------

/// Full record of a tracked operation.
///
/// Values handed out by the tracker are copies; mutating them has no effect on
/// the tracker's state.
#[derive(Debug, Clone, Serialize)]
pub struct Operation {
    pub id: String,
    pub name: String,
    pub status: OperationStatus,
    /// Fraction of work done, in `[0.0, 1.0]`.
    pub progress: f64,
    pub current_step: u32,
    /// Always at least 1.
    pub total_steps: u32,
    pub start_time_ms: u64,
    /// Set when a terminal status is reached.
    pub end_time_ms: Option<u64>,
    /// Elapsed time as of the last transition.
    pub elapsed: Duration,
    /// Linear estimate as of the last transition. `None` while progress is zero.
    pub estimated_remaining: Option<Duration>,
    pub message: String,
    /// Lookup key of the parent operation, if any.
    pub parent_id: Option<String>,
    /// Child operation ids in start order.
    pub sub_operations: Vec<String>,
    pub logs: VecDeque<LogEntry>,
    #[serde(skip)]
    pub started_at: Instant,
}

impl Operation {
    /// Creates a fresh `InProgress` operation.
    ///
    /// `total_steps` of zero is normalized to one so progress stays well-defined.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        total_steps: u32,
        parent_id: Option<String>,
        now_ms: u64,
    ) -> Self {
        let name = name.into();
        Self {
            id: id.into(),
            message: format!("Starting {name}..."),
            name,
            status: OperationStatus::InProgress,
            progress: 0.0,
            current_step: 0,
            total_steps: total_steps.max(1),
            start_time_ms: now_ms,
            end_time_ms: None,
            elapsed: Duration::ZERO,
            estimated_remaining: None,
            parent_id,
            sub_operations: Vec::new(),
            logs: VecDeque::new(),
            started_at: Instant::now(),
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Elapsed time: frozen once terminal, live otherwise.
    #[must_use]
    pub fn live_elapsed(&self) -> Duration {
        if self.is_terminal() {
            self.elapsed
        } else {
            self.started_at.elapsed()
        }
    }

    /// Sets progress from a step count, clamping the step to `[0, total_steps]`.
    pub fn set_step(&mut self, step: u32) {
        self.current_step = step.min(self.total_steps);
        self.progress = open_progress(f64::from(self.current_step) / f64::from(self.total_steps));
    }

    /// Sets progress directly, clamping to `[0.0, 1.0]` and deriving the step.
    ///
    /// The caller must reject non-finite values before calling.
    pub fn set_fraction(&mut self, fraction: f64) {
        let clamped = fraction.clamp(0.0, 1.0);
        // Truncation toward zero matches "steps fully done".
        #[allow(
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss
        )]
        let step = (clamped * f64::from(self.total_steps)).floor() as u32;
        self.current_step = step.min(self.total_steps);
        self.progress = open_progress(clamped);
    }

    /// Refreshes `elapsed` and `estimated_remaining` from the monotonic clock.
    pub fn refresh_timing(&mut self) {
        self.elapsed = self.started_at.elapsed();
        self.estimated_remaining = estimate_remaining(self.elapsed, self.progress);
    }

    /// Appends to the bounded log, dropping the oldest entries past `capacity`.
    pub fn push_log(&mut self, entry: LogEntry, capacity: usize) {
        self.logs.push_back(entry);
        while self.logs.len() > capacity {
            self.logs.pop_front();
        }
    }

    /// Display snapshot with timing computed at call time.
    #[must_use]
    pub fn snapshot(&self) -> OperationSnapshot {
        let elapsed = self.live_elapsed();
        let estimated_remaining = match self.status {
            OperationStatus::Completed => Some(Duration::ZERO),
            s if s.is_terminal() => None,
            _ => estimate_remaining(elapsed, self.progress),
        };
        OperationSnapshot {
            id: self.id.clone(),
            name: self.name.clone(),
            status: self.status,
            progress: self.progress,
            current_step: self.current_step,
            total_steps: self.total_steps,
            message: self.message.clone(),
            parent_id: self.parent_id.clone(),
            elapsed_secs: elapsed.as_secs_f64(),
            estimated_remaining_secs: estimated_remaining.map(|d| d.as_secs_f64()),
        }
    }
}

fn open_progress(value: f64) -> f64 {
    value.min(MAX_OPEN_PROGRESS)
}

/// Linear time-remaining estimate: `elapsed / progress - elapsed`.
///
/// Returns `None` when no progress has been made yet.
#[must_use]
pub fn estimate_remaining(elapsed: Duration, progress: f64) -> Option<Duration> {
    if progress <= 0.0 || !progress.is_finite() {
        return None;
    }
    let elapsed_secs = elapsed.as_secs_f64();
    let total = elapsed_secs / progress;
    Duration::try_from_secs_f64((total - elapsed_secs).max(0.0)).ok()
}

// ---------------------------------------------------------------------------
// OperationSnapshot
// ---------------------------------------------------------------------------

/// Compact view of an operation used by listeners and displays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationSnapshot {
    pub id: String,
    pub name: String,
    pub status: OperationStatus,
    pub progress: f64,
    pub current_step: u32,
    pub total_steps: u32,
    pub message: String,
    pub parent_id: Option<String>,
    pub elapsed_secs: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_remaining_secs: Option<f64>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
