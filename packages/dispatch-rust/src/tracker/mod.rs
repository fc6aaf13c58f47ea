//! Hierarchical operation tracking.
//!
//! [`OperationTracker`] owns every operation started during the process lifetime,
//! enforces the status state machine, links parents to children, propagates
//! cancellation downward, maintains the single "active" operation used by displays,
//! and notifies listeners of each transition.
//!
//! All state lives behind one `parking_lot::Mutex`. Lookup, mutation, active-slot
//! bookkeeping and listener delivery for a transition happen under a single lock.

pub mod listener;
pub mod queue;
pub mod scope;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use switchyard_core::time::now_millis;
use switchyard_core::{
    ErrorKind, EventKind, JournalEntry, LogEntry, Operation, OperationSnapshot, OperationStatus,
    ProgressEvent, Transition,
};

use crate::config::DispatchConfig;

pub use listener::{ListenerId, ListenerSet, OperationListener};
pub use queue::{event_queue, EventReceiver, QueueListener};
pub use scope::ProgressHandle;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Misuse of the tracker API. Never retried.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TrackerError {
    #[error("operation {id} already exists")]
    DuplicateId { id: String },
    #[error("operation {id} not found")]
    NotFound { id: String },
    #[error("cannot {transition} operation {id}: status is {from}")]
    InvalidTransition {
        id: String,
        from: OperationStatus,
        transition: Transition,
    },
    #[error("cannot attach a child to operation {parent_id}: status is {status}")]
    ParentFinished {
        parent_id: String,
        status: OperationStatus,
    },
    #[error("progress must be a finite number, got {value}")]
    InvalidProgress { value: f64 },
}

impl TrackerError {
    /// Classification used in command results.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DuplicateId { .. } => ErrorKind::DuplicateId,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::InvalidTransition { .. }
            | Self::ParentFinished { .. }
            | Self::InvalidProgress { .. } => ErrorKind::InvalidTransition,
        }
    }
}

// ---------------------------------------------------------------------------
// ProgressUpdate
// ---------------------------------------------------------------------------

/// What drives progress in an update. Step and fraction are mutually exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Advance {
    /// Leave progress unchanged.
    #[default]
    Keep,
    /// Set the current step; progress is derived.
    Step(u32),
    /// Set progress directly; the step is derived.
    Fraction(f64),
}

/// Arguments to [`OperationTracker::update`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressUpdate {
    pub advance: Advance,
    pub message: Option<String>,
}

impl ProgressUpdate {
    #[must_use]
    pub fn step(step: u32) -> Self {
        Self {
            advance: Advance::Step(step),
            message: None,
        }
    }

    #[must_use]
    pub fn fraction(fraction: f64) -> Self {
        Self {
            advance: Advance::Fraction(fraction),
            message: None,
        }
    }

    /// Message-only update.
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            advance: Advance::Keep,
            message: Some(message.into()),
        }
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Tracker state
// ---------------------------------------------------------------------------

struct TrackerState {
    operations: HashMap<String, Operation>,
    /// Start order, for deterministic listing.
    order: Vec<String>,
    active_id: Option<String>,
    listeners: ListenerSet,
    journal: VecDeque<JournalEntry>,
}

impl TrackerState {
    fn get_mut(&mut self, id: &str) -> Result<&mut Operation, TrackerError> {
        self.operations
            .get_mut(id)
            .ok_or_else(|| TrackerError::NotFound { id: id.to_string() })
    }

    /// Checks `transition` against the state machine and returns the target status.
    fn check(&self, id: &str, transition: Transition) -> Result<OperationStatus, TrackerError> {
        let op = self
            .operations
            .get(id)
            .ok_or_else(|| TrackerError::NotFound { id: id.to_string() })?;
        op.status
            .apply(transition)
            .ok_or_else(|| TrackerError::InvalidTransition {
                id: id.to_string(),
                from: op.status,
                transition,
            })
    }

    /// Clears the active slot if `id` holds it, promoting an in-progress parent.
    fn release_active(&mut self, id: &str) {
        if self.active_id.as_deref() != Some(id) {
            return;
        }
        self.active_id = None;
        let parent_id = self.operations.get(id).and_then(|op| op.parent_id.clone());
        if let Some(parent_id) = parent_id {
            let parent_running = self
                .operations
                .get(&parent_id)
                .is_some_and(|p| p.status == OperationStatus::InProgress);
            if parent_running {
                tracing::debug!(operation_id = %parent_id, "active operation bubbled up to parent");
                self.active_id = Some(parent_id);
            }
        }
    }

    /// All descendants of `root` in depth-first pre-order, following `sub_operations` order.
    fn descendants(&self, root: &str) -> Vec<String> {
        let mut out = Vec::new();
        let mut stack: Vec<&str> = self
            .operations
            .get(root)
            .map(|op| op.sub_operations.iter().rev().map(String::as_str).collect())
            .unwrap_or_default();
        while let Some(id) = stack.pop() {
            if let Some(op) = self.operations.get(id) {
                stack.extend(op.sub_operations.iter().rev().map(String::as_str));
            }
            out.push(id.to_string());
        }
        out
    }

    fn journal(&mut self, operation_id: &str, message: String, capacity: usize) {
        self.journal.push_back(JournalEntry {
            timestamp_ms: now_millis(),
            operation_id: operation_id.to_string(),
            message,
        });
        while self.journal.len() > capacity {
            self.journal.pop_front();
        }
    }

    fn emit(&self, kind: EventKind, id: &str) {
        if self.listeners.is_empty() {
            return;
        }
        if let Some(op) = self.operations.get(id) {
            self.listeners
                .notify(&ProgressEvent::new(kind, op.snapshot()));
        }
    }
}

// ---------------------------------------------------------------------------
// OperationTracker
// ---------------------------------------------------------------------------

/// Append-only registry of operations with a status state machine per operation.
///
/// Operations are never removed. Safe to share across threads via `Arc`; a display
/// thread may read [`active_snapshot`](Self::active_snapshot) while another thread
/// drives transitions.
pub struct OperationTracker {
    state: Mutex<TrackerState>,
    max_log_entries: usize,
    journal_capacity: usize,
}

impl OperationTracker {
    /// Creates an empty tracker using the log limits from `config`.
    #[must_use]
    pub fn new(config: &DispatchConfig) -> Self {
        Self {
            state: Mutex::new(TrackerState {
                operations: HashMap::new(),
                order: Vec::new(),
                active_id: None,
                listeners: ListenerSet::default(),
                journal: VecDeque::new(),
            }),
            max_log_entries: config.max_log_entries,
            journal_capacity: config.journal_capacity,
        }
    }

    /// Starts a new operation in `InProgress`.
    ///
    /// If `parent_id` names an existing operation, the new id is appended to its
    /// `sub_operations`. An unknown parent id is kept as a plain reference. The
    /// new operation takes the active slot when the slot is empty.
    ///
    /// # Errors
    ///
    /// `DuplicateId` if `id` was used before; `ParentFinished` if the parent
    /// exists but is already terminal.
    pub fn start(
        &self,
        id: &str,
        name: &str,
        total_steps: u32,
        parent_id: Option<&str>,
    ) -> Result<Operation, TrackerError> {
        let mut state = self.state.lock();
        if state.operations.contains_key(id) {
            return Err(TrackerError::DuplicateId { id: id.to_string() });
        }
        if let Some(parent) = parent_id.and_then(|p| state.operations.get(p)) {
            if parent.is_terminal() {
                return Err(TrackerError::ParentFinished {
                    parent_id: parent.id.clone(),
                    status: parent.status,
                });
            }
        }

        let now = now_millis();
        let mut op = Operation::new(id, name, total_steps, parent_id.map(str::to_string), now);
        let started = format!("Started operation: {name}");
        op.push_log(
            LogEntry {
                timestamp_ms: now,
                message: started.clone(),
            },
            self.max_log_entries,
        );

        if let Some(parent) = parent_id.and_then(|p| state.operations.get_mut(p)) {
            parent.sub_operations.push(id.to_string());
        }
        state.operations.insert(id.to_string(), op);
        state.order.push(id.to_string());
        if state.active_id.is_none() {
            state.active_id = Some(id.to_string());
        }
        state.journal(id, started, self.journal_capacity);

        tracing::debug!(operation_id = id, name, total_steps, parent_id, "operation started");
        state.emit(EventKind::Started, id);
        Ok(state.operations[id].clone())
    }

    /// Advances progress and/or replaces the status message.
    ///
    /// A step is clamped to `[0, total_steps]`, a fraction to `[0.0, 1.0]`; either
    /// recomputes the other. Elapsed time and the linear time-remaining estimate are
    /// refreshed. Progress stays below `1.0` until the operation completes.
    ///
    /// # Errors
    ///
    /// `NotFound`, `InvalidTransition` unless `InProgress`, or `InvalidProgress`
    /// for a non-finite fraction.
    pub fn update(&self, id: &str, update: ProgressUpdate) -> Result<Operation, TrackerError> {
        if let Advance::Fraction(value) = update.advance {
            if !value.is_finite() {
                return Err(TrackerError::InvalidProgress { value });
            }
        }

        let mut state = self.state.lock();
        state.check(id, Transition::Update)?;
        let max_log_entries = self.max_log_entries;
        let op = state.get_mut(id)?;
        match update.advance {
            Advance::Keep => {}
            Advance::Step(step) => op.set_step(step),
            Advance::Fraction(fraction) => op.set_fraction(fraction),
        }
        op.refresh_timing();
        let logged = update.message.filter(|m| !m.is_empty());
        if let Some(message) = &logged {
            op.message.clone_from(message);
            op.push_log(
                LogEntry {
                    timestamp_ms: now_millis(),
                    message: message.clone(),
                },
                max_log_entries,
            );
        }
        let updated = op.clone();
        if let Some(message) = logged {
            state.journal(id, message, self.journal_capacity);
        }

        tracing::trace!(operation_id = id, progress = updated.progress, "operation updated");
        state.emit(EventKind::Updated, id);
        Ok(updated)
    }

    /// Marks an operation `Completed` with progress `1.0`.
    ///
    /// # Errors
    ///
    /// `NotFound`, or `InvalidTransition` unless `InProgress`.
    pub fn complete(&self, id: &str, message: Option<&str>) -> Result<Operation, TrackerError> {
        let mut state = self.state.lock();
        let status = state.check(id, Transition::Complete)?;
        let op = state.get_mut(id)?;
        op.message = message.map_or_else(|| format!("Completed: {}", op.name), str::to_string);
        op.progress = 1.0;
        op.current_step = op.total_steps;
        let note = format!("Completed operation: {}", op.name);
        self.finish(&mut state, id, status, note, EventKind::Completed)
    }

    /// Marks an operation `Failed`, keeping `error_message` as its final message.
    ///
    /// # Errors
    ///
    /// `NotFound`, or `InvalidTransition` unless `InProgress`.
    pub fn fail(&self, id: &str, error_message: &str) -> Result<Operation, TrackerError> {
        let mut state = self.state.lock();
        let status = state.check(id, Transition::Fail)?;
        let op = state.get_mut(id)?;
        op.message = error_message.to_string();
        let note = format!("Failed operation: {} - {error_message}", op.name);
        self.finish(&mut state, id, status, note, EventKind::Failed)
    }

    /// Cancels an in-progress operation and every non-terminal descendant.
    ///
    /// Descendants are cancelled depth-first in start order, after the target.
    /// Already-terminal descendants keep their status. Running handlers are not
    /// interrupted; they observe the change through [`status`](Self::status).
    ///
    /// # Errors
    ///
    /// `NotFound`, or `InvalidTransition` unless `InProgress`.
    pub fn cancel(&self, id: &str) -> Result<Operation, TrackerError> {
        let mut state = self.state.lock();
        let status = state.check(id, Transition::Cancel)?;
        let descendants = state.descendants(id);

        let cancelled = self.cancel_one(&mut state, id, status)?;
        for child_id in descendants {
            let open = state
                .operations
                .get(&child_id)
                .is_some_and(|op| !op.is_terminal());
            if open {
                self.cancel_one(&mut state, &child_id, OperationStatus::Cancelled)?;
            }
        }
        Ok(cancelled)
    }

    /// Suspends an in-progress operation.
    ///
    /// # Errors
    ///
    /// `NotFound`, or `InvalidTransition` unless `InProgress`.
    pub fn pause(&self, id: &str) -> Result<Operation, TrackerError> {
        self.toggle(id, Transition::Pause, "Paused")
    }

    /// Resumes a paused operation.
    ///
    /// # Errors
    ///
    /// `NotFound`, or `InvalidTransition` unless `Paused`.
    pub fn resume(&self, id: &str) -> Result<Operation, TrackerError> {
        self.toggle(id, Transition::Resume, "Resumed")
    }

    // -- reads --------------------------------------------------------------

    #[must_use]
    pub fn get(&self, id: &str) -> Option<Operation> {
        self.state.lock().operations.get(id).cloned()
    }

    /// Current status without copying the record.
    #[must_use]
    pub fn status(&self, id: &str) -> Option<OperationStatus> {
        self.state.lock().operations.get(id).map(|op| op.status)
    }

    #[must_use]
    pub fn snapshot(&self, id: &str) -> Option<OperationSnapshot> {
        self.state.lock().operations.get(id).map(Operation::snapshot)
    }

    #[must_use]
    pub fn get_active(&self) -> Option<Operation> {
        let state = self.state.lock();
        state
            .active_id
            .as_deref()
            .and_then(|id| state.operations.get(id))
            .cloned()
    }

    /// Display view of the active operation, timing computed now.
    #[must_use]
    pub fn active_snapshot(&self) -> Option<OperationSnapshot> {
        let state = self.state.lock();
        state
            .active_id
            .as_deref()
            .and_then(|id| state.operations.get(id))
            .map(Operation::snapshot)
    }

    /// Every operation in start order.
    #[must_use]
    pub fn list_all(&self) -> Vec<Operation> {
        let state = self.state.lock();
        state
            .order
            .iter()
            .filter_map(|id| state.operations.get(id))
            .cloned()
            .collect()
    }

    /// The newest `limit` journal entries, oldest first.
    #[must_use]
    pub fn recent_journal(&self, limit: usize) -> Vec<JournalEntry> {
        let state = self.state.lock();
        let skip = state.journal.len().saturating_sub(limit);
        state.journal.iter().skip(skip).cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().operations.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // -- listeners ----------------------------------------------------------

    /// Registers a listener for every subsequent transition.
    pub fn add_listener(&self, listener: Arc<dyn OperationListener>) -> ListenerId {
        self.state.lock().listeners.add(listener)
    }

    /// Unregisters a listener. Returns `false` if it was not registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.state.lock().listeners.remove(id)
    }

    // -- internals ----------------------------------------------------------

    /// Stamps the end time, records the note, releases the active slot and notifies.
    fn finish(
        &self,
        state: &mut TrackerState,
        id: &str,
        status: OperationStatus,
        note: String,
        kind: EventKind,
    ) -> Result<Operation, TrackerError> {
        let op = state.get_mut(id)?;
        op.status = status;
        op.end_time_ms = Some(now_millis());
        op.elapsed = op.started_at.elapsed();
        op.estimated_remaining =
            (status == OperationStatus::Completed).then_some(Duration::ZERO);
        op.push_log(
            LogEntry {
                timestamp_ms: now_millis(),
                message: note.clone(),
            },
            self.max_log_entries,
        );
        let finished = op.clone();

        state.journal(id, note, self.journal_capacity);
        state.release_active(id);
        tracing::debug!(operation_id = id, %status, "operation finished");
        state.emit(kind, id);
        Ok(finished)
    }

    fn cancel_one(
        &self,
        state: &mut TrackerState,
        id: &str,
        status: OperationStatus,
    ) -> Result<Operation, TrackerError> {
        let op = state.get_mut(id)?;
        op.message = "Cancelled".to_string();
        let note = format!("Cancelled operation: {}", op.name);
        self.finish(state, id, status, note, EventKind::Cancelled)
    }

    fn toggle(
        &self,
        id: &str,
        transition: Transition,
        verb: &str,
    ) -> Result<Operation, TrackerError> {
        let mut state = self.state.lock();
        let status = state.check(id, transition)?;
        let op = state.get_mut(id)?;
        op.status = status;
        op.refresh_timing();
        let note = format!("{verb} operation: {}", op.name);
        op.push_log(
            LogEntry {
                timestamp_ms: now_millis(),
                message: note.clone(),
            },
            self.max_log_entries,
        );
        let toggled = op.clone();
        state.journal(id, note, self.journal_capacity);
        tracing::debug!(operation_id = id, %status, "operation {}", verb.to_lowercase());
        state.emit(EventKind::entering(status), id);
        Ok(toggled)
    }
}

impl Default for OperationTracker {
    fn default() -> Self {
        Self::new(&DispatchConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    use proptest::prelude::*;

    use super::*;

    fn tracker() -> OperationTracker {
        OperationTracker::default()
    }

    fn recorder(tracker: &OperationTracker) -> Arc<Mutex<Vec<(EventKind, String)>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        tracker.add_listener(Arc::new(move |event: &ProgressEvent| -> anyhow::Result<()> {
            sink.lock().push((event.kind, event.operation.id.clone()));
            Ok(())
        }));
        events
    }

    #[test]
    fn start_then_get_is_in_progress_at_zero() {
        let t = tracker();
        t.start("op-1", "Import", 10, None).unwrap();
        let op = t.get("op-1").unwrap();
        assert_eq!(op.status, OperationStatus::InProgress);
        assert!(op.progress.abs() < f64::EPSILON);
        assert_eq!(op.logs.len(), 1);
    }

    #[test]
    fn duplicate_id_is_rejected() {
        let t = tracker();
        t.start("op-1", "Import", 10, None).unwrap();
        assert_eq!(
            t.start("op-1", "Again", 10, None).unwrap_err(),
            TrackerError::DuplicateId {
                id: "op-1".to_string()
            }
        );
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn unknown_id_is_not_found() {
        let t = tracker();
        let err = t.update("ghost", ProgressUpdate::step(1)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(t.complete("ghost", None).is_err());
        assert!(t.fail("ghost", "x").is_err());
        assert!(t.cancel("ghost").is_err());
        assert!(t.get("ghost").is_none());
    }

    #[test]
    fn step_update_derives_progress_and_timing() {
        let t = tracker();
        t.start("op-1", "Import", 4, None).unwrap();
        let op = t
            .update("op-1", ProgressUpdate::step(1).with_message("quarter"))
            .unwrap();
        assert_eq!(op.current_step, 1);
        assert!((op.progress - 0.25).abs() < f64::EPSILON);
        assert_eq!(op.message, "quarter");
        assert!(op.estimated_remaining.is_some());

        let op = t.update("op-1", ProgressUpdate::step(99)).unwrap();
        assert_eq!(op.current_step, 4);
        assert!(op.progress < 1.0);
        assert_eq!(op.status, OperationStatus::InProgress);
    }

    #[test]
    fn fraction_update_derives_step() {
        let t = tracker();
        t.start("op-1", "Import", 10, None).unwrap();
        let op = t.update("op-1", ProgressUpdate::fraction(0.35)).unwrap();
        assert_eq!(op.current_step, 3);
        assert_eq!(
            t.update("op-1", ProgressUpdate::fraction(f64::NAN))
                .unwrap_err()
                .kind(),
            ErrorKind::InvalidTransition
        );
    }

    #[test]
    fn message_only_update_keeps_progress() {
        let t = tracker();
        t.start("op-1", "Import", 10, None).unwrap();
        t.update("op-1", ProgressUpdate::step(5)).unwrap();
        let op = t.update("op-1", ProgressUpdate::message("halfway")).unwrap();
        assert_eq!(op.current_step, 5);
        assert_eq!(op.message, "halfway");
    }

    #[test]
    fn complete_sets_full_progress_and_blocks_updates() {
        let t = tracker();
        t.start("op-1", "Import", 10, None).unwrap();
        let op = t.complete("op-1", None).unwrap();
        assert_eq!(op.status, OperationStatus::Completed);
        assert!((op.progress - 1.0).abs() < f64::EPSILON);
        assert_eq!(op.current_step, 10);
        assert_eq!(op.message, "Completed: Import");
        assert!(op.end_time_ms.is_some());

        let err = t.update("op-1", ProgressUpdate::step(1)).unwrap_err();
        assert!(matches!(
            err,
            TrackerError::InvalidTransition {
                from: OperationStatus::Completed,
                transition: Transition::Update,
                ..
            }
        ));
        assert!(t.fail("op-1", "late").is_err());
        assert!(t.cancel("op-1").is_err());
    }

    #[test]
    fn fail_keeps_error_message() {
        let t = tracker();
        t.start("op-1", "Render", 10, None).unwrap();
        let op = t.fail("op-1", "out of VRAM").unwrap();
        assert_eq!(op.status, OperationStatus::Failed);
        assert_eq!(op.message, "out of VRAM");
        assert!(op.progress < 1.0);
    }

    #[test]
    fn cancel_propagates_down_but_keeps_terminal_children() {
        let t = tracker();
        t.start("parent", "Sequence", 3, None).unwrap();
        t.start("child-1", "Environment", 1, Some("parent")).unwrap();
        t.start("child-2", "Characters", 1, Some("parent")).unwrap();
        t.start("child-3", "Camera", 1, Some("parent")).unwrap();
        t.complete("child-3", None).unwrap();

        t.cancel("parent").unwrap();

        for id in ["parent", "child-1", "child-2"] {
            assert_eq!(t.status(id), Some(OperationStatus::Cancelled), "{id}");
        }
        assert_eq!(t.status("child-3"), Some(OperationStatus::Completed));
    }

    #[test]
    fn cancel_reaches_grandchildren_and_paused_descendants() {
        let t = tracker();
        t.start("root", "Root", 1, None).unwrap();
        t.start("mid", "Mid", 1, Some("root")).unwrap();
        t.start("leaf", "Leaf", 1, Some("mid")).unwrap();
        t.pause("mid").unwrap();

        let events = recorder(&t);
        t.cancel("root").unwrap();

        assert_eq!(t.status("mid"), Some(OperationStatus::Cancelled));
        assert_eq!(t.status("leaf"), Some(OperationStatus::Cancelled));
        let order: Vec<_> = events.lock().iter().map(|(_, id)| id.clone()).collect();
        assert_eq!(order, vec!["root", "mid", "leaf"]);
    }

    #[test]
    fn cancel_never_moves_upward() {
        let t = tracker();
        t.start("root", "Root", 1, None).unwrap();
        t.start("child", "Child", 1, Some("root")).unwrap();
        t.cancel("child").unwrap();
        assert_eq!(t.status("root"), Some(OperationStatus::InProgress));
    }

    #[test]
    fn cancel_requires_in_progress() {
        let t = tracker();
        t.start("op-1", "Work", 1, None).unwrap();
        t.pause("op-1").unwrap();
        assert!(matches!(
            t.cancel("op-1").unwrap_err(),
            TrackerError::InvalidTransition {
                from: OperationStatus::Paused,
                ..
            }
        ));
    }

    #[test]
    fn pause_and_resume() {
        let t = tracker();
        t.start("op-1", "Work", 10, None).unwrap();
        assert_eq!(t.pause("op-1").unwrap().status, OperationStatus::Paused);
        assert!(t.update("op-1", ProgressUpdate::step(1)).is_err());
        assert!(t.pause("op-1").is_err());
        assert_eq!(t.resume("op-1").unwrap().status, OperationStatus::InProgress);
        assert!(t.resume("op-1").is_err());
        assert!(t.update("op-1", ProgressUpdate::step(1)).is_ok());
    }

    #[test]
    fn children_are_linked_in_start_order() {
        let t = tracker();
        t.start("root", "Root", 1, None).unwrap();
        t.start("a", "A", 1, Some("root")).unwrap();
        t.start("b", "B", 1, Some("root")).unwrap();
        t.start("orphan", "Orphan", 1, Some("missing")).unwrap();

        assert_eq!(t.get("root").unwrap().sub_operations, vec!["a", "b"]);
        assert_eq!(
            t.get("orphan").unwrap().parent_id.as_deref(),
            Some("missing")
        );
        let ids: Vec<_> = t.list_all().into_iter().map(|op| op.id).collect();
        assert_eq!(ids, vec!["root", "a", "b", "orphan"]);
    }

    #[test]
    fn finished_parent_rejects_new_children() {
        let t = tracker();
        t.start("root", "Root", 1, None).unwrap();
        t.cancel("root").unwrap();
        assert!(matches!(
            t.start("late", "Late", 1, Some("root")).unwrap_err(),
            TrackerError::ParentFinished { .. }
        ));
    }

    #[test]
    fn active_slot_bubbles_up_to_running_parent() {
        let t = tracker();
        t.start("a", "A", 1, None).unwrap();
        t.start("b", "B", 1, None).unwrap();
        assert_eq!(t.get_active().unwrap().id, "a");

        t.complete("a", None).unwrap();
        assert!(t.get_active().is_none());

        // Slot is empty, so the next start takes it even as a child.
        t.start("b-child", "B child", 1, Some("b")).unwrap();
        assert_eq!(t.active_snapshot().unwrap().id, "b-child");

        t.fail("b-child", "boom").unwrap();
        assert_eq!(t.get_active().unwrap().id, "b");

        t.cancel("b").unwrap();
        assert!(t.get_active().is_none());
    }

    #[test]
    fn listener_receives_one_event_per_transition_in_order() {
        let t = tracker();
        let events = recorder(&t);

        t.start("op-1", "Work", 10, None).unwrap();
        t.update("op-1", ProgressUpdate::step(3)).unwrap();
        t.update("op-1", ProgressUpdate::step(6)).unwrap();
        t.complete("op-1", None).unwrap();
        // Rejected transitions do not notify.
        let _ = t.update("op-1", ProgressUpdate::step(7));

        let kinds: Vec<_> = events.lock().iter().map(|(k, _)| *k).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::Started,
                EventKind::Updated,
                EventKind::Updated,
                EventKind::Completed
            ]
        );
    }

    #[test]
    fn bad_listener_does_not_abort_transition() {
        let t = tracker();
        t.add_listener(Arc::new(|_: &ProgressEvent| -> anyhow::Result<()> {
            panic!("listener exploded")
        }));
        let good = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&good);
        t.add_listener(Arc::new(move |_: &ProgressEvent| -> anyhow::Result<()> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

        t.start("op-1", "Work", 10, None).unwrap();
        t.complete("op-1", None).unwrap();

        assert_eq!(t.status("op-1"), Some(OperationStatus::Completed));
        assert_eq!(good.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn removed_listener_is_silent() {
        let t = tracker();
        let events = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&events);
        let id = t.add_listener(Arc::new(move |_: &ProgressEvent| -> anyhow::Result<()> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));
        t.start("op-1", "Work", 10, None).unwrap();
        assert!(t.remove_listener(id));
        t.complete("op-1", None).unwrap();
        assert_eq!(events.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn logs_are_bounded() {
        let config = DispatchConfig {
            max_log_entries: 3,
            journal_capacity: 4,
            ..DispatchConfig::default()
        };
        let t = OperationTracker::new(&config);
        t.start("op-1", "Work", 100, None).unwrap();
        for i in 0..10 {
            t.update("op-1", ProgressUpdate::step(i).with_message(format!("step {i}")))
                .unwrap();
        }
        let op = t.get("op-1").unwrap();
        let messages: Vec<_> = op.logs.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["step 7", "step 8", "step 9"]);

        let journal = t.recent_journal(2);
        assert_eq!(journal.len(), 2);
        assert_eq!(journal[1].message, "step 9");
        assert_eq!(t.recent_journal(100).len(), 4);
    }

    #[test]
    fn concurrent_updates_stay_consistent() {
        const THREADS: u32 = 8;
        const UPDATES: u32 = 500;

        let t = Arc::new(tracker());
        t.start("shared", "Shared", 100, None).unwrap();
        t.start("bystander", "Bystander", 1, None).unwrap();
        t.start("bystander-child", "Child", 1, Some("bystander"))
            .unwrap();

        thread::scope(|scope| {
            for worker in 0..THREADS {
                let t = Arc::clone(&t);
                scope.spawn(move || {
                    for i in 0..UPDATES {
                        let step = (worker * 37 + i * 13) % 250;
                        t.update("shared", ProgressUpdate::step(step)).unwrap();
                        let snapshot = t.active_snapshot().unwrap();
                        assert!(snapshot.current_step <= snapshot.total_steps);
                    }
                });
            }
        });

        let shared = t.get("shared").unwrap();
        assert!(shared.current_step <= shared.total_steps);
        assert!((0.0..1.0).contains(&shared.progress));
        assert!(shared.sub_operations.is_empty());
        assert_eq!(
            t.get("bystander").unwrap().sub_operations,
            vec!["bystander-child"]
        );
    }

    proptest! {
        #[test]
        fn monotonic_steps_give_monotonic_exact_progress(
            total in 1u32..500,
            mut steps in proptest::collection::vec(0u32..500, 1..40),
        ) {
            steps.iter_mut().for_each(|s| *s %= total);
            steps.sort_unstable();

            let t = tracker();
            t.start("p", "P", total, None).unwrap();
            let mut last = 0.0_f64;
            for step in steps {
                let op = t.update("p", ProgressUpdate::step(step)).unwrap();
                prop_assert_eq!(op.progress, f64::from(step) / f64::from(total));
                prop_assert!(op.progress >= last);
                last = op.progress;
            }
        }
    }
}
