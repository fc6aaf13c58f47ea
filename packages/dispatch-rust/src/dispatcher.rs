//! Command dispatch: resolve a dotted command, track it, measure it, report it.
//!
//! [`DispatchCore`] owns the registry, the operation tracker, the performance
//! monitor and the error registry. It is built once at startup and shared by
//! reference; there is no global instance.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use switchyard_core::{
    CommandInfo, CommandResult, ErrorInfo, ErrorKind, HandlerError, OperationStatus,
    PerformanceSample, Params, Value,
};
use tracing::field::Empty;
use uuid::Uuid;

use crate::config::DispatchConfig;
use crate::monitor::PerformanceMonitor;
use crate::registry::{CommandRegistry, RegistryError, ResolveError, SegmentRole};
use crate::remediation::ErrorRegistry;
use crate::tracker::{
    event_queue, EventReceiver, ListenerId, OperationTracker, ProgressUpdate, TrackerError,
};

// Coarse progress checkpoints, out of `default_total_steps`.
const STEP_PARSE: u32 = 10;
const STEP_LOCATE_MODULE: u32 = 20;
const STEP_LOCATE_FUNCTION: u32 = 30;
const STEP_EXECUTE: u32 = 50;
const STEP_PROCESS_RESULT: u32 = 90;

// ---------------------------------------------------------------------------
// DispatchError
// ---------------------------------------------------------------------------

/// Why a command did not succeed. Converted into a [`CommandResult`] before
/// leaving the dispatcher.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DispatchError {
    #[error("Invalid command format: {command}")]
    InvalidCommand { command: String },
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Tracker(#[from] TrackerError),
    #[error(transparent)]
    Handler(HandlerError),
    #[error("Operation cancelled: {command}")]
    Cancelled { command: String },
}

impl DispatchError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidCommand { .. } => ErrorKind::InvalidCommand,
            Self::Resolve(err) => match err.role {
                SegmentRole::Module | SegmentRole::Submodule => ErrorKind::ModuleNotFound,
                SegmentRole::Function => ErrorKind::FunctionNotFound,
            },
            Self::Tracker(err) => err.kind(),
            Self::Handler(_) => ErrorKind::HandlerError,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }
}

// ---------------------------------------------------------------------------
// HandlerContext
// ---------------------------------------------------------------------------

/// Per-call view handed to a command handler.
pub struct HandlerContext<'a> {
    core: &'a DispatchCore,
    operation_id: &'a str,
    command: &'a str,
}

impl<'a> HandlerContext<'a> {
    /// Id of the operation tracking this call.
    #[must_use]
    pub fn operation_id(&self) -> &'a str {
        self.operation_id
    }

    #[must_use]
    pub fn command(&self) -> &'a str {
        self.command
    }

    #[must_use]
    pub fn tracker(&self) -> &'a OperationTracker {
        &self.core.tracker
    }

    /// `true` once this call's operation has been cancelled. Long-running
    /// handlers should poll this and return early.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.core.tracker.status(self.operation_id) == Some(OperationStatus::Cancelled)
    }

    /// Reports handler-level progress on this call's operation.
    ///
    /// # Errors
    ///
    /// Fails once the operation is no longer `InProgress`.
    pub fn report(&self, step: u32, message: impl Into<String>) -> Result<(), TrackerError> {
        self.core
            .tracker
            .update(self.operation_id, ProgressUpdate::step(step).with_message(message))
            .map(|_| ())
    }

    /// Executes a nested command whose operation is a child of this one.
    #[must_use]
    pub fn execute_child(&self, command: &str, params: &Params) -> CommandResult {
        self.core
            .execute_with_parent(command, params, Some(self.operation_id))
    }
}

// ---------------------------------------------------------------------------
// DispatchCore
// ---------------------------------------------------------------------------

struct Attempt {
    outcome: Result<Value, DispatchError>,
    sample: Option<PerformanceSample>,
}

/// Registry, tracker, monitor and error registry behind a single `execute` entry point.
pub struct DispatchCore {
    config: DispatchConfig,
    registry: CommandRegistry,
    tracker: Arc<OperationTracker>,
    monitor: PerformanceMonitor,
    errors: ErrorRegistry,
}

impl DispatchCore {
    #[must_use]
    pub fn new(config: DispatchConfig) -> Self {
        let monitor = PerformanceMonitor::new(config.performance_history);
        Self::with_monitor(config, monitor)
    }

    /// Builds a core around a preconfigured monitor, e.g. one with a custom memory probe.
    #[must_use]
    pub fn with_monitor(config: DispatchConfig, monitor: PerformanceMonitor) -> Self {
        Self {
            registry: CommandRegistry::with_delimiter(config.command_delimiter),
            tracker: Arc::new(OperationTracker::new(&config)),
            errors: ErrorRegistry::new(config.error_log_capacity),
            monitor,
            config,
        }
    }

    /// Registers a command handler under `path`.
    ///
    /// # Errors
    ///
    /// See [`CommandRegistry::register`].
    pub fn register<S, F>(
        &mut self,
        path: &[S],
        description: impl Into<String>,
        handler: F,
    ) -> Result<(), RegistryError>
    where
        S: AsRef<str>,
        F: Fn(&HandlerContext<'_>, &Params) -> Result<Value, HandlerError> + Send + Sync + 'static,
    {
        self.registry.register(path, description, handler)
    }

    /// Executes `command` as a root operation.
    #[must_use]
    pub fn execute(&self, command: &str, params: &Params) -> CommandResult {
        self.execute_with_parent(command, params, None)
    }

    /// Executes `command`, tracking it as a child of `parent_id` when given.
    ///
    /// Never panics on handler failure: every outcome is a [`CommandResult`].
    #[must_use]
    pub fn execute_with_parent(
        &self,
        command: &str,
        params: &Params,
        parent_id: Option<&str>,
    ) -> CommandResult {
        let span = tracing::info_span!(
            "command",
            command,
            operation_id = Empty,
            duration_ms = Empty,
            outcome = Empty,
        );
        let _guard = span.enter();
        let started = Instant::now();

        let result = self.run(command, params, parent_id);

        #[allow(clippy::cast_possible_truncation)]
        let duration_ms = started.elapsed().as_millis() as u64;
        let outcome = if result.is_success() { "success" } else { "error" };
        if let Some(operation_id) = &result.operation_id {
            span.record("operation_id", operation_id.as_str());
        }
        span.record("duration_ms", duration_ms);
        span.record("outcome", outcome);
        tracing::info!(command, duration_ms, outcome, "command complete");

        result
    }

    /// Flattened map of every registered command to its description.
    #[must_use]
    pub fn get_available_commands(&self) -> BTreeMap<String, CommandInfo> {
        self.registry.commands()
    }

    /// Registers a queued listener holding up to `event_queue_capacity` events.
    ///
    /// Pass the returned id to [`OperationTracker::remove_listener`] to unsubscribe;
    /// the receiver then drains what is buffered and yields `None`.
    #[must_use]
    pub fn subscribe(&self) -> (ListenerId, EventReceiver) {
        let (listener, receiver) = event_queue(self.config.event_queue_capacity);
        let id = self.tracker.add_listener(Arc::new(listener));
        (id, receiver)
    }

    #[must_use]
    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    #[must_use]
    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    /// Shared handle to the tracker, for displays and listeners.
    #[must_use]
    pub fn tracker(&self) -> &Arc<OperationTracker> {
        &self.tracker
    }

    #[must_use]
    pub fn monitor(&self) -> &PerformanceMonitor {
        &self.monitor
    }

    #[must_use]
    pub fn errors(&self) -> &ErrorRegistry {
        &self.errors
    }

    // -- pipeline -----------------------------------------------------------

    fn run(&self, command: &str, params: &Params, parent_id: Option<&str>) -> CommandResult {
        let segments: Vec<&str> = command.split(self.config.command_delimiter).collect();
        if segments.len() < 2 {
            let err = DispatchError::InvalidCommand {
                command: command.to_string(),
            };
            tracing::debug!(command, "rejected malformed command");
            return CommandResult::error(err.kind(), err.to_string());
        }

        let operation_id = Uuid::new_v4().to_string();
        let name = format!("Executing command: {command}");
        if let Err(err) = self.tracker.start(
            &operation_id,
            &name,
            self.config.default_total_steps,
            parent_id,
        ) {
            return CommandResult::error(err.kind(), err.to_string());
        }

        let attempt = self.attempt(&operation_id, command, &segments, params);
        let result = match attempt.outcome {
            Ok(value) => CommandResult::success(&operation_id, value),
            Err(err) => self.failed(&operation_id, command, params, err),
        };
        match attempt.sample {
            Some(sample) => result.with_metrics(sample),
            None => result,
        }
    }

    fn attempt(
        &self,
        operation_id: &str,
        command: &str,
        segments: &[&str],
        params: &Params,
    ) -> Attempt {
        let mut sample = None;
        let outcome = self.drive(operation_id, command, segments, params, &mut sample);
        Attempt { outcome, sample }
    }

    fn drive(
        &self,
        operation_id: &str,
        command: &str,
        segments: &[&str],
        params: &Params,
        sample: &mut Option<PerformanceSample>,
    ) -> Result<Value, DispatchError> {
        let module = segments.first().copied().unwrap_or_default();
        let function = segments.last().copied().unwrap_or_default();

        self.advance(operation_id, command, STEP_PARSE, format!("Parsing command: {command}"))?;
        self.advance(operation_id, command, STEP_LOCATE_MODULE, format!("Locating module: {module}"))?;
        let entry = self.registry.resolve(segments)?;
        self.advance(operation_id, command, STEP_LOCATE_FUNCTION, format!("Locating function: {function}"))?;
        self.advance(operation_id, command, STEP_EXECUTE, format!("Executing function: {function}"))?;

        let ctx = HandlerContext {
            core: self,
            operation_id,
            command,
        };
        let measured = self
            .monitor
            .measure(command, || (entry.handler)(&ctx, params));
        *sample = Some(measured.sample);

        if self.is_cancelled(operation_id) {
            return Err(DispatchError::Cancelled {
                command: command.to_string(),
            });
        }
        // A handler may leave its own operation paused; the call is over either way.
        self.resume_if_paused(operation_id);
        let value = measured.outcome.map_err(DispatchError::Handler)?;

        let step = self
            .tracker
            .snapshot(operation_id)
            .map_or(STEP_PROCESS_RESULT, |op| op.current_step.max(STEP_PROCESS_RESULT));
        self.advance(operation_id, command, step, "Processing result".to_string())?;
        let message = format!("Command executed successfully: {command}");
        self.tracker
            .complete(operation_id, Some(&message))
            .map_err(|err| self.classify(operation_id, command, err))?;
        Ok(value)
    }

    fn advance(
        &self,
        operation_id: &str,
        command: &str,
        step: u32,
        message: String,
    ) -> Result<(), DispatchError> {
        self.tracker
            .update(operation_id, ProgressUpdate::step(step).with_message(message))
            .map(|_| ())
            .map_err(|err| self.classify(operation_id, command, err))
    }

    /// A tracker rejection caused by cancellation is reported as `Cancelled`.
    fn classify(&self, operation_id: &str, command: &str, err: TrackerError) -> DispatchError {
        if self.is_cancelled(operation_id) {
            DispatchError::Cancelled {
                command: command.to_string(),
            }
        } else {
            DispatchError::Tracker(err)
        }
    }

    fn is_cancelled(&self, operation_id: &str) -> bool {
        self.tracker.status(operation_id) == Some(OperationStatus::Cancelled)
    }

    fn failed(
        &self,
        operation_id: &str,
        command: &str,
        params: &Params,
        err: DispatchError,
    ) -> CommandResult {
        let kind = err.kind();
        match err {
            DispatchError::Resolve(resolve) => {
                let message = resolve.to_string();
                self.fail_operation(operation_id, &message);
                CommandResult::error(kind, message)
                    .with_operation(operation_id)
                    .with_missing_segment(resolve.segment)
            }
            DispatchError::Handler(handler) => {
                tracing::warn!(
                    command,
                    operation_id,
                    error_kind = %handler.kind,
                    error = %handler.message,
                    "command handler failed"
                );
                let record = self.errors.log_error(
                    &handler.kind,
                    &handler.message,
                    command,
                    Value::Object(params.clone()),
                );
                let remediation = self.errors.dispatch(&record);
                self.fail_operation(operation_id, &handler.message);
                CommandResult::error(kind, handler.message)
                    .with_operation(operation_id)
                    .with_error_info(ErrorInfo {
                        record,
                        remediation,
                    })
            }
            DispatchError::Cancelled { .. } => {
                tracing::debug!(command, operation_id, "command cancelled");
                CommandResult::error(kind, err.to_string()).with_operation(operation_id)
            }
            DispatchError::Tracker(_) | DispatchError::InvalidCommand { .. } => {
                let message = err.to_string();
                self.fail_operation(operation_id, &message);
                CommandResult::error(kind, message).with_operation(operation_id)
            }
        }
    }

    fn resume_if_paused(&self, operation_id: &str) {
        if self.tracker.status(operation_id) != Some(OperationStatus::Paused) {
            return;
        }
        if let Err(err) = self.tracker.resume(operation_id) {
            tracing::debug!(operation_id, error = %err, "paused operation changed before resume");
        }
    }

    fn fail_operation(&self, operation_id: &str, message: &str) {
        self.resume_if_paused(operation_id);
        if let Err(err) = self.tracker.fail(operation_id, message) {
            tracing::debug!(operation_id, error = %err, "operation already finalized");
        }
    }
}

impl Default for DispatchCore {
    fn default() -> Self {
        Self::new(DispatchConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;
    use serde_json::json;
    use switchyard_core::{
        CommandStatus, ErrorRecord, EventKind, ProgressEvent, Remediation, RemediationOutcome,
        PANIC_KIND,
    };

    use super::*;

    fn params(value: &Value) -> Params {
        value.as_object().cloned().unwrap_or_default()
    }

    fn core() -> DispatchCore {
        let mut core = DispatchCore::default();
        core.register(&["math", "add"], "Add two numbers", |_, p| {
            let a = p.get("a").and_then(Value::as_i64).unwrap_or(0);
            let b = p.get("b").and_then(Value::as_i64).unwrap_or(0);
            Ok(json!({"status": "success", "sum": a + b}))
        })
        .unwrap();
        core.register(&["render", "cycles", "final"], "Final render", |_, _| {
            Err(HandlerError::new("RenderError", "no camera in scene"))
        })
        .unwrap();
        core.register(&["render", "cycles", "crash"], "Crashes", |_, _| {
            panic!("null scene")
        })
        .unwrap();
        core.register(&["jobs", "self_cancel"], "Cancels itself", |ctx, _| {
            ctx.tracker()
                .cancel(ctx.operation_id())
                .map_err(|e| HandlerError::new("TrackerError", e.to_string()))?;
            assert!(ctx.is_cancelled());
            Ok(json!({"status": "success"}))
        })
        .unwrap();
        core.register(&["jobs", "batch"], "Runs nested commands", |ctx, p| {
            ctx.report(60, "running children")
                .map_err(|e| HandlerError::new("TrackerError", e.to_string()))?;
            let first = ctx.execute_child("math.add", p);
            let second = ctx.execute_child("math.add", p);
            Ok(json!({
                "children": [first.operation_id, second.operation_id],
            }))
        })
        .unwrap();
        core
    }

    fn no_in_progress(core: &DispatchCore) -> bool {
        core.tracker()
            .list_all()
            .iter()
            .all(|op| op.status != OperationStatus::InProgress)
    }

    #[test]
    fn success_attaches_metrics_and_completes() {
        let core = core();
        let result = core.execute("math.add", &params(&json!({"a": 2, "b": 3})));

        assert_eq!(result.status, CommandStatus::Success);
        assert_eq!(result.result.as_ref().unwrap()["sum"], 5);
        let metrics = result.performance_metrics.as_ref().unwrap();
        assert_eq!(metrics.operation_name, "math.add");
        assert!(metrics.success);

        let op = core
            .tracker()
            .get(result.operation_id.as_deref().unwrap())
            .unwrap();
        assert_eq!(op.status, OperationStatus::Completed);
        assert!((op.progress - 1.0).abs() < f64::EPSILON);
        assert_eq!(op.message, "Command executed successfully: math.add");
        assert_eq!(op.name, "Executing command: math.add");
        assert!(core.monitor().latest("math.add").is_some());
    }

    #[test]
    fn result_serializes_to_envelope() {
        let core = core();
        let json = serde_json::to_value(core.execute("math.add", &Params::new())).unwrap();
        assert_eq!(json["status"], "success");
        assert!(json["performance_metrics"]["execution_time"].is_number());
        assert!(json.get("message").is_none());
    }

    #[test]
    fn single_segment_is_invalid_and_starts_nothing() {
        let core = core();
        let result = core.execute("math", &Params::new());
        assert_eq!(result.error_kind, Some(ErrorKind::InvalidCommand));
        assert_eq!(result.message.as_deref(), Some("Invalid command format: math"));
        assert!(result.operation_id.is_none());
        assert!(core.tracker().is_empty());
    }

    #[test]
    fn unknown_module_fails_operation() {
        let core = core();
        let result = core.execute("nomodule.fn", &Params::new());
        assert_eq!(result.status, CommandStatus::Error);
        assert_eq!(result.error_kind, Some(ErrorKind::ModuleNotFound));
        assert_eq!(result.missing_segment.as_deref(), Some("nomodule"));
        assert_eq!(result.message.as_deref(), Some("Module not found: nomodule"));
        assert!(no_in_progress(&core));
        let op = core
            .tracker()
            .get(result.operation_id.as_deref().unwrap())
            .unwrap();
        assert_eq!(op.status, OperationStatus::Failed);
    }

    #[test]
    fn unknown_submodule_and_function() {
        let core = core();
        let sub = core.execute("render.eevee.final", &Params::new());
        assert_eq!(sub.error_kind, Some(ErrorKind::ModuleNotFound));
        assert_eq!(sub.message.as_deref(), Some("Submodule not found: eevee"));

        let func = core.execute("math.divide", &Params::new());
        assert_eq!(func.error_kind, Some(ErrorKind::FunctionNotFound));
        assert_eq!(func.missing_segment.as_deref(), Some("divide"));
        assert!(no_in_progress(&core));
    }

    #[test]
    fn handler_error_is_logged_and_remediated() {
        let core = core();
        core.errors()
            .register("RenderError", |r: &ErrorRecord| -> anyhow::Result<Remediation> {
                Ok(Remediation::new(
                    "reduce_quality",
                    json!({"command": r.operation_name}),
                ))
            });

        let result = core.execute("render.cycles.final", &params(&json!({"samples": 128})));
        assert_eq!(result.status, CommandStatus::Error);
        assert_eq!(result.error_kind, Some(ErrorKind::HandlerError));
        assert_eq!(result.message.as_deref(), Some("no camera in scene"));
        assert!(!result.performance_metrics.as_ref().unwrap().success);

        let info = result.error_info.as_ref().unwrap();
        assert_eq!(info.record.error_kind, "RenderError");
        assert_eq!(info.record.context, json!({"samples": 128}));
        assert_eq!(
            info.remediation,
            Some(RemediationOutcome::Applied(Remediation::new(
                "reduce_quality",
                json!({"command": "render.cycles.final"})
            )))
        );

        let op = core
            .tracker()
            .get(result.operation_id.as_deref().unwrap())
            .unwrap();
        assert_eq!(op.status, OperationStatus::Failed);
        assert_eq!(op.message, "no camera in scene");
        assert_eq!(core.errors().error_log().len(), 1);
    }

    #[test]
    fn handler_error_without_remediation() {
        let core = core();
        let result = core.execute("render.cycles.final", &Params::new());
        assert!(result.error_info.unwrap().remediation.is_none());
    }

    #[test]
    fn handler_panic_becomes_error_result() {
        let core = core();
        let result = core.execute("render.cycles.crash", &Params::new());
        assert_eq!(result.error_kind, Some(ErrorKind::HandlerError));
        assert_eq!(result.error_info.unwrap().record.error_kind, PANIC_KIND);
        assert!(no_in_progress(&core));
    }

    #[test]
    fn cancelled_during_handler_reports_cancelled() {
        let core = core();
        let result = core.execute("jobs.self_cancel", &Params::new());
        assert_eq!(result.error_kind, Some(ErrorKind::Cancelled));
        let op = core
            .tracker()
            .get(result.operation_id.as_deref().unwrap())
            .unwrap();
        assert_eq!(op.status, OperationStatus::Cancelled);
        assert!(core.errors().error_log().is_empty());
    }

    #[test]
    fn nested_commands_become_children() {
        let core = core();
        let result = core.execute("jobs.batch", &params(&json!({"a": 1, "b": 1})));
        assert!(result.is_success());

        let parent_id = result.operation_id.unwrap();
        let parent = core.tracker().get(&parent_id).unwrap();
        assert_eq!(parent.sub_operations.len(), 2);
        assert_eq!(parent.status, OperationStatus::Completed);
        for child_id in &parent.sub_operations {
            let child = core.tracker().get(child_id).unwrap();
            assert_eq!(child.parent_id.as_deref(), Some(parent_id.as_str()));
            assert_eq!(child.status, OperationStatus::Completed);
        }
    }

    #[test]
    fn child_of_finished_parent_is_rejected() {
        let core = core();
        let done = core.execute("math.add", &Params::new());
        let result =
            core.execute_with_parent("math.add", &Params::new(), done.operation_id.as_deref());
        assert_eq!(result.error_kind, Some(ErrorKind::InvalidTransition));
    }

    #[test]
    fn progress_checkpoints_are_reported_in_order() {
        let core = core();
        let steps = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&steps);
        core.tracker()
            .add_listener(Arc::new(move |event: &ProgressEvent| -> anyhow::Result<()> {
                sink.lock().push((event.kind, event.operation.current_step));
                Ok(())
            }));

        let _ = core.execute("math.add", &Params::new());

        let recorded = steps.lock().clone();
        assert_eq!(
            recorded,
            vec![
                (EventKind::Started, 0),
                (EventKind::Updated, 10),
                (EventKind::Updated, 20),
                (EventKind::Updated, 30),
                (EventKind::Updated, 50),
                (EventKind::Updated, 90),
                (EventKind::Completed, 100),
            ]
        );
    }

    #[test]
    fn available_commands_are_listed() {
        let core = core();
        let commands = core.get_available_commands();
        assert_eq!(commands.len(), 5);
        assert_eq!(commands["math.add"].description, "Add two numbers");
        assert!(commands.contains_key("render.cycles.final"));
        // Discovery has no side effects.
        assert!(core.tracker().is_empty());
    }

    #[test]
    fn handler_that_pauses_itself_still_finalizes() {
        let mut core = core();
        core.register(&["jobs", "pause_self"], "Pauses itself", |ctx, _| {
            ctx.tracker()
                .pause(ctx.operation_id())
                .map_err(|e| HandlerError::new("TrackerError", e.to_string()))?;
            Ok(json!({"status": "success"}))
        })
        .unwrap();
        core.register(&["jobs", "pause_then_err"], "Pauses then fails", |ctx, _| {
            ctx.tracker()
                .pause(ctx.operation_id())
                .map_err(|e| HandlerError::new("TrackerError", e.to_string()))?;
            Err(HandlerError::new("JobError", "gave up"))
        })
        .unwrap();

        let ok = core.execute("jobs.pause_self", &Params::new());
        assert!(ok.is_success());
        let op = core.tracker().get(ok.operation_id.as_deref().unwrap()).unwrap();
        assert_eq!(op.status, OperationStatus::Completed);

        let err = core.execute("jobs.pause_then_err", &Params::new());
        assert_eq!(err.error_kind, Some(ErrorKind::HandlerError));
        let op = core.tracker().get(err.operation_id.as_deref().unwrap()).unwrap();
        assert_eq!(op.status, OperationStatus::Failed);
        assert_eq!(op.message, "gave up");

        assert!(core
            .tracker()
            .list_all()
            .iter()
            .all(|op| op.status.is_terminal()));
        assert!(core.tracker().get_active().is_none());
    }

    #[test]
    fn handler_progress_past_final_checkpoint_is_kept() {
        let mut core = core();
        core.register(&["jobs", "near_done"], "Reports 95", |ctx, _| {
            ctx.report(95, "almost there")
                .map_err(|e| HandlerError::new("TrackerError", e.to_string()))?;
            Ok(json!({"status": "success"}))
        })
        .unwrap();
        let steps = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&steps);
        core.tracker()
            .add_listener(Arc::new(move |event: &ProgressEvent| -> anyhow::Result<()> {
                if event.kind == EventKind::Updated {
                    sink.lock().push(event.operation.current_step);
                }
                Ok(())
            }));

        assert!(core.execute("jobs.near_done", &Params::new()).is_success());
        assert_eq!(*steps.lock(), vec![10, 20, 30, 50, 95, 95]);
    }

    #[test]
    fn registration_follows_the_configured_delimiter() {
        let mut dotted = core();
        assert_eq!(
            dotted.register(&["a.b", "c"], "", |_, _| Ok(Value::Null)),
            Err(RegistryError::DelimiterInSegment {
                segment: "a.b".to_string(),
                delimiter: '.',
            })
        );
        assert!(!dotted.get_available_commands().contains_key("a.b.c"));

        let mut slashed = DispatchCore::new(DispatchConfig {
            command_delimiter: '/',
            ..DispatchConfig::default()
        });
        slashed
            .register(&["tools", "v1.2"], "Versioned tool", |_, _| Ok(json!({"ok": true})))
            .unwrap();
        let listed: Vec<_> = slashed.get_available_commands().into_keys().collect();
        assert_eq!(listed, vec!["tools/v1.2"]);
        assert!(slashed.execute("tools/v1.2", &Params::new()).is_success());
    }

    #[test]
    fn subscribe_uses_configured_queue_capacity() {
        let core = DispatchCore::new(DispatchConfig {
            event_queue_capacity: 2,
            ..DispatchConfig::default()
        });
        let (id, mut rx) = core.subscribe();

        let result = core.execute("missing.command", &Params::new());
        assert_eq!(result.error_kind, Some(ErrorKind::ModuleNotFound));

        // Started, Updated(10), Updated(20), Failed: only the last two are retained.
        assert_eq!(rx.len(), 2);
        assert_eq!(rx.dropped(), 2);
        assert_eq!(rx.try_recv().unwrap().kind, EventKind::Updated);
        assert_eq!(rx.try_recv().unwrap().kind, EventKind::Failed);
        assert!(core.tracker().remove_listener(id));
    }
}
