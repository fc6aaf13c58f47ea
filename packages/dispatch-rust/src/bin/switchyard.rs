//! `switchyard`: run or list commands against a `DispatchCore` from the shell.
//!
//! Ships a `diagnostics` module (`echo`, `fail`, `sleep`) for exercising the
//! dispatch pipeline end to end.

use std::process::ExitCode;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use serde_json::json;
use switchyard_core::{ErrorRecord, HandlerError, Params, Remediation, Value};
use switchyard_dispatch::telemetry::{init_tracing, LogFormat};
use switchyard_dispatch::{
    DispatchConfig, DispatchCore, HandlerContext, ProgressRefresher, RefreshTask, TracingDisplay,
};

#[derive(Parser, Debug)]
#[command(name = "switchyard", version, about = "Dispatch tracked commands")]
struct Cli {
    /// Print every registered command as JSON and exit.
    #[arg(long, conflicts_with = "command")]
    list: bool,

    /// Dotted command to execute, e.g. `diagnostics.echo`.
    #[arg(long, short = 'c', required_unless_present = "list")]
    command: Option<String>,

    /// Command parameters as a JSON object.
    #[arg(long, short = 'p', default_value = "{}")]
    params: String,

    /// Log the active operation on every refresh tick while the command runs.
    #[arg(long, env = "SWITCHYARD_SHOW_PROGRESS")]
    show_progress: bool,

    #[arg(long, value_enum, default_value_t = LogFormat::Pretty, env = "SWITCHYARD_LOG_FORMAT")]
    log_format: LogFormat,

    #[arg(long, env = "SWITCHYARD_MAX_LOG_ENTRIES", default_value_t = 1000)]
    max_log_entries: usize,

    #[arg(long, env = "SWITCHYARD_JOURNAL_CAPACITY", default_value_t = 1000)]
    journal_capacity: usize,

    #[arg(long, env = "SWITCHYARD_PERFORMANCE_HISTORY", default_value_t = 32)]
    performance_history: usize,

    #[arg(long, env = "SWITCHYARD_ERROR_LOG_CAPACITY", default_value_t = 1000)]
    error_log_capacity: usize,

    /// Separator between command path segments.
    #[arg(long, env = "SWITCHYARD_COMMAND_DELIMITER", default_value_t = '.')]
    command_delimiter: char,

    #[arg(long, env = "SWITCHYARD_DEFAULT_TOTAL_STEPS", default_value_t = 100)]
    default_total_steps: u32,

    #[arg(long, env = "SWITCHYARD_REFRESH_INTERVAL_MS", default_value_t = 100)]
    refresh_interval_ms: u64,

    #[arg(long, env = "SWITCHYARD_EVENT_QUEUE_CAPACITY", default_value_t = 256)]
    event_queue_capacity: usize,
}

impl Cli {
    fn config(&self) -> DispatchConfig {
        DispatchConfig {
            max_log_entries: self.max_log_entries,
            journal_capacity: self.journal_capacity,
            performance_history: self.performance_history,
            error_log_capacity: self.error_log_capacity,
            command_delimiter: self.command_delimiter,
            default_total_steps: self.default_total_steps,
            refresh_interval_ms: self.refresh_interval_ms,
            event_queue_capacity: self.event_queue_capacity,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.log_format)?;

    let core = Arc::new(build_core(cli.config())?);

    if cli.list {
        println!(
            "{}",
            serde_json::to_string_pretty(&core.get_available_commands())?
        );
        return Ok(ExitCode::SUCCESS);
    }

    let command = cli.command.clone().context("--command is required")?;
    let params: Params =
        serde_json::from_str(&cli.params).context("--params must be a JSON object")?;

    let mut refresher = cli.show_progress.then(|| {
        ProgressRefresher::new(Arc::clone(core.tracker()), TracingDisplay)
            .spawn(Duration::from_millis(core.config().refresh_interval_ms))
    });

    let runner = Arc::clone(&core);
    let result = tokio::task::spawn_blocking(move || runner.execute(&command, &params))
        .await
        .context("command task panicked")?;

    if let Some(worker) = refresher.as_mut() {
        worker.submit(RefreshTask::Now).await?;
        worker.stop().await;
    }

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(if result.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn build_core(config: DispatchConfig) -> anyhow::Result<DispatchCore> {
    let mut core = DispatchCore::new(config);
    core.register(
        &["diagnostics", "echo"],
        "Return the given parameters unchanged",
        |_, params| Ok(json!({ "status": "success", "params": params })),
    )?;
    core.register(
        &["diagnostics", "fail"],
        "Fail with `kind` and `message` parameters",
        fail,
    )?;
    core.register(
        &["diagnostics", "sleep"],
        "Sleep for `ms` milliseconds in `steps` increments, reporting progress",
        sleep,
    )?;

    core.errors().register(
        "DiagnosticError",
        |record: &ErrorRecord| -> anyhow::Result<Remediation> {
            Ok(Remediation::new(
                "acknowledged",
                json!({ "command": record.operation_name }),
            ))
        },
    );
    Ok(core)
}

fn fail(_ctx: &HandlerContext<'_>, params: &Params) -> Result<Value, HandlerError> {
    let kind = params
        .get("kind")
        .and_then(Value::as_str)
        .unwrap_or("DiagnosticError");
    let message = params
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("requested failure");
    Err(HandlerError::new(kind, message).with_details(Value::Object(params.clone())))
}

fn sleep(ctx: &HandlerContext<'_>, params: &Params) -> Result<Value, HandlerError> {
    let total_ms = params.get("ms").and_then(Value::as_u64).unwrap_or(1000);
    let steps = params
        .get("steps")
        .and_then(Value::as_u64)
        .and_then(|s| u32::try_from(s).ok())
        .unwrap_or(10)
        .max(1);
    let slice = Duration::from_millis(total_ms / u64::from(steps));

    for i in 1..=steps {
        if ctx.is_cancelled() {
            return Err(HandlerError::new("Cancelled", "sleep interrupted"));
        }
        thread::sleep(slice);
        ctx.report(sleep_step(i, steps), format!("slept {i}/{steps}"))
            .map_err(|e| HandlerError::new("TrackerError", e.to_string()))?;
    }
    Ok(json!({ "status": "success", "slept_ms": total_ms }))
}

/// Maps slice `i` of `steps` onto the dispatcher's execute window (50..=90).
fn sleep_step(i: u32, steps: u32) -> u32 {
    let step = 50 + u64::from(i) * 40 / u64::from(steps.max(1));
    u32::try_from(step).unwrap_or(90)
}
