//! Periodic display refresh for the active operation.
//!
//! [`BackgroundWorker`] runs a [`BackgroundRunnable`] on a tokio task fed by an
//! mpsc channel, with a periodic tick. [`ProgressRefresher`] is the runnable that
//! reads the tracker's active snapshot and pushes it to a [`ProgressDisplay`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use switchyard_core::OperationSnapshot;
use tokio::sync::{mpsc, oneshot};

use crate::tracker::OperationTracker;

/// Capacity of a worker's task channel.
const TASK_CHANNEL_CAPACITY: usize = 64;

// ---------------------------------------------------------------------------
// BackgroundRunnable trait
// ---------------------------------------------------------------------------

/// Task handler driven by a [`BackgroundWorker`].
#[async_trait]
pub trait BackgroundRunnable: Send + 'static {
    type Task: Send + 'static;

    /// Handles one submitted task.
    async fn run(&mut self, task: Self::Task);

    /// Called on every tick. Default is a no-op.
    async fn on_tick(&mut self) {}

    /// Called once after the loop exits. Default is a no-op.
    async fn shutdown(&mut self) {}
}

/// Errors from submitting work to a [`BackgroundWorker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum WorkerError {
    #[error("worker is not running")]
    NotRunning,
    #[error("worker channel closed")]
    Closed,
}

// ---------------------------------------------------------------------------
// BackgroundWorker
// ---------------------------------------------------------------------------

/// Tokio task that serializes submitted tasks and ticks for one runnable.
///
/// Must be started inside a tokio runtime.
pub struct BackgroundWorker<R: BackgroundRunnable> {
    tx: Option<mpsc::Sender<R::Task>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl<R: BackgroundRunnable> BackgroundWorker<R> {
    /// Spawns the worker loop. The first tick fires one `tick_interval` after start.
    pub fn start(mut runnable: R, tick_interval: Duration) -> Self {
        let (tx, mut rx) = mpsc::channel::<R::Task>(TASK_CHANNEL_CAPACITY);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let period = tick_interval.max(Duration::from_millis(1));

        let handle = tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                // Queued tasks drain before a pending shutdown is honored.
                tokio::select! {
                    biased;
                    task = rx.recv() => match task {
                        Some(task) => runnable.run(task).await,
                        None => break,
                    },
                    _ = ticker.tick() => runnable.on_tick().await,
                    _ = &mut shutdown_rx => break,
                }
            }

            runnable.shutdown().await;
        });

        Self {
            tx: Some(tx),
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    /// Queues a task for the runnable.
    ///
    /// # Errors
    ///
    /// `NotRunning` after [`stop`](Self::stop), `Closed` if the loop has exited.
    pub async fn submit(&self, task: R::Task) -> Result<(), WorkerError> {
        let tx = self.tx.as_ref().ok_or(WorkerError::NotRunning)?;
        tx.send(task).await.map_err(|_| WorkerError::Closed)
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Signals shutdown and waits for the loop and `shutdown` hook to finish.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            if let Err(err) = handle.await {
                tracing::warn!(error = %err, "background worker task failed");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// ProgressRefresher
// ---------------------------------------------------------------------------

/// Sink for the active operation's display state.
///
/// `None` means no operation is active.
pub trait ProgressDisplay: Send + 'static {
    fn show(&mut self, active: Option<&OperationSnapshot>);

    /// Called once when the refresher stops.
    fn close(&mut self) {}
}

/// Writes each refresh as a structured `tracing` event.
#[derive(Debug, Default)]
pub struct TracingDisplay;

impl ProgressDisplay for TracingDisplay {
    fn show(&mut self, active: Option<&OperationSnapshot>) {
        if let Some(op) = active {
            tracing::info!(
                operation_id = %op.id,
                name = %op.name,
                status = %op.status,
                progress = op.progress,
                eta_secs = op.estimated_remaining_secs,
                "{}",
                op.message
            );
        }
    }
}

/// Tasks accepted by a [`ProgressRefresher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshTask {
    /// Refresh immediately instead of waiting for the next tick.
    Now,
    /// Stop pushing on ticks until resumed. Explicit `Now` still refreshes.
    Pause,
    Resume,
}

/// Reads the tracker's active operation on every tick and pushes it to a display.
pub struct ProgressRefresher<D: ProgressDisplay> {
    tracker: Arc<OperationTracker>,
    display: D,
    paused: bool,
    refreshes: u64,
}

impl<D: ProgressDisplay> ProgressRefresher<D> {
    #[must_use]
    pub fn new(tracker: Arc<OperationTracker>, display: D) -> Self {
        Self {
            tracker,
            display,
            paused: false,
            refreshes: 0,
        }
    }

    /// Starts the refresher on a [`BackgroundWorker`] ticking every `interval`.
    pub fn spawn(self, interval: Duration) -> BackgroundWorker<Self> {
        BackgroundWorker::start(self, interval)
    }

    fn refresh(&mut self) {
        let active = self.tracker.active_snapshot();
        self.display.show(active.as_ref());
        self.refreshes += 1;
    }
}

#[async_trait]
impl<D: ProgressDisplay> BackgroundRunnable for ProgressRefresher<D> {
    type Task = RefreshTask;

    async fn run(&mut self, task: RefreshTask) {
        match task {
            RefreshTask::Now => self.refresh(),
            RefreshTask::Pause => self.paused = true,
            RefreshTask::Resume => self.paused = false,
        }
    }

    async fn on_tick(&mut self) {
        if !self.paused {
            self.refresh();
        }
    }

    async fn shutdown(&mut self) {
        tracing::debug!(refreshes = self.refreshes, "progress refresher stopped");
        self.display.close();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
