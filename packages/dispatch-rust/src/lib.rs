//! Switchyard dispatch: command registry, hierarchical operation tracker,
//! performance monitor, error remediation, and the `DispatchCore` that ties them together.

pub mod config;
pub mod dispatcher;
pub mod monitor;
pub mod refresh;
pub mod registry;
pub mod remediation;
pub mod telemetry;
pub mod tracker;

pub use config::DispatchConfig;
pub use dispatcher::{DispatchCore, DispatchError, HandlerContext};
pub use monitor::{Measured, MemoryProbe, PerformanceMonitor, SysinfoProbe};
pub use refresh::{
    BackgroundRunnable, BackgroundWorker, ProgressDisplay, ProgressRefresher, RefreshTask,
    TracingDisplay, WorkerError,
};
pub use registry::{
    CommandEntry, CommandHandler, CommandRegistry, RegistryError, ResolveError, SegmentRole,
};
pub use remediation::{ErrorRegistry, RemediationHandler};
pub use tracker::{
    event_queue, Advance, EventReceiver, ListenerId, OperationListener, OperationTracker,
    ProgressHandle, ProgressUpdate, QueueListener, TrackerError,
};
