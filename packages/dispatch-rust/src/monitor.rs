//! Duration and memory measurement around a single call, with a bounded history per name.

use std::collections::{HashMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use switchyard_core::time::now_millis;
use switchyard_core::{HandlerError, PerformanceSample, PerformanceSummary};
use sysinfo::{Pid, ProcessesToUpdate, System};

use crate::tracker::listener::panic_message;

/// Number of samples kept in each ranking of [`PerformanceSummary`].
const TOP_N: usize = 5;

// ---------------------------------------------------------------------------
// MemoryProbe
// ---------------------------------------------------------------------------

/// Source of the process's current memory footprint.
pub trait MemoryProbe: Send + Sync {
    /// Resident memory in bytes, or `None` if it cannot be read.
    fn resident_bytes(&self) -> Option<u64>;
}

/// Reads the resident set size of the current process through `sysinfo`.
pub struct SysinfoProbe {
    system: Mutex<System>,
    pid: Pid,
}

impl SysinfoProbe {
    #[must_use]
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
            pid: Pid::from_u32(std::process::id()),
        }
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProbe for SysinfoProbe {
    fn resident_bytes(&self) -> Option<u64> {
        let mut system = self.system.lock();
        system.refresh_processes(ProcessesToUpdate::Some(&[self.pid]), true);
        system.process(self.pid).map(sysinfo::Process::memory)
    }
}

// ---------------------------------------------------------------------------
// PerformanceMonitor
// ---------------------------------------------------------------------------

/// Outcome of [`PerformanceMonitor::measure`]: the call's result plus its sample.
#[derive(Debug)]
pub struct Measured<T> {
    pub outcome: Result<T, HandlerError>,
    pub sample: PerformanceSample,
}

/// Measures calls and retains the newest samples per operation name.
pub struct PerformanceMonitor {
    history: RwLock<HashMap<String, VecDeque<PerformanceSample>>>,
    capacity: usize,
    probe: Arc<dyn MemoryProbe>,
}

impl PerformanceMonitor {
    /// Creates a monitor keeping `capacity` samples per name, sampling memory with
    /// [`SysinfoProbe`].
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self::with_probe(capacity, Arc::new(SysinfoProbe::new()))
    }

    #[must_use]
    pub fn with_probe(capacity: usize, probe: Arc<dyn MemoryProbe>) -> Self {
        Self {
            history: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
            probe,
        }
    }

    /// Runs `f`, recording wall-clock duration and memory delta under `name`.
    ///
    /// Failure is captured rather than propagated: an `Err` from `f`, or a panic
    /// converted to a `"Panic"` [`HandlerError`], ends up in `outcome` with
    /// `sample.success == false`.
    pub fn measure<T, F>(&self, name: &str, f: F) -> Measured<T>
    where
        F: FnOnce() -> Result<T, HandlerError>,
    {
        let before = self.probe.resident_bytes();
        let started = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| {
            Err(HandlerError::panic(panic_message(payload.as_ref())))
        });
        let duration = started.elapsed();
        let after = self.probe.resident_bytes();

        let sample = PerformanceSample {
            operation_name: name.to_string(),
            duration,
            memory_delta: memory_delta(before, after),
            success: outcome.is_ok(),
            timestamp_ms: now_millis(),
        };
        self.record(sample.clone());
        Measured { outcome, sample }
    }

    /// Appends a sample to its name's history, evicting the oldest past capacity.
    pub fn record(&self, sample: PerformanceSample) {
        let outcome = if sample.success { "success" } else { "error" };
        metrics::histogram!(
            "switchyard_command_duration_seconds",
            "command" => sample.operation_name.clone()
        )
        .record(sample.duration.as_secs_f64());
        metrics::counter!(
            "switchyard_command_total",
            "command" => sample.operation_name.clone(),
            "outcome" => outcome
        )
        .increment(1);

        let mut history = self.history.write();
        let samples = history.entry(sample.operation_name.clone()).or_default();
        samples.push_back(sample);
        while samples.len() > self.capacity {
            samples.pop_front();
        }
    }

    /// Most recent sample recorded under `name`.
    #[must_use]
    pub fn latest(&self, name: &str) -> Option<PerformanceSample> {
        self.history
            .read()
            .get(name)
            .and_then(|samples| samples.back().cloned())
    }

    /// Retained samples for `name`, oldest first.
    #[must_use]
    pub fn history(&self, name: &str) -> Vec<PerformanceSample> {
        self.history
            .read()
            .get(name)
            .map(|samples| samples.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Summary over every retained sample.
    #[must_use]
    pub fn analyze(&self) -> PerformanceSummary {
        let samples: Vec<PerformanceSample> = self
            .history
            .read()
            .values()
            .flat_map(|samples| samples.iter().cloned())
            .collect();
        if samples.is_empty() {
            return PerformanceSummary::default();
        }

        let successful = samples.iter().filter(|s| s.success).count();
        let total_duration: Duration = samples.iter().map(|s| s.duration).sum();
        let mean_duration = total_duration
            .checked_div(u32::try_from(samples.len()).unwrap_or(u32::MAX))
            .unwrap_or_default();

        let mut slowest = samples.clone();
        slowest.sort_by(|a, b| b.duration.cmp(&a.duration));
        slowest.truncate(TOP_N);

        let mut largest_memory = samples.clone();
        largest_memory.sort_by(|a, b| b.memory_delta.cmp(&a.memory_delta));
        largest_memory.truncate(TOP_N);

        PerformanceSummary {
            total: samples.len(),
            successful,
            failed: samples.len() - successful,
            mean_duration,
            slowest,
            largest_memory,
        }
    }
}

impl Default for PerformanceMonitor {
    fn default() -> Self {
        Self::new(crate::config::DispatchConfig::default().performance_history)
    }
}

fn memory_delta(before: Option<u64>, after: Option<u64>) -> i64 {
    let (Some(before), Some(after)) = (before, after) else {
        return 0;
    };
    let magnitude = i64::try_from(after.abs_diff(before)).unwrap_or(i64::MAX);
    if after >= before {
        magnitude
    } else {
        -magnitude
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
