//! Performance samples and their aggregate summary.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Measurement of one callable invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSample {
    pub operation_name: String,
    /// Wall-clock duration, serialized as fractional seconds.
    #[serde(rename = "execution_time", with = "duration_secs")]
    pub duration: Duration,
    /// Change in resident memory across the call, in bytes. May be negative.
    #[serde(rename = "memory_usage")]
    pub memory_delta: i64,
    pub success: bool,
    pub timestamp_ms: u64,
}

/// Aggregate view over retained samples.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSummary {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    #[serde(with = "duration_secs")]
    pub mean_duration: Duration,
    /// Up to five samples, longest first.
    pub slowest: Vec<PerformanceSample>,
    /// Up to five samples, largest memory growth first.
    pub largest_memory: Vec<PerformanceSample>,
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::trivially_copy_pass_by_ref)]
    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
