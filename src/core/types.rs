use crate::config::types::{ErrorCode, JudgeError};
use serde::{Deserialize, Serialize};

/// Why the monitor terminated the judged process
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum KillCause {
    WallClock,
    CpuTime,
    OutputSize,
}

/// Infrastructure failure that prevented a normal run
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LaunchFailure {
    pub code: ErrorCode,
    pub message: String,
}

impl From<&JudgeError> for LaunchFailure {
    fn from(err: &JudgeError) -> Self {
        Self {
            code: err.error_code(),
            message: err.to_string(),
        }
    }
}

/// Raw evidence about one launch, before classification
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RawTermination {
    pub pid: Option<i32>,
    pub exit_code: i32,
    pub signal: i32,
    pub cpu_time_ms: u64,
    pub real_time_ms: u64,
    pub peak_memory_bytes: u64,
    /// At most one enforcement cause, recorded by whoever won the race
    pub kill_cause: Option<KillCause>,
    pub failure: Option<LaunchFailure>,
    /// Group members reaped after the main process
    pub descendants_reaped: usize,
}

impl RawTermination {
    pub fn failed(err: &JudgeError, real_time_ms: u64) -> Self {
        Self {
            real_time_ms,
            failure: Some(LaunchFailure::from(err)),
            ..Default::default()
        }
    }
}
