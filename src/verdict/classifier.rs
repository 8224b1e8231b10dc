use crate::config::types::{ErrorCode, JudgeConfig, ResultCode};
use crate::core::types::{KillCause, RawTermination};

/// Outcome classifier
///
/// Pure function over raw evidence and the request limits. Rules are
/// evaluated in order and the first match wins:
/// 1. infrastructure failure -> error code, SYSTEM_ERROR
/// 2. wall clock exhausted -> REAL_TIME_LIMIT_EXCEEDED
/// 3. CPU time exhausted -> CPU_TIME_LIMIT_EXCEEDED
/// 4. peak memory at or above the limit -> MEMORY_LIMIT_EXCEEDED
/// 5. killed by any other signal -> RUNTIME_ERROR
/// 6. non-zero exit -> RUNTIME_ERROR
/// 7. otherwise SUCCESS
pub struct OutcomeClassifier;

impl OutcomeClassifier {
    pub fn classify(raw: &RawTermination, config: &JudgeConfig) -> (ErrorCode, ResultCode) {
        if let Some(failure) = &raw.failure {
            return (failure.code, ResultCode::SystemError);
        }

        let verdict = if Self::is_real_time_exceeded(raw, config) {
            ResultCode::RealTimeLimitExceeded
        } else if Self::is_cpu_time_exceeded(raw, config) {
            ResultCode::CpuTimeLimitExceeded
        } else if raw.peak_memory_bytes >= config.max_memory {
            ResultCode::MemoryLimitExceeded
        } else if raw.signal != 0 || raw.exit_code != 0 {
            ResultCode::RuntimeError
        } else {
            ResultCode::Success
        };

        (ErrorCode::Success, verdict)
    }

    fn is_real_time_exceeded(raw: &RawTermination, config: &JudgeConfig) -> bool {
        raw.kill_cause == Some(KillCause::WallClock) || raw.real_time_ms >= config.max_real_time
    }

    /// SIGXCPU comes from RLIMIT_CPU; SIGKILL at the hard limit is covered
    /// by the measured time
    fn is_cpu_time_exceeded(raw: &RawTermination, config: &JudgeConfig) -> bool {
        raw.kill_cause == Some(KillCause::CpuTime)
            || raw.signal == libc::SIGXCPU
            || raw.cpu_time_ms >= config.max_cpu_time
    }
}

/// Convenience wrapper around [`OutcomeClassifier::classify`]
pub fn classify(raw: &RawTermination, config: &JudgeConfig) -> (ErrorCode, ResultCode) {
    OutcomeClassifier::classify(raw, config)
}
