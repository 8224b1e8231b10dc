/// Core request, result and error types shared by every judgebox stage
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Maximum number of arguments passed to the judged program (argv[0] excluded)
pub const ARGS_MAX_NUMBER: usize = 256;

/// Maximum number of environment entries passed to the judged program
pub const ENV_MAX_NUMBER: usize = 256;

/// Maximum accepted length of any configured path, in bytes
pub const PATH_MAX_LEN: usize = 4096;

/// A single judge request.
///
/// Times are milliseconds, sizes are bytes. Every limit must be strictly
/// positive. Optional stdio paths fall back to `/dev/null`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct JudgeConfig {
    /// CPU time limit (ms)
    pub max_cpu_time: u64,
    /// Wall-clock limit (ms)
    pub max_real_time: u64,
    /// Address-space limit and peak-memory verdict threshold (bytes)
    pub max_memory: u64,
    /// Stack limit (bytes)
    pub max_stack: u64,
    /// Process-count limit applied through RLIMIT_NPROC
    pub max_process_number: u64,
    /// Largest file the program may write, and total stdout+stderr budget (bytes)
    pub max_output_size: u64,
    /// Absolute path of the program to execute
    pub exe_path: PathBuf,
    #[serde(default)]
    pub input_path: Option<PathBuf>,
    #[serde(default)]
    pub output_path: Option<PathBuf>,
    #[serde(default)]
    pub error_path: Option<PathBuf>,
    /// Per-launch JSON-lines event log
    #[serde(default)]
    pub log_path: Option<PathBuf>,
    #[serde(default)]
    pub args: Vec<String>,
    /// `KEY=value` entries; the program sees exactly these
    #[serde(default)]
    pub env: Vec<String>,
    /// Name of a registered syscall policy; `None` runs unfiltered
    #[serde(default)]
    pub seccomp_rule_name: Option<String>,
    #[serde(default = "caller_uid")]
    pub uid: u32,
    #[serde(default = "caller_gid")]
    pub gid: u32,
}

fn caller_uid() -> u32 {
    nix::unistd::getuid().as_raw()
}

fn caller_gid() -> u32 {
    nix::unistd::getgid().as_raw()
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            max_cpu_time: 1_000,
            max_real_time: 3_000,
            max_memory: 256 * 1024 * 1024,
            max_stack: 32 * 1024 * 1024,
            max_process_number: 64,
            max_output_size: 16 * 1024 * 1024,
            exe_path: PathBuf::new(),
            input_path: None,
            output_path: None,
            error_path: None,
            log_path: None,
            args: Vec::new(),
            env: Vec::new(),
            seccomp_rule_name: None,
            uid: caller_uid(),
            gid: caller_gid(),
        }
    }
}

impl JudgeConfig {
    /// True when stdout and stderr are the same file and must share one descriptor
    pub fn shares_output_file(&self) -> bool {
        matches!(
            (&self.output_path, &self.error_path),
            (Some(out), Some(err)) if out == err
        )
    }
}

/// Infrastructure outcome of a launch. Anything but `Success` means the
/// verdict must be ignored.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    Success,
    InvalidConfig,
    ForkFailed,
    PthreadFailed,
    WaitFailed,
    RootRequired,
    LoadSeccompFailed,
    SetrlimitFailed,
    Dup2Failed,
    SetuidFailed,
    ExecveFailed,
    /// Reserved for the external special judge
    SpjError,
}

impl ErrorCode {
    /// Numeric value used on the wire by existing judge clients
    pub fn code(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::InvalidConfig => -1,
            Self::ForkFailed => -2,
            Self::PthreadFailed => -3,
            Self::WaitFailed => -4,
            Self::RootRequired => -5,
            Self::LoadSeccompFailed => -6,
            Self::SetrlimitFailed => -7,
            Self::Dup2Failed => -8,
            Self::SetuidFailed => -9,
            Self::ExecveFailed => -10,
            Self::SpjError => -11,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        let all = [
            Self::Success,
            Self::InvalidConfig,
            Self::ForkFailed,
            Self::PthreadFailed,
            Self::WaitFailed,
            Self::RootRequired,
            Self::LoadSeccompFailed,
            Self::SetrlimitFailed,
            Self::Dup2Failed,
            Self::SetuidFailed,
            Self::ExecveFailed,
            Self::SpjError,
        ];
        all.into_iter().find(|candidate| candidate.code() == code)
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Success => "SUCCESS",
            Self::InvalidConfig => "INVALID_CONFIG",
            Self::ForkFailed => "FORK_FAILED",
            Self::PthreadFailed => "PTHREAD_FAILED",
            Self::WaitFailed => "WAIT_FAILED",
            Self::RootRequired => "ROOT_REQUIRED",
            Self::LoadSeccompFailed => "LOAD_SECCOMP_FAILED",
            Self::SetrlimitFailed => "SETRLIMIT_FAILED",
            Self::Dup2Failed => "DUP2_FAILED",
            Self::SetuidFailed => "SETUID_FAILED",
            Self::ExecveFailed => "EXECVE_FAILED",
            Self::SpjError => "SPJ_ERROR",
        };
        f.write_str(name)
    }
}

/// Behavioural verdict of a judged run
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultCode {
    Success,
    /// Reserved for the external output comparator; never produced here
    WrongAnswer,
    CpuTimeLimitExceeded,
    RealTimeLimitExceeded,
    MemoryLimitExceeded,
    RuntimeError,
    SystemError,
}

impl ResultCode {
    pub fn code(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::WrongAnswer => -1,
            Self::CpuTimeLimitExceeded => 1,
            Self::RealTimeLimitExceeded => 2,
            Self::MemoryLimitExceeded => 3,
            Self::RuntimeError => 4,
            Self::SystemError => 5,
        }
    }
}

impl std::fmt::Display for ResultCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Success => "SUCCESS",
            Self::WrongAnswer => "WRONG_ANSWER",
            Self::CpuTimeLimitExceeded => "CPU_TIME_LIMIT_EXCEEDED",
            Self::RealTimeLimitExceeded => "REAL_TIME_LIMIT_EXCEEDED",
            Self::MemoryLimitExceeded => "MEMORY_LIMIT_EXCEEDED",
            Self::RuntimeError => "RUNTIME_ERROR",
            Self::SystemError => "SYSTEM_ERROR",
        };
        f.write_str(name)
    }
}

/// Outcome of one launch, produced exactly once
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct JudgeResult {
    /// user + system CPU time (ms)
    pub cpu_time: u64,
    /// wall-clock time from spawn to reap (ms)
    pub real_time: u64,
    /// peak resident memory (bytes)
    pub memory: u64,
    /// terminating signal, 0 if none
    pub signal: i32,
    pub exit_code: i32,
    pub error: ErrorCode,
    pub result: ResultCode,
}

impl JudgeResult {
    /// Result for a launch that failed before producing any measurement
    pub fn system_error(error: ErrorCode) -> Self {
        Self {
            cpu_time: 0,
            real_time: 0,
            memory: 0,
            signal: 0,
            exit_code: 0,
            error,
            result: ResultCode::SystemError,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error == ErrorCode::Success && self.result == ResultCode::Success
    }
}

/// Errors raised by judgebox stages. Each maps to exactly one [`ErrorCode`].
#[derive(Error, Debug)]
pub enum JudgeError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Fork error: {0}")]
    Fork(String),

    #[error("Monitor thread error: {0}")]
    Thread(String),

    #[error("Wait error: {0}")]
    Wait(String),

    #[error("Root privilege required: {0}")]
    RootRequired(String),

    #[error("Seccomp error: {0}")]
    Seccomp(String),

    #[error("Resource limit error: {0}")]
    ResourceLimit(String),

    #[error("Redirect error: {0}")]
    Redirect(String),

    #[error("Privilege error: {0}")]
    Privilege(String),

    #[error("Exec error: {0}")]
    Exec(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl JudgeError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            JudgeError::Config(_) | JudgeError::Io(_) | JudgeError::Json(_) => {
                ErrorCode::InvalidConfig
            }
            JudgeError::Fork(_) => ErrorCode::ForkFailed,
            JudgeError::Thread(_) => ErrorCode::PthreadFailed,
            JudgeError::Wait(_) => ErrorCode::WaitFailed,
            JudgeError::RootRequired(_) => ErrorCode::RootRequired,
            JudgeError::Seccomp(_) => ErrorCode::LoadSeccompFailed,
            JudgeError::ResourceLimit(_) => ErrorCode::SetrlimitFailed,
            JudgeError::Redirect(_) => ErrorCode::Dup2Failed,
            JudgeError::Privilege(_) => ErrorCode::SetuidFailed,
            JudgeError::Exec(_) => ErrorCode::ExecveFailed,
        }
    }

    /// Rebuild the error a sandboxed child reported over its status pipe
    pub fn from_child_report(code: ErrorCode, errno: i32) -> Self {
        let detail = std::io::Error::from_raw_os_error(errno).to_string();
        match code {
            ErrorCode::Dup2Failed => JudgeError::Redirect(detail),
            ErrorCode::SetrlimitFailed => JudgeError::ResourceLimit(detail),
            ErrorCode::SetuidFailed => JudgeError::Privilege(detail),
            ErrorCode::LoadSeccompFailed => JudgeError::Seccomp(detail),
            ErrorCode::ExecveFailed => JudgeError::Exec(detail),
            other => JudgeError::Fork(format!("child reported {}: {}", other, detail)),
        }
    }
}

impl From<nix::errno::Errno> for JudgeError {
    fn from(err: nix::errno::Errno) -> Self {
        JudgeError::Io(std::io::Error::from(err))
    }
}

/// Result type alias for judgebox operations
pub type Result<T> = std::result::Result<T, JudgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_keep_wire_values() {
        assert_eq!(ErrorCode::Success.code(), 0);
        assert_eq!(ErrorCode::InvalidConfig.code(), -1);
        assert_eq!(ErrorCode::PthreadFailed.code(), -3);
        assert_eq!(ErrorCode::ExecveFailed.code(), -10);
        assert_eq!(ErrorCode::SpjError.code(), -11);
        assert_eq!(ErrorCode::from_code(-6), Some(ErrorCode::LoadSeccompFailed));
        assert_eq!(ErrorCode::from_code(7), None);
    }

    #[test]
    fn result_codes_keep_wire_values() {
        assert_eq!(ResultCode::WrongAnswer.code(), -1);
        assert_eq!(ResultCode::CpuTimeLimitExceeded.code(), 1);
        assert_eq!(ResultCode::SystemError.code(), 5);
    }

    #[test]
    fn every_error_variant_maps_to_one_code() {
        assert_eq!(
            JudgeError::Config("x".into()).error_code(),
            ErrorCode::InvalidConfig
        );
        assert_eq!(JudgeError::Thread("x".into()).error_code(), ErrorCode::PthreadFailed);
        assert_eq!(
            JudgeError::Redirect("x".into()).error_code(),
            ErrorCode::Dup2Failed
        );
        assert_eq!(
            JudgeError::from_child_report(ErrorCode::ExecveFailed, libc::ENOENT).error_code(),
            ErrorCode::ExecveFailed
        );
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let json = r#"{
            "max_cpu_time": 1000,
            "max_real_time": 2000,
            "max_memory": 134217728,
            "max_stack": 8388608,
            "max_process_number": 8,
            "max_output_size": 1024,
            "exe_path": "/bin/true"
        }"#;
        let config: JudgeConfig = serde_json::from_str(json).unwrap();
        assert!(config.args.is_empty());
        assert!(config.seccomp_rule_name.is_none());
        assert_eq!(config.uid, nix::unistd::getuid().as_raw());
    }

    #[test]
    fn result_serializes_codes_by_name() {
        let result = JudgeResult::system_error(ErrorCode::ExecveFailed);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["error"], "EXECVE_FAILED");
        assert_eq!(json["result"], "SYSTEM_ERROR");
    }

    #[test]
    fn shared_output_file_detection() {
        let mut config = JudgeConfig::default();
        config.output_path = Some(PathBuf::from("/tmp/out"));
        config.error_path = Some(PathBuf::from("/tmp/out"));
        assert!(config.shares_output_file());
        config.error_path = Some(PathBuf::from("/tmp/err"));
        assert!(!config.shares_output_file());
    }
}
