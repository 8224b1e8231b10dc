/// Per-launch event log
///
/// When a request names a `log_path`, every launch appends JSON lines to
/// it, one object per event, all carrying the same launch id so that
/// concurrent launches sharing one file can be told apart.
use crate::config::types::{ErrorCode, JudgeResult};
use crate::core::types::KillCause;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Events written for one launch
#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent<'a> {
    Launch {
        exe_path: &'a Path,
        seccomp_rule: Option<&'a str>,
        confinement: &'a str,
    },
    Kill {
        cause: KillCause,
        real_time_ms: u64,
    },
    Failure {
        error: ErrorCode,
        message: &'a str,
    },
    Result {
        #[serde(flatten)]
        result: &'a JudgeResult,
        descendants_reaped: usize,
    },
}

#[derive(Serialize)]
struct Record<'a> {
    launch_id: &'a str,
    timestamp_ms: u128,
    #[serde(flatten)]
    event: &'a RunEvent<'a>,
}

pub struct RunLog {
    launch_id: String,
    sink: Option<File>,
}

impl RunLog {
    /// Open the log for appending. An unusable path only costs the log.
    pub fn open(path: Option<&Path>) -> Self {
        let launch_id = Uuid::new_v4().to_string();
        let sink = path.and_then(|path| {
            match OpenOptions::new().create(true).append(true).open(path) {
                Ok(file) => Some(file),
                Err(e) => {
                    log::warn!("cannot open run log {}: {}", path.display(), e);
                    None
                }
            }
        });
        Self { launch_id, sink }
    }

    pub fn launch_id(&self) -> &str {
        &self.launch_id
    }

    pub fn is_enabled(&self) -> bool {
        self.sink.is_some()
    }

    pub fn record(&mut self, event: RunEvent<'_>) {
        let Some(sink) = self.sink.as_mut() else {
            return;
        };
        let record = Record {
            launch_id: &self.launch_id,
            timestamp_ms: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis())
                .unwrap_or(0),
            event: &event,
        };
        let line = match serde_json::to_string(&record) {
            Ok(line) => line,
            Err(e) => {
                log::warn!("cannot serialize run log event: {}", e);
                return;
            }
        };
        // One write per line keeps concurrent appenders from interleaving.
        if let Err(e) = sink.write_all(format!("{}\n", line).as_bytes()) {
            log::warn!("run log write failed, disabling it for launch {}: {}", self.launch_id, e);
            self.sink = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_one_json_line_per_event() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.log");
        let mut log = RunLog::open(Some(&path));
        assert!(log.is_enabled());

        log.record(RunEvent::Launch {
            exe_path: Path::new("/bin/true"),
            seccomp_rule: Some("c_cpp"),
            confinement: "seccomp-bpf",
        });
        let result = JudgeResult::system_error(ErrorCode::ExecveFailed);
        log.record(RunEvent::Result {
            result: &result,
            descendants_reaped: 0,
        });

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["event"], "launch");
        assert_eq!(lines[0]["seccomp_rule"], "c_cpp");
        assert_eq!(lines[1]["event"], "result");
        assert_eq!(lines[1]["error"], "EXECVE_FAILED");
        assert_eq!(lines[0]["launch_id"], lines[1]["launch_id"]);
    }

    #[test]
    fn appends_across_launches() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.log");
        for _ in 0..2 {
            let mut log = RunLog::open(Some(&path));
            log.record(RunEvent::Kill {
                cause: KillCause::WallClock,
                real_time_ms: 1000,
            });
        }
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.contains("\"cause\":\"wall_clock\""));
    }

    #[test]
    fn disabled_log_ignores_events() {
        let mut log = RunLog::open(None);
        assert!(!log.is_enabled());
        log.record(RunEvent::Failure {
            error: ErrorCode::ForkFailed,
            message: "x",
        });
        assert!(!log.launch_id().is_empty());
    }

    #[test]
    fn unopenable_path_disables_log() {
        let log = RunLog::open(Some(Path::new("/nonexistent-judgebox/run.log")));
        assert!(!log.is_enabled());
    }
}
