//! End-to-end launches against real binaries.
//!
//! Most tests run as the calling user. Tests that change uid need root and
//! return early otherwise, as do tests that need a binary or a kernel
//! feature the host lacks.

use judgebox::kernel::seccomp::is_seccomp_supported;
use judgebox::{ErrorCode, Judge, JudgeConfig, PolicyRegistry, ResultCode};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn judge() -> Judge {
    Judge::new(Arc::new(PolicyRegistry::builtin()))
}

fn request(exe: &str, args: &[&str]) -> JudgeConfig {
    JudgeConfig {
        max_cpu_time: 2000,
        max_real_time: 5000,
        max_memory: 256 << 20,
        max_stack: 8 << 20,
        max_process_number: 4096,
        max_output_size: 1 << 20,
        exe_path: PathBuf::from(exe),
        args: args.iter().map(|a| a.to_string()).collect(),
        env: vec!["PATH=/usr/bin:/bin".to_string()],
        ..Default::default()
    }
}

fn python_request(script: &str) -> JudgeConfig {
    let mut config = request("/usr/bin/python3", &["-B", "-c", script]);
    config.env.push("HOME=/tmp".to_string());
    config
}

fn running_as_root() -> bool {
    // SAFETY: geteuid has no preconditions.
    if unsafe { libc::geteuid() } == 0 {
        return true;
    }
    println!("skipping: needs root");
    false
}

fn seccomp_available() -> bool {
    if is_seccomp_supported() {
        return true;
    }
    println!("skipping: seccomp not supported");
    false
}

/// Tasks currently charged to `uid` for RLIMIT_NPROC
fn tasks_owned_by(uid: u32) -> u64 {
    let Ok(entries) = std::fs::read_dir("/proc") else {
        return 0;
    };
    entries
        .flatten()
        .filter_map(|entry| std::fs::read_to_string(entry.path().join("status")).ok())
        .filter_map(|status| {
            let field = |name: &str| {
                status
                    .lines()
                    .find_map(|line| line.strip_prefix(name))
                    .and_then(|rest| rest.split_whitespace().next())
                    .and_then(|v| v.parse::<u64>().ok())
            };
            (field("Uid:")? == u64::from(uid)).then(|| field("Threads:").unwrap_or(1))
        })
        .sum()
}

fn have(path: &str) -> bool {
    if Path::new(path).exists() {
        return true;
    }
    println!("skipping: {} not available", path);
    false
}

#[test]
fn test_true_succeeds() {
    if !have("/bin/true") {
        return;
    }
    let result = judge().launch(&request("/bin/true", &[]));
    assert_eq!(result.error, ErrorCode::Success);
    assert_eq!(result.result, ResultCode::Success);
    assert_eq!(result.exit_code, 0);
    assert_eq!(result.signal, 0);
}

#[test]
fn test_nonzero_exit_is_runtime_error() {
    if !have("/bin/false") {
        return;
    }
    let result = judge().launch(&request("/bin/false", &[]));
    assert_eq!(result.error, ErrorCode::Success);
    assert_eq!(result.result, ResultCode::RuntimeError);
    assert_ne!(result.exit_code, 0);
}

#[test]
fn test_sleep_hits_wall_clock_limit() {
    if !have("/bin/sleep") {
        return;
    }
    let mut config = request("/bin/sleep", &["10"]);
    config.max_real_time = 500;
    let started = Instant::now();
    let result = judge().launch(&config);
    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(result.error, ErrorCode::Success);
    assert_eq!(result.result, ResultCode::RealTimeLimitExceeded);
    assert_eq!(result.signal, libc::SIGKILL);
    assert!(result.real_time >= 500);
}

#[test]
fn test_busy_loop_hits_cpu_limit() {
    if !have("/bin/sh") {
        return;
    }
    let mut config = request("/bin/sh", &["-c", "while :; do :; done"]);
    config.max_cpu_time = 500;
    config.max_real_time = 10_000;
    let result = judge().launch(&config);
    assert_eq!(result.error, ErrorCode::Success);
    assert_eq!(result.result, ResultCode::CpuTimeLimitExceeded);
    assert!(result.real_time < 10_000);
}

#[test]
fn test_oversized_allocation_is_bounded() {
    if !have("/usr/bin/python3") {
        return;
    }
    let limit: u64 = 128 << 20;
    let mut config = request("/usr/bin/python3", &["-c", "x = bytearray(1 << 30)"]);
    config.max_memory = limit;
    let result = judge().launch(&config);
    assert_eq!(result.error, ErrorCode::Success);
    assert!(
        matches!(
            result.result,
            ResultCode::MemoryLimitExceeded | ResultCode::RuntimeError
        ),
        "{:?}",
        result
    );
    assert!(result.memory <= limit + (16 << 20));
}

#[test]
fn test_missing_executable_reports_execve_failure() {
    let started = Instant::now();
    let result = judge().launch(&request("/nonexistent/judgebox-program", &[]));
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(result.error, ErrorCode::ExecveFailed);
    assert_eq!(result.result, ResultCode::SystemError);
}

#[test]
fn test_invalid_request_is_rejected() {
    let mut config = request("/bin/true", &[]);
    config.max_cpu_time = 0;
    let result = judge().launch(&config);
    assert_eq!(result.error, ErrorCode::InvalidConfig);
    assert_eq!(result.result, ResultCode::SystemError);
}

#[test]
fn test_unknown_policy_is_rejected() {
    let mut config = request("/bin/true", &[]);
    config.seccomp_rule_name = Some("no_such_policy".to_string());
    let result = judge().launch(&config);
    assert_eq!(result.error, ErrorCode::InvalidConfig);
}

#[test]
fn test_denied_fork_is_killed_by_filter() {
    if !have("/bin/sh") || !have("/bin/true") {
        return;
    }
    if !is_seccomp_supported() {
        println!("skipping: seccomp not supported");
        return;
    }
    let mut config = request("/bin/sh", &["-c", "/bin/true; /bin/true"]);
    config.seccomp_rule_name = Some("general".to_string());
    let result = judge().launch(&config);
    assert_eq!(result.error, ErrorCode::Success);
    assert_eq!(result.result, ResultCode::RuntimeError);
    assert_eq!(result.signal, libc::SIGSYS);
}

#[test]
fn test_output_limit_stops_writer() {
    if !have("/usr/bin/yes") {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out.txt");
    let mut config = request("/usr/bin/yes", &[]);
    config.max_output_size = 4096;
    config.output_path = Some(out.clone());
    let result = judge().launch(&config);
    assert_eq!(result.error, ErrorCode::Success);
    assert_eq!(result.result, ResultCode::RuntimeError);
    assert!(std::fs::metadata(&out).unwrap().len() <= 4096);
}

#[test]
fn test_stdio_redirection() {
    if !have("/bin/sh") {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.txt");
    let out = dir.path().join("out.txt");
    let err = dir.path().join("err.txt");
    std::fs::write(&input, "judge\n").unwrap();

    let mut config = request("/bin/sh", &["-c", "read x; echo got-$x; echo oops >&2"]);
    config.input_path = Some(input);
    config.output_path = Some(out.clone());
    config.error_path = Some(err.clone());
    let result = judge().launch(&config);
    assert!(result.is_success(), "{:?}", result);
    assert_eq!(std::fs::read_to_string(&out).unwrap(), "got-judge\n");
    assert_eq!(std::fs::read_to_string(&err).unwrap(), "oops\n");
}

#[test]
fn test_concurrent_launches_are_independent() {
    if !have("/bin/sleep") || !have("/bin/true") {
        return;
    }
    let judge = Arc::new(judge());
    let handles: Vec<_> = (0..4)
        .map(|i| {
            let judge = Arc::clone(&judge);
            std::thread::spawn(move || {
                if i % 2 == 0 {
                    let mut config = request("/bin/sleep", &["10"]);
                    config.max_real_time = 300;
                    (i, judge.launch(&config))
                } else {
                    (i, judge.launch(&request("/bin/true", &[])))
                }
            })
        })
        .collect();

    for handle in handles {
        let (i, result) = handle.join().unwrap();
        if i % 2 == 0 {
            assert_eq!(result.result, ResultCode::RealTimeLimitExceeded);
        } else {
            assert!(result.is_success(), "{:?}", result);
        }
    }
}

#[test]
fn test_run_log_is_written() {
    if !have("/bin/true") {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("judge.log");
    let mut config = request("/bin/true", &[]);
    config.log_path = Some(log_path.clone());
    let result = judge().launch(&config);
    assert!(result.is_success());

    let text = std::fs::read_to_string(&log_path).unwrap();
    let lines: Vec<serde_json::Value> = text
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines.first().unwrap()["event"], "launch");
    assert_eq!(lines.last().unwrap()["event"], "result");
    assert_eq!(lines.last().unwrap()["result"], "SUCCESS");
}

#[test]
fn test_python_with_home_runs_under_general() {
    if !have("/usr/bin/python3") || !seccomp_available() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out.txt");
    let mut config = python_request("print('ok')");
    config.seccomp_rule_name = Some("general".to_string());
    config.output_path = Some(out.clone());
    let result = judge().launch(&config);
    assert!(result.is_success(), "{:?}", result);
    assert_eq!(std::fs::read_to_string(&out).unwrap(), "ok\n");
}

#[test]
fn test_denied_kill_is_killed_by_filter() {
    if !have("/bin/sh") || !seccomp_available() {
        return;
    }
    let mut config = request("/bin/sh", &["-c", "kill -0 $$"]);
    config.seccomp_rule_name = Some("general".to_string());
    let result = judge().launch(&config);
    assert_eq!(result.error, ErrorCode::Success);
    assert_eq!(result.signal, libc::SIGSYS);
}

#[cfg(target_arch = "x86_64")]
#[test]
fn test_x32_alias_of_denied_syscall_is_killed() {
    if !have("/usr/bin/python3") || !seccomp_available() {
        return;
    }
    // socket(AF_INET, SOCK_STREAM, 0) through the x32 number
    let script = "import ctypes\n\
                  ctypes.CDLL(None).syscall(0x40000000 + 41, 2, 1, 0)\n\
                  print('escaped')";
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out.txt");
    let mut config = python_request(script);
    config.seccomp_rule_name = Some("general".to_string());
    config.output_path = Some(out.clone());
    let result = judge().launch(&config);
    assert_eq!(result.error, ErrorCode::Success);
    assert_eq!(result.result, ResultCode::RuntimeError);
    assert_eq!(result.signal, libc::SIGSYS, "{:?}", result);
    assert!(!std::fs::read_to_string(&out).unwrap().contains("escaped"));
}

#[test]
fn test_dropped_child_keeps_parent_death_signal() {
    if !running_as_root() || !have("/usr/bin/python3") {
        return;
    }
    let script = "import ctypes, os\n\
                  sig = ctypes.c_int()\n\
                  ctypes.CDLL(None).prctl(2, ctypes.byref(sig), 0, 0, 0)\n\
                  print(os.getuid(), os.getgid(), sig.value)";
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out.txt");
    let mut config = python_request(script);
    config.uid = 65534;
    config.gid = 65534;
    config.output_path = Some(out.clone());
    let result = judge().launch(&config);
    assert!(result.is_success(), "{:?}", result);
    assert_eq!(
        std::fs::read_to_string(&out).unwrap(),
        format!("65534 65534 {}\n", libc::SIGKILL)
    );
}

#[test]
fn test_process_limit_applies_to_dropped_uid() {
    if !running_as_root() || !have("/bin/sh") || !have("/bin/true") {
        return;
    }
    // A uid no other test uses, so the count below stays stable.
    let uid = 65533;
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out.txt");
    let mut config = request("/bin/sh", &["-c", "/bin/true && echo forked"]);
    config.uid = uid;
    config.gid = 65534;
    config.max_process_number = tasks_owned_by(uid) + 1;
    config.output_path = Some(out.clone());
    let result = judge().launch(&config);
    assert_eq!(result.error, ErrorCode::Success, "{:?}", result);
    assert!(!std::fs::read_to_string(&out).unwrap().contains("forked"));
}
