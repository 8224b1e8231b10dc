//! Policies loaded from a directory take part in real launches.

use judgebox::kernel::seccomp::is_seccomp_supported;
use judgebox::{ErrorCode, Judge, JudgeConfig, PolicyRegistry, ResultCode};
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn policy_dir(files: &[(&str, &str)]) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    for (name, body) in files {
        std::fs::write(dir.path().join(name), body).unwrap();
    }
    dir
}

fn request(exe: &str, rule: &str) -> JudgeConfig {
    JudgeConfig {
        max_cpu_time: 2000,
        max_real_time: 5000,
        max_process_number: 4096,
        exe_path: PathBuf::from(exe),
        seccomp_rule_name: Some(rule.to_string()),
        ..Default::default()
    }
}

#[test]
fn test_file_policy_denies_listed_syscall() {
    if !Path::new("/bin/uname").exists() || !is_seccomp_supported() {
        println!("skipping: needs /bin/uname and seccomp");
        return;
    }
    let dir = policy_dir(&[(
        "no_uname.json",
        r#"{"name":"no_uname","mode":"denylist","syscalls":["uname"],"read_only_open":false}"#,
    )]);
    let registry = PolicyRegistry::load(dir.path()).unwrap();
    assert!(registry.contains("no_uname"));
    assert!(registry.contains("general"));

    let judge = Judge::new(Arc::new(registry));
    let result = judge.launch(&request("/bin/uname", "no_uname"));
    assert_eq!(result.error, ErrorCode::Success);
    assert_eq!(result.result, ResultCode::RuntimeError);
    assert_eq!(result.signal, libc::SIGSYS);
}

#[test]
fn test_unknown_syscall_name_fails_load() {
    let dir = policy_dir(&[(
        "bad.json",
        r#"{"name":"bad","mode":"allowlist","syscalls":["read","not_a_syscall"]}"#,
    )]);
    let err = PolicyRegistry::load(dir.path()).unwrap_err();
    assert_eq!(err.error_code(), ErrorCode::InvalidConfig);
    assert!(err.to_string().contains("not_a_syscall"));
}

#[test]
fn test_file_policy_replaces_builtin() {
    let dir = policy_dir(&[(
        "general.json",
        r#"{"name":"general","mode":"denylist","syscalls":["ptrace"]}"#,
    )]);
    let registry = PolicyRegistry::load(dir.path()).unwrap();
    let general = registry.resolve("general").unwrap();
    assert_eq!(general.syscalls, vec![libc::SYS_ptrace as i64]);
}
