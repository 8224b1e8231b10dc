/// Built-in syscall policy presets
///
/// Each preset is a declarative description: a filter mode, the syscall
/// names it lists, and two argument restrictions shared by every preset.
/// The registry turns these into compiled policies at startup.
use serde::{Deserialize, Serialize};

/// How the syscall list of a policy is interpreted
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FilterMode {
    /// Only the listed syscalls are allowed
    Allowlist,
    /// The listed syscalls kill the process, everything else is allowed
    Denylist,
}

/// Policy description, as written in a policy file or built in
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PolicySpec {
    pub name: String,
    pub mode: FilterMode,
    pub syscalls: Vec<String>,
    /// Only allow `open`/`openat` without O_WRONLY or O_RDWR
    #[serde(default = "enabled")]
    pub read_only_open: bool,
    /// Only allow `execve` of the judged executable itself
    #[serde(default = "enabled")]
    pub restrict_execve: bool,
}

fn enabled() -> bool {
    true
}

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

// Syscalls a statically or dynamically linked C/C++ program needs from
// exec through exit. Names missing on the host architecture are skipped.
const C_CPP_SYSCALLS: &[&str] = &[
    "read",
    "write",
    "readv",
    "writev",
    "pread64",
    "lseek",
    "close",
    "fstat",
    "newfstatat",
    "statx",
    "stat",
    "lstat",
    "mmap",
    "mprotect",
    "munmap",
    "mremap",
    "madvise",
    "brk",
    "arch_prctl",
    "access",
    "faccessat",
    "readlink",
    "readlinkat",
    "uname",
    "sysinfo",
    "getrandom",
    "ioctl",
    "fcntl",
    "rt_sigaction",
    "rt_sigprocmask",
    "rt_sigreturn",
    "sigaltstack",
    "clock_gettime",
    "clock_getres",
    "clock_nanosleep",
    "nanosleep",
    "gettimeofday",
    "getpid",
    "gettid",
    "getuid",
    "geteuid",
    "getgid",
    "getegid",
    "futex",
    "set_tid_address",
    "set_robust_list",
    "rseq",
    "prlimit64",
    "getrlimit",
    "exit",
    "exit_group",
];

const FILE_IO_SYSCALLS: &[&str] = &[
    "ftruncate",
    "fsync",
    "unlink",
    "unlinkat",
    "mkdir",
    "mkdirat",
    "rename",
    "renameat",
    "dup",
    "dup2",
    "dup3",
    "getdents64",
];

// Syscalls an interpreted runtime must never reach.
const GENERAL_DENIED: &[&str] = &[
    "clone",
    "clone3",
    "fork",
    "vfork",
    "kill",
    "execveat",
    "ptrace",
    "socket",
    "socketpair",
    "connect",
    "bind",
    "listen",
    "accept",
    "accept4",
    "mount",
    "umount2",
    "chroot",
    "setuid",
    "setgid",
];

/// C/C++ allowlist with read-only file access
pub fn c_cpp() -> PolicySpec {
    let mut syscalls = names(C_CPP_SYSCALLS);
    syscalls.push("execve".to_string());
    PolicySpec {
        name: "c_cpp".to_string(),
        mode: FilterMode::Allowlist,
        syscalls,
        read_only_open: true,
        restrict_execve: true,
    }
}

/// C/C++ allowlist that may also create and write files
pub fn c_cpp_file_io() -> PolicySpec {
    let mut spec = c_cpp();
    spec.name = "c_cpp_file_io".to_string();
    spec.syscalls.extend(names(FILE_IO_SYSCALLS));
    spec.read_only_open = false;
    spec
}

/// Denylist for interpreters and other runtimes with large syscall surfaces.
///
/// Sockets are denied, so anything that falls back to an NSS lookup dies
/// with SIGSYS. CPython does this for the home directory when `HOME` is
/// unset: requests running Python under this policy should pass `HOME`.
pub fn general() -> PolicySpec {
    PolicySpec {
        name: "general".to_string(),
        mode: FilterMode::Denylist,
        syscalls: names(GENERAL_DENIED),
        read_only_open: true,
        restrict_execve: true,
    }
}

/// `general`, except that the runtime may start threads
pub fn golang() -> PolicySpec {
    let mut spec = general();
    spec.name = "golang".to_string();
    spec.syscalls.retain(|name| name != "clone" && name != "clone3");
    spec
}

/// All built-in presets in registration order
pub fn builtin_presets() -> Vec<PolicySpec> {
    vec![c_cpp(), c_cpp_file_io(), general(), golang()]
}
