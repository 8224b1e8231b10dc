//! Syscall name to number resolution for the host architecture.

const COMMON: &[(&str, libc::c_long)] = &[
    ("read", libc::SYS_read),
    ("write", libc::SYS_write),
    ("readv", libc::SYS_readv),
    ("writev", libc::SYS_writev),
    ("pread64", libc::SYS_pread64),
    ("pwrite64", libc::SYS_pwrite64),
    ("lseek", libc::SYS_lseek),
    ("close", libc::SYS_close),
    ("fstat", libc::SYS_fstat),
    ("statx", libc::SYS_statx),
    ("mmap", libc::SYS_mmap),
    ("mprotect", libc::SYS_mprotect),
    ("munmap", libc::SYS_munmap),
    ("mremap", libc::SYS_mremap),
    ("madvise", libc::SYS_madvise),
    ("brk", libc::SYS_brk),
    ("faccessat", libc::SYS_faccessat),
    ("readlinkat", libc::SYS_readlinkat),
    ("openat", libc::SYS_openat),
    ("uname", libc::SYS_uname),
    ("sysinfo", libc::SYS_sysinfo),
    ("getrandom", libc::SYS_getrandom),
    ("ioctl", libc::SYS_ioctl),
    ("fcntl", libc::SYS_fcntl),
    ("rt_sigaction", libc::SYS_rt_sigaction),
    ("rt_sigprocmask", libc::SYS_rt_sigprocmask),
    ("rt_sigreturn", libc::SYS_rt_sigreturn),
    ("sigaltstack", libc::SYS_sigaltstack),
    ("clock_gettime", libc::SYS_clock_gettime),
    ("clock_getres", libc::SYS_clock_getres),
    ("clock_nanosleep", libc::SYS_clock_nanosleep),
    ("nanosleep", libc::SYS_nanosleep),
    ("gettimeofday", libc::SYS_gettimeofday),
    ("getpid", libc::SYS_getpid),
    ("getppid", libc::SYS_getppid),
    ("gettid", libc::SYS_gettid),
    ("getuid", libc::SYS_getuid),
    ("geteuid", libc::SYS_geteuid),
    ("getgid", libc::SYS_getgid),
    ("getegid", libc::SYS_getegid),
    ("futex", libc::SYS_futex),
    ("set_tid_address", libc::SYS_set_tid_address),
    ("set_robust_list", libc::SYS_set_robust_list),
    ("prlimit64", libc::SYS_prlimit64),
    ("getrlimit", libc::SYS_getrlimit),
    ("setrlimit", libc::SYS_setrlimit),
    ("exit", libc::SYS_exit),
    ("exit_group", libc::SYS_exit_group),
    ("execve", libc::SYS_execve),
    ("execveat", libc::SYS_execveat),
    ("clone", libc::SYS_clone),
    ("wait4", libc::SYS_wait4),
    ("kill", libc::SYS_kill),
    ("tkill", libc::SYS_tkill),
    ("tgkill", libc::SYS_tgkill),
    ("ptrace", libc::SYS_ptrace),
    ("socket", libc::SYS_socket),
    ("socketpair", libc::SYS_socketpair),
    ("connect", libc::SYS_connect),
    ("bind", libc::SYS_bind),
    ("listen", libc::SYS_listen),
    ("accept", libc::SYS_accept),
    ("accept4", libc::SYS_accept4),
    ("sendto", libc::SYS_sendto),
    ("recvfrom", libc::SYS_recvfrom),
    ("mount", libc::SYS_mount),
    ("umount2", libc::SYS_umount2),
    ("chroot", libc::SYS_chroot),
    ("setuid", libc::SYS_setuid),
    ("setgid", libc::SYS_setgid),
    ("setpgid", libc::SYS_setpgid),
    ("setsid", libc::SYS_setsid),
    ("ftruncate", libc::SYS_ftruncate),
    ("fsync", libc::SYS_fsync),
    ("unlinkat", libc::SYS_unlinkat),
    ("mkdirat", libc::SYS_mkdirat),
    ("renameat", libc::SYS_renameat),
    ("dup", libc::SYS_dup),
    ("dup3", libc::SYS_dup3),
    ("pipe2", libc::SYS_pipe2),
    ("getdents64", libc::SYS_getdents64),
    ("getcwd", libc::SYS_getcwd),
    ("chdir", libc::SYS_chdir),
    ("sched_yield", libc::SYS_sched_yield),
    ("sched_getaffinity", libc::SYS_sched_getaffinity),
    ("ppoll", libc::SYS_ppoll),
    ("pselect6", libc::SYS_pselect6),
    ("epoll_create1", libc::SYS_epoll_create1),
    ("epoll_ctl", libc::SYS_epoll_ctl),
    ("epoll_pwait", libc::SYS_epoll_pwait),
    ("eventfd2", libc::SYS_eventfd2),
    ("memfd_create", libc::SYS_memfd_create),
];

#[cfg(target_arch = "x86_64")]
const ARCH_SPECIFIC: &[(&str, libc::c_long)] = &[
    ("open", libc::SYS_open),
    ("stat", libc::SYS_stat),
    ("lstat", libc::SYS_lstat),
    ("newfstatat", libc::SYS_newfstatat),
    ("access", libc::SYS_access),
    ("readlink", libc::SYS_readlink),
    ("arch_prctl", libc::SYS_arch_prctl),
    ("fork", libc::SYS_fork),
    ("vfork", libc::SYS_vfork),
    ("clone3", libc::SYS_clone3),
    ("rseq", libc::SYS_rseq),
    ("pipe", libc::SYS_pipe),
    ("poll", libc::SYS_poll),
    ("select", libc::SYS_select),
    ("dup2", libc::SYS_dup2),
    ("unlink", libc::SYS_unlink),
    ("mkdir", libc::SYS_mkdir),
    ("rename", libc::SYS_rename),
    ("epoll_wait", libc::SYS_epoll_wait),
];

#[cfg(not(target_arch = "x86_64"))]
const ARCH_SPECIFIC: &[(&str, libc::c_long)] = &[];

/// Resolve a syscall name, `None` when the host architecture has no such call
pub fn syscall_number(name: &str) -> Option<i64> {
    COMMON
        .iter()
        .chain(ARCH_SPECIFIC.iter())
        .find(|(candidate, _)| *candidate == name)
        .map(|(_, nr)| *nr as i64)
}

/// Numbers of the open-like syscalls and the index of their flags argument
pub fn open_syscalls() -> Vec<(i64, u8)> {
    let mut calls = vec![(libc::SYS_openat as i64, 2)];
    #[cfg(target_arch = "x86_64")]
    calls.push((libc::SYS_open as i64, 1));
    calls
}
