//! Child setup between `fork` and `execve`
//!
//! The sequence is FIXED:
//! 1. own process group, default signal state
//! 2. stdin/stdout/stderr redirection
//! 3. rlimit set
//! 4. drop to the target uid/gid, then arm the parent-death signal
//! 5. install the syscall filter
//! 6. exec the target
//!
//! The parent-death signal is cleared by any euid/egid change, so it is
//! armed after the drop and followed by a check that the judge is still
//! the parent.
//!
//! Every step runs in a freshly forked child of a possibly multithreaded
//! parent: no allocation, no locks, no logging. Failures are reported to
//! the parent as (error code, errno) and the child exits with status 127.

use crate::config::types::ErrorCode;
use crate::exec::launcher::{LaunchPlan, REPORT_LEN};
use crate::kernel::signal;
use std::marker::PhantomData;
use std::os::fd::{AsRawFd, RawFd};

/// Exit status of a child that failed before exec
pub const SETUP_FAILURE_STATUS: libc::c_int = 127;

/// A failed setup step, sent to the parent over the status pipe
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChildFailure {
    pub code: ErrorCode,
    pub errno: i32,
}

impl ChildFailure {
    fn new(code: ErrorCode, errno: i32) -> Self {
        Self { code, errno }
    }

    fn last_os(code: ErrorCode) -> Self {
        Self::new(code, errno())
    }

    fn encode(&self) -> [u8; REPORT_LEN] {
        let mut buf = [0u8; REPORT_LEN];
        buf[..4].copy_from_slice(&self.code.code().to_ne_bytes());
        buf[4..].copy_from_slice(&self.errno.to_ne_bytes());
        buf
    }
}

fn errno() -> i32 {
    std::io::Error::last_os_error()
        .raw_os_error()
        .unwrap_or(libc::EINVAL)
}

type Step<'a, S> = std::result::Result<ChildSetup<'a, S>, ChildFailure>;

/// Type-state marker: forked, nothing applied yet
pub struct Init;

/// Type-state marker: standard descriptors point at the judge files
pub struct IoRedirected;

/// Type-state marker: rlimits applied
pub struct LimitsSet;

/// Type-state marker: running as the target uid/gid
pub struct PrivilegeDropped;

/// Type-state marker: syscall filter installed, only exec remains
pub struct FilterLoaded;

/// Child process setup with type-state tracking.
///
/// Each step consumes the previous state; only `ChildSetup<FilterLoaded>`
/// can exec, so no ordering mistake compiles.
pub struct ChildSetup<'a, S> {
    plan: &'a LaunchPlan,
    parent: libc::pid_t,
    _state: PhantomData<S>,
}

impl<'a, S> ChildSetup<'a, S> {
    fn advance<T>(self) -> ChildSetup<'a, T> {
        ChildSetup {
            plan: self.plan,
            parent: self.parent,
            _state: PhantomData,
        }
    }
}

impl<'a> ChildSetup<'a, Init> {
    /// Detach into a new process group and reset inherited signal state.
    ///
    /// `parent` is the judge's pid, read before `fork`.
    pub fn begin(plan: &'a LaunchPlan, parent: libc::pid_t) -> Step<'a, Init> {
        // SAFETY: setpgid on ourselves with integer arguments.
        if unsafe { libc::setpgid(0, 0) } != 0 {
            return Err(ChildFailure::last_os(ErrorCode::ForkFailed));
        }
        signal::reset_for_exec().map_err(|e| ChildFailure::new(ErrorCode::ForkFailed, e as i32))?;

        Ok(ChildSetup {
            plan,
            parent,
            _state: PhantomData,
        })
    }

    pub fn redirect_stdio(self) -> Step<'a, IoRedirected> {
        let stdio = &self.plan.stdio;
        let stdout = stdio.stdout.as_raw_fd();
        let stderr = stdio.stderr.as_ref().map_or(stdout, |f| f.as_raw_fd());

        bind_descriptor(stdio.stdin.as_raw_fd(), libc::STDIN_FILENO)?;
        bind_descriptor(stdout, libc::STDOUT_FILENO)?;
        bind_descriptor(stderr, libc::STDERR_FILENO)?;
        Ok(self.advance())
    }
}

/// dup2 `fd` onto `target`, clearing close-on-exec on the result
fn bind_descriptor(fd: RawFd, target: RawFd) -> std::result::Result<(), ChildFailure> {
    if fd == target {
        // dup2 onto itself keeps FD_CLOEXEC; clear it explicitly.
        // SAFETY: fcntl on a descriptor we own.
        if unsafe { libc::fcntl(fd, libc::F_SETFD, 0) } != 0 {
            return Err(ChildFailure::last_os(ErrorCode::Dup2Failed));
        }
        return Ok(());
    }
    loop {
        // SAFETY: both descriptors are valid; dup2 atomically replaces target.
        if unsafe { libc::dup2(fd, target) } >= 0 {
            return Ok(());
        }
        let err = errno();
        if err != libc::EINTR {
            return Err(ChildFailure::new(ErrorCode::Dup2Failed, err));
        }
    }
}

impl<'a> ChildSetup<'a, IoRedirected> {
    pub fn apply_limits(self) -> Step<'a, LimitsSet> {
        self.plan
            .limits
            .apply()
            .map_err(|(_, errno)| ChildFailure::new(ErrorCode::SetrlimitFailed, errno))?;
        Ok(self.advance())
    }
}

impl<'a> ChildSetup<'a, LimitsSet> {
    pub fn drop_privileges(self) -> Step<'a, PrivilegeDropped> {
        if let Some(credentials) = self.plan.credentials {
            credentials
                .apply()
                .map_err(|errno| ChildFailure::new(ErrorCode::SetuidFailed, errno))?;
        }
        signal::kill_on_parent_death()
            .map_err(|e| ChildFailure::new(ErrorCode::SetuidFailed, e as i32))?;
        // The judge may have died before the signal was armed.
        // SAFETY: getppid has no preconditions.
        if unsafe { libc::getppid() } != self.parent {
            return Err(ChildFailure::new(ErrorCode::SetuidFailed, libc::ESRCH));
        }
        Ok(self.advance())
    }
}

impl<'a> ChildSetup<'a, PrivilegeDropped> {
    pub fn load_filter(self) -> Step<'a, FilterLoaded> {
        if let Some(filter) = &self.plan.filter {
            filter
                .install()
                .map_err(|errno| ChildFailure::new(ErrorCode::LoadSeccompFailed, errno))?;
        }
        Ok(self.advance())
    }
}

impl<'a> ChildSetup<'a, FilterLoaded> {
    /// Replace the process image. Returns only on failure.
    pub fn exec(self) -> ChildFailure {
        let plan = self.plan;
        // SAFETY: exe, argv and envp point into CStrings owned by the plan,
        // and both pointer arrays are null-terminated.
        unsafe {
            libc::execve(
                plan.exe.as_ptr(),
                plan.argv_ptrs.as_ptr(),
                plan.envp_ptrs.as_ptr(),
            );
        }
        ChildFailure::last_os(ErrorCode::ExecveFailed)
    }
}

fn setup_and_exec(plan: &LaunchPlan, parent: libc::pid_t) -> ChildFailure {
    let ready = ChildSetup::begin(plan, parent)
        .and_then(|s| s.redirect_stdio())
        .and_then(|s| s.apply_limits())
        .and_then(|s| s.drop_privileges())
        .and_then(|s| s.load_filter());
    match ready {
        Ok(ready) => ready.exec(),
        Err(failure) => failure,
    }
}

fn report(fd: RawFd, failure: &ChildFailure) {
    let buf = failure.encode();
    let mut written = 0;
    while written < buf.len() {
        // SAFETY: writing from a stack buffer into the status pipe.
        let n = unsafe {
            libc::write(
                fd,
                buf[written..].as_ptr() as *const libc::c_void,
                buf.len() - written,
            )
        };
        if n > 0 {
            written += n as usize;
        } else if n < 0 && errno() == libc::EINTR {
            continue;
        } else {
            return;
        }
    }
}

/// Child entry point after `fork`. Never returns.
pub(crate) fn run_child(plan: &LaunchPlan, report_fd: RawFd, parent: libc::pid_t) -> ! {
    let failure = setup_and_exec(plan, parent);
    report(report_fd, &failure);
    // SAFETY: _exit skips atexit handlers and destructors of the parent's
    // state, which this forked copy must not run.
    unsafe { libc::_exit(SETUP_FAILURE_STATUS) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_report_layout() {
        let failure = ChildFailure::new(ErrorCode::SetuidFailed, libc::EPERM);
        let buf = failure.encode();
        assert_eq!(i32::from_ne_bytes([buf[0], buf[1], buf[2], buf[3]]), -9);
        assert_eq!(
            i32::from_ne_bytes([buf[4], buf[5], buf[6], buf[7]]),
            libc::EPERM
        );
    }
}
