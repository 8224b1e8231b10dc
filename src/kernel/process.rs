//! Process lifecycle primitives: group kill, exit observation, reaping,
//! and `/proc` accounting.

use crate::config::types::{JudgeError, Result};
use std::time::{Duration, Instant};

/// Kernel-reported termination of a reaped child
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReapedStatus {
    pub exit_code: i32,
    pub signal: i32,
    pub cpu_time_ms: u64,
    pub peak_memory_bytes: u64,
}

/// SIGKILL the whole process group led by `pid`, falling back to the pid
/// itself when the group is already gone.
///
/// Returns true when either kill was delivered.
pub fn kill_process_group(pid: libc::pid_t) -> bool {
    // SAFETY: kill with a negative pid targets the process group.
    if unsafe { libc::kill(-pid, libc::SIGKILL) } == 0 {
        return true;
    }
    // SAFETY: plain kill on a pid we have not reaped yet.
    let rc = unsafe { libc::kill(pid, libc::SIGKILL) };
    if rc != 0 {
        log::debug!(
            "SIGKILL fallback for pid {} failed: {}",
            pid,
            std::io::Error::last_os_error()
        );
    }
    rc == 0
}

/// Block until `pid` has exited without reaping it.
///
/// The zombie keeps the pid reserved, so enforcement threads may still
/// signal it safely until [`reap`] runs.
pub fn wait_for_exit(pid: libc::pid_t) -> Result<()> {
    loop {
        // SAFETY: siginfo_t is plain data; waitid fills it on success.
        let mut info: libc::siginfo_t = unsafe { std::mem::zeroed() };
        let rc = unsafe {
            libc::waitid(
                libc::P_PID,
                pid as libc::id_t,
                &mut info,
                libc::WEXITED | libc::WNOWAIT,
            )
        };
        if rc == 0 {
            return Ok(());
        }
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EINTR) {
            continue;
        }
        return Err(JudgeError::Wait(format!("waitid({}) failed: {}", pid, err)));
    }
}

/// Reap `pid` and collect its own resource usage.
pub fn reap(pid: libc::pid_t) -> Result<ReapedStatus> {
    loop {
        let mut status: libc::c_int = 0;
        // SAFETY: rusage is plain data; wait4 fills it on success.
        let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
        let rc = unsafe { libc::wait4(pid, &mut status, 0, &mut usage) };
        if rc == pid {
            return Ok(decode(status, &usage));
        }
        let err = std::io::Error::last_os_error();
        if rc < 0 && err.raw_os_error() == Some(libc::EINTR) {
            continue;
        }
        return Err(JudgeError::Wait(format!("wait4({}) failed: {}", pid, err)));
    }
}

fn timeval_ms(tv: &libc::timeval) -> u64 {
    (tv.tv_sec as u64) * 1000 + (tv.tv_usec as u64) / 1000
}

fn decode(status: libc::c_int, usage: &libc::rusage) -> ReapedStatus {
    let (exit_code, signal) = if libc::WIFSIGNALED(status) {
        (0, libc::WTERMSIG(status))
    } else {
        (libc::WEXITSTATUS(status), 0)
    };
    ReapedStatus {
        exit_code,
        signal,
        cpu_time_ms: timeval_ms(&usage.ru_utime) + timeval_ms(&usage.ru_stime),
        // ru_maxrss is in KiB on Linux
        peak_memory_bytes: (usage.ru_maxrss.max(0) as u64) * 1024,
    }
}

/// Reap whatever is left of the process group `pgid` after it was killed.
///
/// Only works when the judge is a child subreaper (orphans otherwise go to
/// init). Stops at ECHILD or after `grace`. Returns the number reaped.
pub fn reap_group_leftovers(pgid: libc::pid_t, grace: Duration) -> usize {
    let deadline = Instant::now() + grace;
    let mut reaped = 0;
    loop {
        let mut status: libc::c_int = 0;
        // SAFETY: waitpid on a process group we own, non-blocking.
        let rc = unsafe { libc::waitpid(-pgid, &mut status, libc::WNOHANG | libc::__WALL) };
        if rc > 0 {
            reaped += 1;
            continue;
        }
        if rc < 0 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                continue;
            }
            // ECHILD: nothing left in the group
            break;
        }
        if Instant::now() >= deadline {
            log::warn!(
                "process group {} still has live members after {:?}",
                pgid,
                grace
            );
            break;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    reaped
}

/// Mark the calling process as a child subreaper
pub fn become_subreaper() -> Result<()> {
    // SAFETY: prctl with integer arguments only.
    let rc = unsafe { libc::prctl(libc::PR_SET_CHILD_SUBREAPER, 1, 0, 0, 0) };
    if rc != 0 {
        return Err(JudgeError::Io(std::io::Error::last_os_error()));
    }
    Ok(())
}

pub fn is_subreaper() -> bool {
    let mut flag: libc::c_int = 0;
    // SAFETY: PR_GET_CHILD_SUBREAPER writes one int through the pointer.
    let rc = unsafe { libc::prctl(libc::PR_GET_CHILD_SUBREAPER, &mut flag as *mut libc::c_int) };
    rc == 0 && flag != 0
}

fn clock_ticks_per_second() -> u64 {
    // SAFETY: sysconf has no memory arguments.
    let ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    if ticks > 0 {
        ticks as u64
    } else {
        100
    }
}

/// user + system CPU time of `pid` from `/proc/<pid>/stat`, in ms
pub fn cpu_time_ms(pid: libc::pid_t) -> Option<u64> {
    let stat = std::fs::read_to_string(format!("/proc/{}/stat", pid)).ok()?;
    parse_stat_cpu_ticks(&stat).map(|ticks| ticks * 1000 / clock_ticks_per_second())
}

/// utime + stime (fields 14 and 15) of a `/proc/<pid>/stat` line
fn parse_stat_cpu_ticks(stat: &str) -> Option<u64> {
    // comm may contain spaces and parentheses; fields restart after the last ')'
    let rest = &stat[stat.rfind(')')? + 1..];
    let mut fields = rest.split_whitespace();
    // rest starts at field 3 (state); utime is field 14
    let utime: u64 = fields.nth(11)?.parse().ok()?;
    let stime: u64 = fields.next()?.parse().ok()?;
    Some(utime + stime)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_cpu_ticks_with_awkward_comm() {
        let stat = "1234 (my (odd) prog) R 1 1234 1234 0 -1 4194560 100 0 0 0 37 5 0 0 20 0 1 0 100 1000 10";
        assert_eq!(parse_stat_cpu_ticks(stat), Some(42));
    }

    #[test]
    fn truncated_stat_is_none() {
        assert_eq!(parse_stat_cpu_ticks("1 (x) R 1 2"), None);
    }

    #[test]
    fn reads_own_cpu_time() {
        let pid = std::process::id() as libc::pid_t;
        assert!(cpu_time_ms(pid).is_some());
    }

    #[test]
    fn reaps_and_decodes_exit_code() {
        let child = std::process::Command::new("/bin/sh")
            .args(["-c", "exit 3"])
            .spawn();
        let Ok(child) = child else { return };
        let pid = child.id() as libc::pid_t;
        wait_for_exit(pid).unwrap();
        let status = reap(pid).unwrap();
        assert_eq!(status.exit_code, 3);
        assert_eq!(status.signal, 0);
    }

    #[test]
    fn decodes_signal_termination() {
        let child = std::process::Command::new("/bin/sleep").arg("30").spawn();
        let Ok(child) = child else { return };
        let pid = child.id() as libc::pid_t;
        // SAFETY: pid is our unreaped child.
        unsafe { libc::kill(pid, libc::SIGKILL) };
        let status = reap(pid).unwrap();
        assert_eq!(status.signal, libc::SIGKILL);
    }
}
