//! Parent side of a launch.
//!
//! Everything the child needs is prepared here, before `fork`, so that the
//! child only issues raw syscalls: C strings and pointer arrays, opened
//! stdio files, the rlimit set, the credential plan, and the BPF program.
//! The child reports setup failures back over a close-on-exec pipe.

use crate::config::types::{ErrorCode, JudgeConfig, JudgeError, Result};
use crate::exec::preexec;
use crate::kernel::credentials::{self, CredentialPlan};
use crate::kernel::process;
use crate::kernel::rlimit::RlimitSet;
use crate::kernel::seccomp::{CompiledPolicy, PreparedFilter, SandboxPolicy};
use nix::unistd::{ForkResult, Pid};
use std::ffi::CString;
use std::fs::{File, OpenOptions};
use std::io::Read;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::time::Instant;

const NULL_DEVICE: &str = "/dev/null";

/// Size of a child failure report: error code then errno, both i32
pub(crate) const REPORT_LEN: usize = 8;

/// Files bound to the child's standard descriptors
pub(crate) struct StdioFiles {
    pub(crate) stdin: File,
    pub(crate) stdout: File,
    /// `None` when stderr shares the stdout file
    pub(crate) stderr: Option<File>,
}

/// Everything one child needs between `fork` and `execve`
pub struct LaunchPlan {
    pub(crate) exe: CString,
    _argv: Vec<CString>,
    _envp: Vec<CString>,
    pub(crate) argv_ptrs: Vec<*const libc::c_char>,
    pub(crate) envp_ptrs: Vec<*const libc::c_char>,
    pub(crate) stdio: StdioFiles,
    pub(crate) limits: RlimitSet,
    pub(crate) credentials: Option<CredentialPlan>,
    pub(crate) filter: Option<PreparedFilter>,
}

fn c_string(what: &str, bytes: &[u8]) -> Result<CString> {
    CString::new(bytes).map_err(|_| JudgeError::Config(format!("{} contains a NUL byte", what)))
}

fn null_terminated(strings: &[CString]) -> Vec<*const libc::c_char> {
    strings
        .iter()
        .map(|s| s.as_ptr())
        .chain(std::iter::once(std::ptr::null()))
        .collect()
}

fn open_input(path: Option<&Path>) -> Result<File> {
    let path = path.unwrap_or_else(|| Path::new(NULL_DEVICE));
    File::open(path)
        .map_err(|e| JudgeError::Redirect(format!("cannot open input {}: {}", path.display(), e)))
}

fn open_output(path: Option<&Path>) -> Result<File> {
    let Some(path) = path else {
        return OpenOptions::new()
            .write(true)
            .open(NULL_DEVICE)
            .map_err(|e| JudgeError::Redirect(format!("cannot open {}: {}", NULL_DEVICE, e)));
    };
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o644)
        .open(path)
        .map_err(|e| JudgeError::Redirect(format!("cannot open output {}: {}", path.display(), e)))
}

impl LaunchPlan {
    /// Prepare a launch of `config`, optionally confined by `policy`.
    pub fn prepare(
        config: &JudgeConfig,
        policy: Option<&CompiledPolicy>,
        confinement: &dyn SandboxPolicy,
    ) -> Result<Self> {
        let credentials = credentials::plan_transition(config.uid, config.gid)?;

        let exe = c_string("exe_path", config.exe_path.as_os_str().as_bytes())?;
        let mut argv = Vec::with_capacity(config.args.len() + 1);
        argv.push(exe.clone());
        for arg in &config.args {
            argv.push(c_string("argument", arg.as_bytes())?);
        }
        let envp = config
            .env
            .iter()
            .map(|entry| c_string("environment entry", entry.as_bytes()))
            .collect::<Result<Vec<_>>>()?;
        let argv_ptrs = null_terminated(&argv);
        let envp_ptrs = null_terminated(&envp);

        let stdin = open_input(config.input_path.as_deref())?;
        let stdout = open_output(config.output_path.as_deref())?;
        let stderr = if config.shares_output_file() {
            None
        } else {
            Some(open_output(config.error_path.as_deref())?)
        };

        let filter = match policy {
            Some(policy) => Some(confinement.prepare(policy, &exe)?),
            None => None,
        };

        Ok(Self {
            exe,
            _argv: argv,
            _envp: envp,
            argv_ptrs,
            envp_ptrs,
            stdio: StdioFiles {
                stdin,
                stdout,
                stderr,
            },
            limits: RlimitSet::from_config(config),
            credentials,
            filter,
        })
    }

    pub fn filter_name(&self) -> Option<&str> {
        self.filter.as_ref().map(|f| f.policy_name())
    }
}

/// A child that passed every setup step and is running the target
#[derive(Debug, Clone, Copy)]
pub struct SpawnedChild {
    pub pid: Pid,
    /// Taken just before `fork`; the wall clock runs from here
    pub started: Instant,
}

fn status_pipe() -> Result<(OwnedFd, OwnedFd)> {
    let mut fds: [RawFd; 2] = [-1; 2];
    // SAFETY: pipe2 writes two descriptors into the array on success.
    let rc = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) };
    if rc != 0 {
        return Err(JudgeError::Fork(format!(
            "cannot create status pipe: {}",
            std::io::Error::last_os_error()
        )));
    }
    // SAFETY: both descriptors were just created and are owned by nobody else.
    Ok(unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) })
}

/// Read the child's report: `None` on EOF (exec succeeded)
fn read_report(read_end: OwnedFd) -> std::io::Result<Option<(i32, i32)>> {
    let mut file = File::from(read_end);
    let mut buf = [0u8; REPORT_LEN];
    let mut filled = 0;
    while filled < REPORT_LEN {
        match file.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    match filled {
        0 => Ok(None),
        REPORT_LEN => {
            let code = i32::from_ne_bytes([buf[0], buf[1], buf[2], buf[3]]);
            let errno = i32::from_ne_bytes([buf[4], buf[5], buf[6], buf[7]]);
            Ok(Some((code, errno)))
        }
        n => Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!("truncated child report ({} bytes)", n),
        )),
    }
}

/// Fork and run the child setup chain; returns once the target is exec'd.
///
/// A setup failure in the child is returned as the matching error after
/// the child has been reaped.
pub fn spawn(plan: &LaunchPlan) -> Result<SpawnedChild> {
    let (read_end, write_end) = status_pipe()?;
    let parent = nix::unistd::getpid().as_raw();
    let started = Instant::now();

    // SAFETY: the child branch only runs preexec::run_child, which makes
    // async-signal-safe syscalls and never returns.
    let fork_result = unsafe { nix::unistd::fork() }
        .map_err(|e| JudgeError::Fork(format!("fork failed: {}", e)))?;

    let pid = match fork_result {
        ForkResult::Child => preexec::run_child(plan, write_end.as_raw_fd(), parent),
        ForkResult::Parent { child } => child,
    };
    drop(write_end);

    // Closes the race with the child's own setpgid(0, 0).
    let _ = nix::unistd::setpgid(pid, pid);

    match read_report(read_end) {
        Ok(None) => {
            log::debug!("child {} exec'd {:?}", pid, plan.exe);
            Ok(SpawnedChild { pid, started })
        }
        Ok(Some((code, errno))) => {
            let _ = process::reap(pid.as_raw());
            let code = ErrorCode::from_code(code).unwrap_or(ErrorCode::ForkFailed);
            Err(JudgeError::from_child_report(code, errno))
        }
        Err(e) => {
            process::kill_process_group(pid.as_raw());
            let _ = process::reap(pid.as_raw());
            Err(JudgeError::Wait(format!("cannot read child status: {}", e)))
        }
    }
}
