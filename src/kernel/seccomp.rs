// Syscall filtering
// Policies are compiled to syscall numbers once, at registry load. The
// BPF program itself is built per launch because execve is pinned to the
// address of that launch's executable path.

use crate::config::presets::{FilterMode, PolicySpec};
use crate::config::types::{JudgeError, Result};
use crate::kernel::syscalls::{open_syscalls, syscall_number};
#[cfg(target_arch = "x86_64")]
use seccompiler::sock_filter;
use seccompiler::{
    BpfProgram, SeccompAction, SeccompCmpArgLen, SeccompCmpOp, SeccompCondition, SeccompFilter,
    SeccompRule, TargetArch,
};
use std::collections::BTreeMap;
use std::ffi::CStr;
use std::path::Path;

/// A policy with every syscall name resolved for the host architecture
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledPolicy {
    pub name: String,
    pub mode: FilterMode,
    pub syscalls: Vec<i64>,
    pub read_only_open: bool,
    pub restrict_execve: bool,
}

impl CompiledPolicy {
    /// Resolve the names of `spec`.
    ///
    /// With `strict_names`, a name unknown on this architecture is an
    /// error; otherwise it is skipped (built-in presets list names from
    /// several architectures).
    pub fn compile(spec: &PolicySpec, strict_names: bool) -> Result<Self> {
        if spec.name.is_empty() {
            return Err(JudgeError::Config("policy name must not be empty".to_string()));
        }

        let mut syscalls = Vec::with_capacity(spec.syscalls.len());
        for name in &spec.syscalls {
            match syscall_number(name) {
                Some(nr) => syscalls.push(nr),
                None if strict_names => {
                    return Err(JudgeError::Config(format!(
                        "policy {}: unknown syscall '{}' on {}",
                        spec.name,
                        name,
                        std::env::consts::ARCH
                    )));
                }
                None => log::debug!(
                    "policy {}: skipping '{}', not available on {}",
                    spec.name,
                    name,
                    std::env::consts::ARCH
                ),
            }
        }
        syscalls.sort_unstable();
        syscalls.dedup();

        Ok(Self {
            name: spec.name.clone(),
            mode: spec.mode,
            syscalls,
            read_only_open: spec.read_only_open,
            restrict_execve: spec.restrict_execve,
        })
    }

    /// (mismatch action, match action)
    fn actions(&self) -> (SeccompAction, SeccompAction) {
        match self.mode {
            FilterMode::Allowlist => (SeccompAction::KillProcess, SeccompAction::Allow),
            FilterMode::Denylist => (SeccompAction::Allow, SeccompAction::KillProcess),
        }
    }

    /// Rule map for one launch; `exe_ptr` is the address the child passes
    /// to execve as its path argument
    pub fn rules(&self, exe_ptr: u64) -> Result<BTreeMap<i64, Vec<SeccompRule>>> {
        let execve = libc::SYS_execve as i64;
        let opens = open_syscalls();
        let is_open = |nr: i64| opens.iter().any(|(open_nr, _)| *open_nr == nr);

        let mut rules: BTreeMap<i64, Vec<SeccompRule>> = BTreeMap::new();
        match self.mode {
            FilterMode::Allowlist => {
                for &nr in &self.syscalls {
                    if nr == execve || is_open(nr) {
                        continue;
                    }
                    rules.entry(nr).or_default();
                }
                // The judged program must always be able to exec and load
                // its libraries.
                if self.restrict_execve {
                    rules.insert(execve, vec![rule(vec![path_is(exe_ptr, SeccompCmpOp::Eq)?])?]);
                } else {
                    rules.entry(execve).or_default();
                }
                for (nr, flags_arg) in opens {
                    if self.read_only_open {
                        let read_only = condition(
                            flags_arg,
                            SeccompCmpOp::MaskedEq((libc::O_WRONLY | libc::O_RDWR) as u64),
                            0,
                        )?;
                        rules.insert(nr, vec![rule(vec![read_only])?]);
                    } else {
                        rules.entry(nr).or_default();
                    }
                }
            }
            FilterMode::Denylist => {
                for &nr in &self.syscalls {
                    rules.entry(nr).or_default();
                }
                if self.restrict_execve && !rules.contains_key(&execve) {
                    rules.insert(execve, vec![rule(vec![path_is(exe_ptr, SeccompCmpOp::Ne)?])?]);
                }
                if self.read_only_open {
                    for (nr, flags_arg) in opens {
                        if rules.contains_key(&nr) {
                            continue;
                        }
                        let write_only = condition(
                            flags_arg,
                            SeccompCmpOp::MaskedEq(libc::O_WRONLY as u64),
                            libc::O_WRONLY as u64,
                        )?;
                        let read_write = condition(
                            flags_arg,
                            SeccompCmpOp::MaskedEq(libc::O_RDWR as u64),
                            libc::O_RDWR as u64,
                        )?;
                        rules.insert(nr, vec![rule(vec![write_only])?, rule(vec![read_write])?]);
                    }
                }
            }
        }
        Ok(rules)
    }
}

fn condition(arg: u8, op: SeccompCmpOp, value: u64) -> Result<SeccompCondition> {
    SeccompCondition::new(arg, SeccompCmpArgLen::Dword, op, value)
        .map_err(|e| JudgeError::Seccomp(format!("invalid condition on arg {}: {}", arg, e)))
}

fn path_is(exe_ptr: u64, op: SeccompCmpOp) -> Result<SeccompCondition> {
    SeccompCondition::new(0, SeccompCmpArgLen::Qword, op, exe_ptr)
        .map_err(|e| JudgeError::Seccomp(format!("invalid execve condition: {}", e)))
}

fn rule(conditions: Vec<SeccompCondition>) -> Result<SeccompRule> {
    SeccompRule::new(conditions).map_err(|e| JudgeError::Seccomp(e.to_string()))
}

// x86_64 kernels also accept x32 syscalls: the same AUDIT_ARCH value with
// bit 30 set in the number. A rule keyed on the plain number never sees
// them, so anything at or above the x32 base is killed first.
#[cfg(target_arch = "x86_64")]
const X32_SYSCALL_BIT: u32 = 0x4000_0000;

#[cfg(target_arch = "x86_64")]
fn x32_guard() -> [sock_filter; 3] {
    const BPF_LD_W_ABS: u16 = 0x20;
    const BPF_JGE_K: u16 = 0x35;
    const BPF_RET_K: u16 = 0x06;
    const SECCOMP_DATA_NR_OFFSET: u32 = 0;
    const SECCOMP_RET_KILL_PROCESS: u32 = 0x8000_0000;

    let insn = |code, jt, jf, k| sock_filter { code, jt, jf, k };
    [
        insn(BPF_LD_W_ABS, 0, 0, SECCOMP_DATA_NR_OFFSET),
        insn(BPF_JGE_K, 0, 1, X32_SYSCALL_BIT),
        insn(BPF_RET_K, 0, 0, SECCOMP_RET_KILL_PROCESS),
    ]
}

/// Prefix `program` with the architecture-specific guards
fn guarded(program: BpfProgram) -> BpfProgram {
    #[cfg(target_arch = "x86_64")]
    {
        let mut full = x32_guard().to_vec();
        full.extend(program);
        full
    }
    #[cfg(not(target_arch = "x86_64"))]
    {
        program
    }
}

/// A BPF program ready to be installed by the child
pub struct PreparedFilter {
    policy_name: String,
    program: BpfProgram,
}

impl PreparedFilter {
    pub fn policy_name(&self) -> &str {
        &self.policy_name
    }

    pub fn instruction_count(&self) -> usize {
        self.program.len()
    }

    /// Set NO_NEW_PRIVS and load the program. Child-safe.
    pub fn install(&self) -> std::result::Result<(), i32> {
        seccompiler::apply_filter(&self.program).map_err(|_| {
            std::io::Error::last_os_error()
                .raw_os_error()
                .unwrap_or(libc::EINVAL)
        })
    }
}

/// OS-specific confinement mechanism, selected once at startup
pub trait SandboxPolicy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Build the filter for one launch of `exe`
    fn prepare(&self, policy: &CompiledPolicy, exe: &CStr) -> Result<PreparedFilter>;
}

/// seccomp-BPF confinement
pub struct LinuxSeccomp {
    arch: TargetArch,
}

impl LinuxSeccomp {
    /// Available when the kernel exposes seccomp and seccompiler knows the
    /// host architecture
    pub fn detect() -> Option<Self> {
        if !is_seccomp_supported() {
            return None;
        }
        TargetArch::try_from(std::env::consts::ARCH)
            .ok()
            .map(|arch| Self { arch })
    }
}

impl SandboxPolicy for LinuxSeccomp {
    fn name(&self) -> &'static str {
        "seccomp-bpf"
    }

    fn prepare(&self, policy: &CompiledPolicy, exe: &CStr) -> Result<PreparedFilter> {
        let rules = policy.rules(exe.as_ptr() as u64)?;
        let (mismatch_action, match_action) = policy.actions();
        let filter = SeccompFilter::new(rules, mismatch_action, match_action, self.arch.clone())
            .map_err(|e| JudgeError::Seccomp(format!("policy {}: {}", policy.name, e)))?;
        let program = BpfProgram::try_from(filter)
            .map_err(|e| JudgeError::Seccomp(format!("policy {}: {}", policy.name, e)))?;
        Ok(PreparedFilter {
            policy_name: policy.name.clone(),
            program: guarded(program),
        })
    }
}

/// Fallback when syscall filtering is unavailable: runs without a filter
/// are allowed, requests for one fail
pub struct Unconfined;

impl SandboxPolicy for Unconfined {
    fn name(&self) -> &'static str {
        "unconfined"
    }

    fn prepare(&self, policy: &CompiledPolicy, _exe: &CStr) -> Result<PreparedFilter> {
        Err(JudgeError::Seccomp(format!(
            "policy {} requested but syscall filtering is unavailable on this host",
            policy.name
        )))
    }
}

/// Check if seccomp is supported by the running kernel
pub fn is_seccomp_supported() -> bool {
    Path::new("/proc/sys/kernel/seccomp").exists()
        || std::fs::read_to_string("/proc/self/status")
            .map(|status| status.lines().any(|line| line.starts_with("Seccomp:")))
            .unwrap_or(false)
}

/// Pick the strongest confinement the host supports
pub fn detect_confinement() -> Box<dyn SandboxPolicy> {
    match LinuxSeccomp::detect() {
        Some(seccomp) => Box::new(seccomp),
        None => {
            log::warn!("seccomp unavailable, syscall policies cannot be enforced on this host");
            Box::new(Unconfined)
        }
    }
}
