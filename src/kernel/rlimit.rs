//! Resource limits applied to the judged process.
//!
//! The set is computed in the parent from a [`JudgeConfig`] and applied in
//! the child with plain `setrlimit` calls.

use crate::config::types::JudgeConfig;

#[cfg(all(target_os = "linux", target_env = "gnu"))]
type Resource = libc::__rlimit_resource_t;
#[cfg(not(all(target_os = "linux", target_env = "gnu")))]
type Resource = libc::c_int;

/// One `setrlimit` call
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rlimit {
    pub name: &'static str,
    pub resource: Resource,
    pub soft: u64,
    pub hard: u64,
}

/// The full limit set for one launch
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RlimitSet {
    limits: [Rlimit; 6],
}

/// RLIMIT_CPU soft limit in whole seconds, rounded up so that polling can
/// catch the overrun first
pub fn cpu_limit_seconds(max_cpu_time_ms: u64) -> u64 {
    max_cpu_time_ms.div_ceil(1000).max(1)
}

impl RlimitSet {
    pub fn from_config(config: &JudgeConfig) -> Self {
        let cpu_secs = cpu_limit_seconds(config.max_cpu_time);
        let limits = [
            Rlimit {
                name: "RLIMIT_AS",
                resource: libc::RLIMIT_AS,
                soft: config.max_memory,
                hard: config.max_memory,
            },
            Rlimit {
                name: "RLIMIT_STACK",
                resource: libc::RLIMIT_STACK,
                soft: config.max_stack,
                hard: config.max_stack,
            },
            Rlimit {
                name: "RLIMIT_NPROC",
                resource: libc::RLIMIT_NPROC,
                soft: config.max_process_number,
                hard: config.max_process_number,
            },
            // soft = ceil(secs) -> SIGXCPU, hard = soft + 1 -> SIGKILL
            Rlimit {
                name: "RLIMIT_CPU",
                resource: libc::RLIMIT_CPU,
                soft: cpu_secs,
                hard: cpu_secs + 1,
            },
            Rlimit {
                name: "RLIMIT_FSIZE",
                resource: libc::RLIMIT_FSIZE,
                soft: config.max_output_size,
                hard: config.max_output_size,
            },
            Rlimit {
                name: "RLIMIT_CORE",
                resource: libc::RLIMIT_CORE,
                soft: 0,
                hard: 0,
            },
        ];
        Self { limits }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rlimit> {
        self.limits.iter()
    }

    /// Apply every limit to the calling process. Child-safe.
    ///
    /// Returns the failing limit and errno on the first failure.
    pub fn apply(&self) -> std::result::Result<(), (&'static str, i32)> {
        for limit in &self.limits {
            apply_rlimit_value(limit).map_err(|errno| (limit.name, errno))?;
        }
        Ok(())
    }
}

fn apply_rlimit_value(limit: &Rlimit) -> std::result::Result<(), i32> {
    let value = libc::rlimit {
        rlim_cur: limit.soft as libc::rlim_t,
        rlim_max: limit.hard as libc::rlim_t,
    };

    // SAFETY: setrlimit only reads the rlimit struct we pass by reference.
    let rc = unsafe { libc::setrlimit(limit.resource, &value) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error()
            .raw_os_error()
            .unwrap_or(libc::EPERM))
    }
}
