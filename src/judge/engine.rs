use crate::config::types::{JudgeConfig, Result};
use crate::core::monitor::{self, MonitorSettings, WatchTargets};
use crate::core::types::RawTermination;
use crate::exec::launcher::{self, LaunchPlan};
use crate::kernel::seccomp::{CompiledPolicy, SandboxPolicy};
use std::time::Instant;

/// Enforcement engine behind a [`crate::Judge`].
///
/// Implementations spawn the process described by a validated request,
/// police it, and hand back raw evidence. They never classify.
pub trait SandboxEngine: Send + Sync {
    fn name(&self) -> &'static str;

    /// Confinement mechanism used for syscall policies
    fn confinement(&self) -> &'static str;

    fn run(&self, config: &JudgeConfig, policy: Option<&CompiledPolicy>) -> RawTermination;
}

/// fork/exec engine: rlimits, credentials and seccomp in the child, the
/// resource monitor in the parent
pub struct NativeEngine {
    confinement: Box<dyn SandboxPolicy>,
    settings: MonitorSettings,
}

impl NativeEngine {
    pub fn new(confinement: Box<dyn SandboxPolicy>, settings: MonitorSettings) -> Self {
        Self {
            confinement,
            settings,
        }
    }

    fn launch_and_supervise(
        &self,
        config: &JudgeConfig,
        policy: Option<&CompiledPolicy>,
    ) -> Result<RawTermination> {
        let plan = LaunchPlan::prepare(config, policy, self.confinement.as_ref())?;
        if let Some(filter) = &plan.filter {
            log::debug!(
                "launching {:?} under policy {} ({} BPF instructions)",
                config.exe_path,
                filter.policy_name(),
                filter.instruction_count()
            );
        }
        let child = launcher::spawn(&plan)?;
        monitor::supervise(child, &WatchTargets::from_config(config), &self.settings)
    }
}

impl SandboxEngine for NativeEngine {
    fn name(&self) -> &'static str {
        "native"
    }

    fn confinement(&self) -> &'static str {
        self.confinement.name()
    }

    fn run(&self, config: &JudgeConfig, policy: Option<&CompiledPolicy>) -> RawTermination {
        let started = Instant::now();
        match self.launch_and_supervise(config, policy) {
            Ok(raw) => raw,
            Err(e) => {
                log::error!("launch of {:?} failed: {}", config.exe_path, e);
                RawTermination::failed(&e, started.elapsed().as_millis() as u64)
            }
        }
    }
}
