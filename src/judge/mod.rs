//! Judge facade
//!
//! Wires validation, policy lookup, the enforcement engine, classification
//! and the run log into a single synchronous `launch` call.

pub mod engine;
pub mod registry;

use crate::config::types::{ErrorCode, JudgeConfig, JudgeResult};
use crate::config::validator::validate_config;
use crate::core::monitor::MonitorSettings;
use crate::kernel::{process, signal};
use crate::kernel::seccomp::{detect_confinement, SandboxPolicy};
use crate::observability::run_log::{RunEvent, RunLog};
use crate::verdict::classifier::classify;
use engine::{NativeEngine, SandboxEngine};
use registry::PolicyRegistry;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

/// A configured judge. Cheap to share; `launch` may be called from many
/// threads at once.
pub struct Judge {
    registry: Arc<PolicyRegistry>,
    engine: Box<dyn SandboxEngine>,
}

impl Judge {
    /// Judge with the native engine and the best confinement the host has
    pub fn new(registry: Arc<PolicyRegistry>) -> Self {
        Self::builder().registry(registry).build()
    }

    pub fn builder() -> JudgeBuilder {
        JudgeBuilder::default()
    }

    pub fn registry(&self) -> &PolicyRegistry {
        &self.registry
    }

    pub fn engine_name(&self) -> &'static str {
        self.engine.name()
    }

    pub fn confinement(&self) -> &'static str {
        self.engine.confinement()
    }

    /// Run one request to completion and classify it.
    ///
    /// Always returns a result; infrastructure problems are reported in
    /// `error` with `result` set to SYSTEM_ERROR.
    pub fn launch(&self, config: &JudgeConfig) -> JudgeResult {
        let mut run_log = RunLog::open(config.log_path.as_deref());

        if let Err(e) = validate_config(config, &self.registry) {
            log::error!("rejected request for {:?}: {}", config.exe_path, e);
            return Self::reject(&mut run_log, e.error_code(), &e.to_string());
        }

        let policy = match config.seccomp_rule_name.as_deref() {
            Some(name) => match self.registry.resolve(name) {
                Ok(policy) => Some(policy),
                Err(e) => return Self::reject(&mut run_log, e.error_code(), &e.to_string()),
            },
            None => None,
        };

        run_log.record(RunEvent::Launch {
            exe_path: &config.exe_path,
            seccomp_rule: config.seccomp_rule_name.as_deref(),
            confinement: self.engine.confinement(),
        });

        let raw = self.engine.run(config, policy.as_deref());

        if let Some(failure) = &raw.failure {
            run_log.record(RunEvent::Failure {
                error: failure.code,
                message: &failure.message,
            });
        }
        if let Some(cause) = raw.kill_cause {
            run_log.record(RunEvent::Kill {
                cause,
                real_time_ms: raw.real_time_ms,
            });
        }

        if raw.signal != 0 {
            log::debug!(
                "launch {} terminated by {}",
                run_log.launch_id(),
                signal::describe(raw.signal)
            );
        }

        let (error, result) = classify(&raw, config);
        let judge_result = JudgeResult {
            cpu_time: raw.cpu_time_ms,
            real_time: raw.real_time_ms,
            memory: raw.peak_memory_bytes,
            signal: raw.signal,
            exit_code: raw.exit_code,
            error,
            result,
        };

        log::info!(
            "launch {} of {:?}: error={} result={} cpu={}ms real={}ms memory={}B",
            run_log.launch_id(),
            config.exe_path,
            error,
            result,
            judge_result.cpu_time,
            judge_result.real_time,
            judge_result.memory
        );
        run_log.record(RunEvent::Result {
            result: &judge_result,
            descendants_reaped: raw.descendants_reaped,
        });
        judge_result
    }

    fn reject(run_log: &mut RunLog, error: ErrorCode, message: &str) -> JudgeResult {
        let result = JudgeResult::system_error(error);
        run_log.record(RunEvent::Failure { error, message });
        run_log.record(RunEvent::Result {
            result: &result,
            descendants_reaped: 0,
        });
        result
    }
}

/// Startup-time choices for a [`Judge`]
pub struct JudgeBuilder {
    registry: Option<Arc<PolicyRegistry>>,
    confinement: Option<Box<dyn SandboxPolicy>>,
    engine: Option<Box<dyn SandboxEngine>>,
    settings: MonitorSettings,
    subreaper: bool,
}

impl Default for JudgeBuilder {
    fn default() -> Self {
        Self {
            registry: None,
            confinement: None,
            engine: None,
            settings: MonitorSettings::default(),
            subreaper: true,
        }
    }
}

impl JudgeBuilder {
    pub fn registry(mut self, registry: Arc<PolicyRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Override confinement detection
    pub fn confinement(mut self, confinement: Box<dyn SandboxPolicy>) -> Self {
        self.confinement = Some(confinement);
        self
    }

    /// Replace the native engine entirely
    pub fn engine(mut self, engine: Box<dyn SandboxEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.settings.poll_interval = interval;
        self
    }

    pub fn reap_grace(mut self, grace: Duration) -> Self {
        self.settings.reap_grace = grace;
        self
    }

    /// Become a child subreaper so leftover group members can be reaped
    /// (default on; affects the whole process)
    pub fn subreaper(mut self, enabled: bool) -> Self {
        self.subreaper = enabled;
        self
    }

    pub fn build(self) -> Judge {
        let registry = self
            .registry
            .unwrap_or_else(|| Arc::new(PolicyRegistry::builtin()));

        let engine = match self.engine {
            Some(engine) => engine,
            None => {
                let mut settings = self.settings;
                settings.reap_descendants = self.subreaper
                    && match process::become_subreaper() {
                        Ok(()) => true,
                        Err(e) => {
                            log::warn!("cannot become child subreaper: {}", e);
                            false
                        }
                    };
                let confinement = self.confinement.unwrap_or_else(detect_confinement);
                Box::new(NativeEngine::new(confinement, settings)) as Box<dyn SandboxEngine>
            }
        };

        log::debug!(
            "judge ready: engine={} confinement={} policies={}",
            engine.name(),
            engine.confinement(),
            registry.names().join(",")
        );
        Judge { registry, engine }
    }
}

/// Launch with a process-wide judge holding the built-in policies
pub fn launch(config: &JudgeConfig) -> JudgeResult {
    static DEFAULT: OnceLock<Judge> = OnceLock::new();
    DEFAULT
        .get_or_init(|| Judge::new(Arc::new(PolicyRegistry::builtin())))
        .launch(config)
}
