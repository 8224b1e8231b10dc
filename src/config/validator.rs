// Request validation
// Every judge request is checked before anything is spawned; all problems
// are collected and reported together as one INVALID_CONFIG error.

use crate::config::types::{
    JudgeConfig, JudgeError, Result, ARGS_MAX_NUMBER, ENV_MAX_NUMBER, PATH_MAX_LEN,
};
use crate::judge::registry::PolicyRegistry;
use std::path::Path;

const MAX_TIME_MS: u64 = 24 * 60 * 60 * 1000;
const MAX_BYTES: u64 = 1 << 40;
const MAX_PROCESSES: u64 = 65_536;

/// Validation result with detailed errors
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn add_error(&mut self, error: String) {
        self.valid = false;
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: String) {
        self.warnings.push(warning);
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }
}

/// Validate a judge request against the loaded policy registry.
///
/// Returns the warnings on success. Any error makes the whole request
/// invalid.
pub fn validate_config(config: &JudgeConfig, registry: &PolicyRegistry) -> Result<ValidationResult> {
    validate_with_euid(config, registry, nix::unistd::geteuid().as_raw())
}

pub(crate) fn validate_with_euid(
    config: &JudgeConfig,
    registry: &PolicyRegistry,
    caller_euid: u32,
) -> Result<ValidationResult> {
    let mut result = ValidationResult::new();

    validate_limits(config, &mut result);
    validate_paths(config, &mut result);
    validate_arguments(config, &mut result);
    validate_policy(config, registry, &mut result);
    validate_credentials(config, caller_euid, &mut result);

    for warning in &result.warnings {
        log::warn!("{}", warning);
    }

    if !result.is_valid() {
        return Err(JudgeError::Config(result.errors.join("; ")));
    }

    Ok(result)
}

fn check_limit(name: &str, value: u64, upper: u64, result: &mut ValidationResult) {
    if value == 0 {
        result.add_error(format!("{} must be positive", name));
    } else if value > upper {
        result.add_error(format!("{} {} exceeds maximum {}", name, value, upper));
    }
}

fn validate_limits(config: &JudgeConfig, result: &mut ValidationResult) {
    check_limit("max_cpu_time", config.max_cpu_time, MAX_TIME_MS, result);
    check_limit("max_real_time", config.max_real_time, MAX_TIME_MS, result);
    check_limit("max_memory", config.max_memory, MAX_BYTES, result);
    check_limit("max_stack", config.max_stack, MAX_BYTES, result);
    check_limit("max_output_size", config.max_output_size, MAX_BYTES, result);
    check_limit(
        "max_process_number",
        config.max_process_number,
        MAX_PROCESSES,
        result,
    );

    if config.max_memory > 0 && config.max_memory < 1024 * 1024 {
        result.add_warning(format!(
            "max_memory {} is very low (< 1MB), most programs cannot even load",
            config.max_memory
        ));
    }

    if config.max_real_time < config.max_cpu_time {
        result.add_warning(format!(
            "max_real_time ({}ms) is below max_cpu_time ({}ms); the wall clock will fire first",
            config.max_real_time, config.max_cpu_time
        ));
    }
}

fn check_path_text(name: &str, path: &Path, result: &mut ValidationResult) -> bool {
    let raw = path.as_os_str();
    if raw.is_empty() {
        result.add_error(format!("{} must not be empty", name));
        return false;
    }
    if raw.len() > PATH_MAX_LEN {
        result.add_error(format!(
            "{} is {} bytes long, maximum is {}",
            name,
            raw.len(),
            PATH_MAX_LEN
        ));
        return false;
    }
    if std::os::unix::ffi::OsStrExt::as_bytes(raw).contains(&0) {
        result.add_error(format!("{} contains a NUL byte", name));
        return false;
    }
    true
}

fn validate_paths(config: &JudgeConfig, result: &mut ValidationResult) {
    if check_path_text("exe_path", &config.exe_path, result) && !config.exe_path.is_absolute() {
        result.add_error(format!(
            "exe_path must be absolute path: {:?}",
            config.exe_path
        ));
    }

    if let Some(ref input_path) = config.input_path {
        if check_path_text("input_path", input_path, result) && !input_path.is_file() {
            result.add_error(format!("input_path is not a readable file: {:?}", input_path));
        }
    }

    let outputs = [
        ("output_path", &config.output_path),
        ("error_path", &config.error_path),
        ("log_path", &config.log_path),
    ];
    for (name, path) in outputs {
        let Some(path) = path else { continue };
        if !check_path_text(name, path, result) {
            continue;
        }
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.is_dir() {
                result.add_error(format!(
                    "{} parent directory does not exist: {:?}",
                    name, parent
                ));
            }
        }
    }
}

fn validate_arguments(config: &JudgeConfig, result: &mut ValidationResult) {
    if config.args.len() > ARGS_MAX_NUMBER {
        result.add_error(format!(
            "too many arguments: {} (maximum {})",
            config.args.len(),
            ARGS_MAX_NUMBER
        ));
    }
    if config.env.len() > ENV_MAX_NUMBER {
        result.add_error(format!(
            "too many environment entries: {} (maximum {})",
            config.env.len(),
            ENV_MAX_NUMBER
        ));
    }

    for (index, arg) in config.args.iter().enumerate() {
        if arg.contains('\0') {
            result.add_error(format!("argument {} contains a NUL byte", index));
        }
    }

    for entry in &config.env {
        if entry.contains('\0') {
            result.add_error(format!("environment entry {:?} contains a NUL byte", entry));
            continue;
        }
        match entry.split_once('=') {
            Some((key, _)) if !key.is_empty() => {}
            _ => result.add_error(format!(
                "environment entry {:?} must have the form KEY=value",
                entry
            )),
        }
    }
}

fn validate_policy(config: &JudgeConfig, registry: &PolicyRegistry, result: &mut ValidationResult) {
    if let Some(ref name) = config.seccomp_rule_name {
        if !registry.contains(name) {
            result.add_error(format!("unknown seccomp rule: {}", name));
        }
    }
}

fn validate_credentials(config: &JudgeConfig, caller_euid: u32, result: &mut ValidationResult) {
    if caller_euid == 0 {
        return;
    }
    if config.uid == 0 {
        result.add_error("uid 0 requires the judge itself to run as root".to_string());
    }
    if config.gid == 0 {
        result.add_error("gid 0 requires the judge itself to run as root".to_string());
    }
}
