use crate::config::presets::PolicySpec;
use crate::config::types::{JudgeConfig, JudgeError, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Read a judge request from a JSON file
pub fn load_request(path: &Path) -> Result<JudgeConfig> {
    let text = fs::read_to_string(path).map_err(|e| {
        JudgeError::Config(format!("cannot read request {}: {}", path.display(), e))
    })?;
    let config = serde_json::from_str(&text)?;
    Ok(config)
}

/// Read one policy description file
pub fn load_policy_file(path: &Path) -> Result<PolicySpec> {
    let text = fs::read_to_string(path).map_err(|e| {
        JudgeError::Config(format!("cannot read policy {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&text).map_err(|e| {
        JudgeError::Config(format!("malformed policy {}: {}", path.display(), e))
    })
}

/// List `*.json` files in a policy directory, sorted for a stable load order
pub fn policy_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().map_or(false, |ext| ext == "json") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
