use crate::config::loader::{load_policy_file, policy_files};
use crate::config::presets::builtin_presets;
use crate::config::types::{JudgeError, Result};
use crate::kernel::seccomp::CompiledPolicy;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Named syscall policies, compiled once and read-only afterwards.
///
/// Shared between concurrent launches behind an `Arc`; lookups never lock.
#[derive(Debug, Clone, Default)]
pub struct PolicyRegistry {
    policies: BTreeMap<String, Arc<CompiledPolicy>>,
}

impl PolicyRegistry {
    /// Registry holding only the built-in presets
    pub fn builtin() -> Self {
        let mut registry = Self::default();
        for spec in builtin_presets() {
            // Built-ins skip names the host architecture lacks, so this
            // cannot fail on an unknown name.
            match CompiledPolicy::compile(&spec, false) {
                Ok(policy) => registry.insert(policy),
                Err(e) => log::error!("built-in policy {} failed to compile: {}", spec.name, e),
            }
        }
        registry
    }

    /// Built-ins plus every `*.json` policy file in `dir`.
    ///
    /// A file naming a built-in replaces it. Any unreadable file or unknown
    /// syscall name fails the whole load.
    pub fn load(dir: &Path) -> Result<Self> {
        let mut registry = Self::builtin();
        if !dir.is_dir() {
            return Err(JudgeError::Config(format!(
                "policy directory does not exist: {}",
                dir.display()
            )));
        }

        for path in policy_files(dir)? {
            let spec = load_policy_file(&path)?;
            let policy = CompiledPolicy::compile(&spec, true)?;
            if registry.contains(&policy.name) {
                log::info!(
                    "policy {} from {} replaces the existing definition",
                    policy.name,
                    path.display()
                );
            } else {
                log::debug!("loaded policy {} from {}", policy.name, path.display());
            }
            registry.insert(policy);
        }

        log::info!("policy registry ready: {}", registry.names().join(", "));
        Ok(registry)
    }

    fn insert(&mut self, policy: CompiledPolicy) {
        self.policies.insert(policy.name.clone(), Arc::new(policy));
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<CompiledPolicy>> {
        self.policies
            .get(name)
            .cloned()
            .ok_or_else(|| JudgeError::Config(format!("unknown seccomp rule: {}", name)))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.policies.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.policies.keys().map(String::as_str).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CompiledPolicy> {
        self.policies.values().map(|p| p.as_ref())
    }
}
