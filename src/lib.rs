//! judgebox: run one untrusted program under enforced limits and a syscall
//! filter, then classify how it ended.
//!
//! # Architecture
//!
//! ## Kernel Primitives ([`kernel`])
//! - [`kernel::rlimit`]: per-process resource ceilings
//! - [`kernel::credentials`]: uid/gid transition for the child
//! - [`kernel::seccomp`]: syscall filter compilation and installation
//! - [`kernel::syscalls`]: syscall name table for the host architecture
//! - [`kernel::signal`]: signal disposition reset before exec
//! - [`kernel::process`]: kill, wait and reap helpers
//!
//! ## Execution Control ([`exec`])
//! - [`exec::launcher`]: parent-side launch plan, fork and status pipe
//! - [`exec::preexec`]: type-state enforced setup order in the child
//!
//! ## Monitoring ([`core`])
//! - [`core::monitor`]: wall-clock watchdog, CPU/output poller, reaping
//! - [`core::types`]: raw termination evidence
//!
//! ## Judge ([`judge`])
//! - [`judge::Judge`]: validate, launch, classify, log
//! - [`judge::registry`]: named syscall policies
//! - [`judge::engine`]: the enforcement engine seam
//!
//! ## Verdict ([`verdict`])
//! - [`verdict::classifier`]: raw evidence to `(error, result)`
//!
//! ## Observability ([`observability`])
//! - [`observability::run_log`]: per-launch JSON lines
//!
//! ## Configuration ([`config`])
//! - [`config::types`]: request, result and error types
//! - [`config::validator`]: request validation
//! - [`config::presets`]: built-in policies
//! - [`config::loader`]: request and policy files

// Kernel Primitives
pub mod kernel;

// Execution Control
pub mod exec;

// Child monitoring
pub mod core;

// Judge facade and policy registry
pub mod judge;

// Evidence & Verdict
pub mod verdict;

// Observability
pub mod observability;

// Configuration & Policy
pub mod config;

// CLI entrypoint
pub mod cli;

pub use config::types::*;
pub use judge::registry::PolicyRegistry;
pub use judge::{launch, Judge, JudgeBuilder};
