//! Thin wrappers around Linux kernel primitives.
//!
//! All `unsafe` code is concentrated here with explicit SAFETY comments.
//! Functions marked child-safe run between `fork` and `execve`: they make
//! raw syscalls only and never allocate, lock, or log.

pub mod credentials;
pub mod process;
pub mod rlimit;
pub mod seccomp;
pub mod signal;
pub mod syscalls;
