//! Sandbox runtime core.
//!
//! Owns the monitored lifetime of a judged process: enforcement threads,
//! the single-winner termination state, reaping, and raw evidence.

pub mod monitor;
pub mod types;
