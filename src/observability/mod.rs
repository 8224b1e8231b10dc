//! Observability
//!
//! Per-launch structured event log.

pub mod run_log;
