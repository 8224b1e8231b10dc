//! Verdict classification
//!
//! Derives verdicts as pure functions over raw termination evidence.

pub mod classifier;
