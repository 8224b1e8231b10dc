//! Execution control
//!
//! Spawns the judged process: parent-side launch preparation and the
//! type-state enforced child setup chain.

pub mod launcher;
pub mod preexec;
