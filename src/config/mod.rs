//! Configuration and policy
//!
//! Request types, validation, request loading, and built-in policy presets.

pub mod loader;
pub mod presets;
pub mod types;
pub mod validator;
