//! Shared identifiers and enums used across the vigil crates.

pub mod id;
pub mod types;
