//! Shared helpers for integration tests.
//!
//! - `fixtures`: fixture files and legacy schema builders
//! - `logger`: per-test structured progress output

pub mod fixtures;
pub mod logger;
