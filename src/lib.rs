//! quotad - provider quota ingestion
//!
//! Polls provider account endpoints on a schedule, normalizes their quota
//! readings, and keeps current state plus a usage history in SQLite.

#![forbid(unsafe_code)]
#![warn(clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod core;
pub mod error;
pub mod providers;
pub mod render;
pub mod storage;
pub mod util;

/// Test utilities module - included in test builds or when test-utils feature is enabled.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use error::{ExitCode, QuotadError, Result};
