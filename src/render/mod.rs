//! Output rendering for human and JSON modes.

pub mod error;
pub mod human;
pub mod robot;

use serde::Serialize;

use crate::cli::args::OutputFormat;
use crate::core::models::ServiceStatus;
use crate::error::Result;

/// Render service statuses.
///
/// # Errors
/// Returns an error if JSON serialization fails.
pub fn render_statuses(
    statuses: &[ServiceStatus],
    format: OutputFormat,
    pretty: bool,
    no_color: bool,
    now: i64,
) -> Result<String> {
    match format {
        OutputFormat::Human => Ok(human::render_statuses(statuses, now, no_color)),
        OutputFormat::Json => robot::render_json(statuses, pretty),
    }
}

/// Render a report, choosing the human renderer or JSON.
///
/// # Errors
/// Returns an error if JSON serialization fails.
pub fn render_report<T: Serialize + ?Sized>(
    value: &T,
    format: OutputFormat,
    pretty: bool,
    human: impl FnOnce(&T) -> String,
) -> Result<String> {
    match format {
        OutputFormat::Human => Ok(human(value)),
        OutputFormat::Json => robot::render_json(value, pretty),
    }
}
