//! Migrate command implementation.

use super::Output;
use crate::error::Result;
use crate::render::{self, human};
use crate::storage::{ResolvedConfig, run_migrations};

/// Apply pending migrations and report what ran.
///
/// # Errors
/// Returns the failing migration's error.
pub fn execute(config: &ResolvedConfig, output: Output) -> Result<()> {
    let db = super::open_database(config)?;
    let report = run_migrations(&db)?;
    let rendered = render::render_report(&report, output.format, output.pretty, |r| {
        human::render_migrations(r, output.no_color)
    })?;
    output.emit(&rendered);
    Ok(())
}
