//! Maintenance command implementation.

use super::Output;
use super::args::MaintenanceArgs;
use crate::error::Result;
use crate::render::{self, human};
use crate::storage::{ResolvedConfig, run_maintenance};

/// Run one checkpoint and reclaim pass.
///
/// # Errors
/// Returns a storage error if the pass fails.
pub fn execute(args: &MaintenanceArgs, config: &ResolvedConfig, output: Output) -> Result<()> {
    let db = super::open_database(config)?;
    let report = run_maintenance(&db, args.pages.unwrap_or(config.vacuum_pages))?;
    let rendered = render::render_report(&report, output.format, output.pretty, |r| {
        human::render_maintenance(r, output.no_color)
    })?;
    output.emit(&rendered);
    Ok(())
}
