//! Clock-skew repair command implementation.
//!
//! Dry run by default; `--apply` backs up the database before shifting.

use super::Output;
use super::args::RepairArgs;
use crate::error::Result;
use crate::render::{self, human};
use crate::storage::{ApplyOptions, ResolvedConfig, SkewOptions, apply_repair, plan_repair, run_migrations};

/// Plan, and optionally apply, a clock-skew repair.
///
/// # Errors
/// Returns [`crate::QuotadError::RepairRefused`] when the plan cannot be
/// applied as requested, or a storage error.
pub fn execute(args: &RepairArgs, config: &ResolvedConfig, output: Output) -> Result<()> {
    let db = super::open_database(config)?;
    run_migrations(&db)?;

    let mut options = SkewOptions::current();
    if let Some(tolerance) = args.tolerance {
        options.tolerance_secs = tolerance;
    }
    let plan = plan_repair(&db, &options)?;

    if !args.apply {
        let rendered = render::render_report(&plan, output.format, output.pretty, |p| {
            human::render_skew_plan(p, output.no_color)
        })?;
        output.emit(&rendered);
        return Ok(());
    }

    let outcome = apply_repair(
        &db,
        &plan,
        &ApplyOptions {
            accept_timezone_fallback: args.accept_timezone_fallback,
            backup_path: args.backup.clone(),
        },
    )?;
    let rendered = render::render_report(&outcome, output.format, output.pretty, |o| {
        human::render_repair(o, output.no_color)
    })?;
    output.emit(&rendered);
    Ok(())
}
