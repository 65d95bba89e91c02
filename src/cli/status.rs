//! Status command implementation.

use std::sync::Arc;

use super::Output;
use super::args::StatusArgs;
use crate::core::scheduler::{Orchestrator, SchedulerConfig};
use crate::error::{QuotadError, Result};
use crate::providers::AdapterRegistry;
use crate::render;
use crate::storage::ResolvedConfig;
use crate::util::now_unix;

/// Print stored quota state. Never contacts a provider.
///
/// # Errors
/// Returns an error if the database cannot be read or `--service` names an
/// unknown or disabled service.
pub fn execute(args: &StatusArgs, config: &ResolvedConfig, output: Output) -> Result<()> {
    let (db, _) = super::prepare_database(config)?;
    let orchestrator = Orchestrator::new(
        db,
        Arc::new(AdapterRegistry::new()?),
        SchedulerConfig::from(config),
    );

    let mut statuses = orchestrator.latest_status()?;
    if let Some(id) = &args.service {
        statuses.retain(|s| &s.service.id == id);
        if statuses.is_empty() {
            return Err(QuotadError::Config(format!(
                "no enabled service with id \"{id}\""
            )));
        }
    }

    let rendered = render::render_statuses(
        &statuses,
        output.format,
        output.pretty,
        output.no_color,
        now_unix(),
    )?;
    output.emit(&rendered);
    Ok(())
}
