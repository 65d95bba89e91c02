//! Refresh command implementation.

use std::sync::Arc;

use super::Output;
use crate::core::scheduler::{Orchestrator, RefreshOutcome, SchedulerConfig};
use crate::error::Result;
use crate::providers::AdapterRegistry;
use crate::render;
use crate::storage::ResolvedConfig;
use crate::util::now_unix;

/// Run one cycle without stagger and print the statuses.
///
/// # Errors
/// Returns an error if the database cannot be prepared.
pub async fn execute(config: &ResolvedConfig, output: Output) -> Result<()> {
    let (db, _) = super::prepare_database(config)?;
    let mut scheduler = SchedulerConfig::from(config);
    // A one-shot refresh polls back to back.
    scheduler.refresh_interval = std::time::Duration::ZERO;

    let orchestrator = Orchestrator::new(db, Arc::new(AdapterRegistry::new()?), scheduler);
    let statuses = match orchestrator.refresh_once().await? {
        RefreshOutcome::Completed(statuses) => statuses,
        RefreshOutcome::Skipped => Vec::new(),
    };

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
