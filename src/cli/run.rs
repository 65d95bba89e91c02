//! Run command implementation (daemon mode).

use std::sync::Arc;

use crate::core::scheduler::{Orchestrator, SchedulerConfig};
use crate::error::Result;
use crate::providers::AdapterRegistry;
use crate::storage::ResolvedConfig;

/// Migrate, then refresh on a timer until Ctrl-C.
///
/// # Errors
/// Returns an error if the database cannot be prepared.
pub async fn execute(config: &ResolvedConfig) -> Result<()> {
    let (db, report) = super::prepare_database(config)?;
    tracing::info!(
        applied = report.applied.len(),
        db = %config.db_path.display(),
        services = config.services.len(),
        "quotad starting"
    );

    let registry = AdapterRegistry::new()?;
    let orchestrator = Arc::new(Orchestrator::new(
        db,
        Arc::new(registry),
        SchedulerConfig::from(config),
    ));

    orchestrator
        .run(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %err, "Failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
            tracing::info!("Shutdown requested");
        })
        .await;
    Ok(())
}
