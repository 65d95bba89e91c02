//! Config command implementation.

use serde::Serialize;

use super::Output;
use crate::core::models::Service;
use crate::error::Result;
use crate::render::{self, human};
use crate::storage::ResolvedConfig;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ConfigView<'a> {
    config_path: String,
    config_path_source: String,
    db_path: String,
    db_path_source: String,
    refresh_interval_seconds: u64,
    refresh_interval_source: String,
    fetch_timeout_seconds: u64,
    fetch_timeout_source: String,
    busy_timeout_ms: u128,
    maintenance_interval_seconds: u64,
    incremental_vacuum_pages: u32,
    services: &'a [Service],
}

impl<'a> From<&'a ResolvedConfig> for ConfigView<'a> {
    fn from(config: &'a ResolvedConfig) -> Self {
        Self {
            config_path: config.config_path.display().to_string(),
            config_path_source: config.sources.config_path.to_string(),
            db_path: config.db_path.display().to_string(),
            db_path_source: config.sources.db_path.to_string(),
            refresh_interval_seconds: config.refresh_interval.as_secs(),
            refresh_interval_source: config.sources.refresh_interval.to_string(),
            fetch_timeout_seconds: config.fetch_timeout.as_secs(),
            fetch_timeout_source: config.sources.fetch_timeout.to_string(),
            busy_timeout_ms: config.busy_timeout.as_millis(),
            maintenance_interval_seconds: config.maintenance_interval.as_secs(),
            incremental_vacuum_pages: config.vacuum_pages,
            services: &config.services,
        }
    }
}

/// Print the resolved configuration. Credentials are masked.
///
/// # Errors
/// Returns an error if JSON serialization fails.
pub fn execute(config: &ResolvedConfig, output: Output) -> Result<()> {
    let rendered = match output.format {
        super::OutputFormat::Human => human::render_config(config, output.no_color),
        super::OutputFormat::Json => render::robot::render_json(&ConfigView::from(config), output.pretty)?,
    };
    output.emit(&rendered);
    Ok(())
}
