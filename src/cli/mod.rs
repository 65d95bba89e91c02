//! CLI argument parsing and command dispatch.

pub mod args;
pub mod config;
pub mod maintenance;
pub mod migrate;
pub mod refresh;
pub mod repair;
pub mod run;
pub mod status;

use std::io::IsTerminal;
use std::sync::Arc;

pub use args::{Cli, Commands, OutputFormat};

use crate::error::Result;
use crate::storage::{Database, DbOptions, MigrationReport, ResolvedConfig, ServiceStore, run_migrations};

/// Output options shared by every command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Output {
    pub format: OutputFormat,
    pub pretty: bool,
    pub no_color: bool,
}

impl Output {
    /// Derive output options from flags, `NO_COLOR`, and whether stdout is a
    /// terminal.
    #[must_use]
    pub fn from_cli(cli: &Cli) -> Self {
        let no_color = cli.no_color
            || std::env::var_os("NO_COLOR").is_some_and(|v| !v.is_empty())
            || !std::io::stdout().is_terminal();
        Self {
            format: cli.effective_format(),
            pretty: cli.pretty,
            no_color,
        }
    }

    /// Print rendered output, avoiding a doubled trailing newline.
    pub fn emit(&self, rendered: &str) {
        if rendered.ends_with('\n') {
            print!("{rendered}");
        } else {
            println!("{rendered}");
        }
    }
}

/// Open the configured database.
///
/// # Errors
/// Returns a storage error if the file cannot be opened.
pub fn open_database(config: &ResolvedConfig) -> Result<Arc<Database>> {
    let options = DbOptions::default().with_busy_timeout(config.busy_timeout);
    let db = Database::open(&config.db_path, &options)?;
    tracing::debug!(path = %config.db_path.display(), "Database opened");
    Ok(Arc::new(db))
}

/// Open, migrate, and seed services from config.
///
/// # Errors
/// Migration failures are fatal and returned as [`crate::QuotadError::Migration`].
pub fn prepare_database(config: &ResolvedConfig) -> Result<(Arc<Database>, MigrationReport)> {
    let db = open_database(config)?;
    let report = run_migrations(&db)?;
    let sync = ServiceStore::new(Arc::clone(&db)).sync(&config.services)?;
    tracing::debug!(
        upserted = sync.upserted,
        disabled = sync.disabled.len(),
        "Services synced from config"
    );
    Ok((db, report))
}

/// Execute a parsed command.
///
/// # Errors
/// Returns the first fatal error; per-service refresh failures are not
/// fatal.
pub async fn dispatch(command: Commands, config: ResolvedConfig, output: Output) -> Result<()> {
    match command {
        Commands::Run(_) => run::execute(&config).await,
        Commands::Refresh(_) => refresh::execute(&config, output).await,
        Commands::Status(args) => status::execute(&args, &config, output),
        Commands::Migrate => migrate::execute(&config, output),
        Commands::RepairClockSkew(args) => repair::execute(&args, &config, output),
        Commands::Maintenance(args) => maintenance::execute(&args, &config, output),
        Commands::Config => config::execute(&config, output),
    }
}
