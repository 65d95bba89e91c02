//! CLI argument definitions using clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::storage::CliOverrides;

/// quotad - poll provider quotas into a local SQLite store.
#[derive(Parser, Debug)]
#[command(name = "quotad")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    // === Global flags ===
    /// Config file (default: platform config dir)
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Database file (overrides config and QUOTAD_DB)
    #[arg(long, value_name = "PATH", global = true)]
    pub db: Option<PathBuf>,

    /// Output format
    #[arg(long, value_enum, default_value = "human", global = true)]
    pub format: OutputFormat,

    /// Shorthand for --format json
    #[arg(long, global = true)]
    pub json: bool,

    /// Pretty-print JSON output
    #[arg(long, global = true)]
    pub pretty: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Emit JSONL logs to stderr
    #[arg(long, global = true)]
    pub json_output: bool,
}

impl Cli {
    /// Resolve the effective output format.
    #[must_use]
    pub const fn effective_format(&self) -> OutputFormat {
        if self.json {
            OutputFormat::Json
        } else {
            self.format
        }
    }

    /// Configuration values supplied on the command line.
    #[must_use]
    pub fn overrides(&self) -> CliOverrides {
        let (refresh_interval, fetch_timeout) = match &self.command {
            Commands::Run(args) => (args.refresh_interval, args.fetch_timeout),
            Commands::Refresh(args) => (None, args.fetch_timeout),
            _ => (None, None),
        };
        CliOverrides {
            config: self.config.clone(),
            db: self.db.clone(),
            refresh_interval,
            fetch_timeout,
        }
    }
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Migrate, then poll providers until interrupted
    Run(RunArgs),

    /// Run a single refresh cycle and print the results
    Refresh(RefreshArgs),

    /// Show stored quota state without contacting providers
    Status(StatusArgs),

    /// Apply pending schema migrations and exit
    Migrate,

    /// Detect and repair future-stamped usage history
    RepairClockSkew(RepairArgs),

    /// Checkpoint the WAL and reclaim free pages
    Maintenance(MaintenanceArgs),

    /// Show the resolved configuration and where each value came from
    Config,
}

/// Arguments for the `run` command.
#[derive(Parser, Debug, Default)]
pub struct RunArgs {
    /// Seconds between refresh cycles
    #[arg(long, value_name = "SECONDS")]
    pub refresh_interval: Option<u64>,

    /// Per-service fetch timeout in seconds
    #[arg(long, value_name = "SECONDS")]
    pub fetch_timeout: Option<u64>,
}

/// Arguments for the `refresh` command.
#[derive(Parser, Debug, Default)]
pub struct RefreshArgs {
    /// Per-service fetch timeout in seconds
    #[arg(long, value_name = "SECONDS")]
    pub fetch_timeout: Option<u64>,
}

/// Arguments for the `status` command.
#[derive(Parser, Debug, Default)]
pub struct StatusArgs {
    /// Only show this service id
    #[arg(long, value_name = "ID")]
    pub service: Option<String>,
}

/// Arguments for the `repair-clock-skew` command.
#[derive(Parser, Debug, Default)]
pub struct RepairArgs {
    /// Apply the plan (default is a dry run)
    #[arg(long)]
    pub apply: bool,

    /// Allow applying an offset inferred from the host timezone
    #[arg(long, requires = "apply")]
    pub accept_timezone_fallback: bool,

    /// Where to write the pre-repair backup
    #[arg(long, value_name = "PATH", requires = "apply")]
    pub backup: Option<PathBuf>,

    /// Seconds a sample may sit in the future before it counts as skewed
    #[arg(long, value_name = "SECONDS")]
    pub tolerance: Option<i64>,
}

/// Arguments for the `maintenance` command.
#[derive(Parser, Debug, Default)]
pub struct MaintenanceArgs {
    /// Free pages to release (default from config)
    #[arg(long, value_name = "N")]
    pub pages: Option<u32>,
}

/// Output format options.
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output
    #[default]
    Human,
    /// JSON output
    Json,
}
