//! Storage: SQLite engine, migrations, persistence, and configuration.

pub mod clock_skew;
pub mod config;
pub mod db;
pub mod legacy;
pub mod maintenance;
pub mod migrations;
pub mod paths;
pub mod quotas;
pub mod schema;
pub mod services;
pub mod transaction;

pub use clock_skew::{
    ApplyOptions, OffsetSource, RepairOutcome, SkewBlock, SkewOptions, SkewPlan, apply_repair,
    plan_repair,
};
pub use config::{
    CliOverrides, Config, ConfigSource, ConfigSources, ENV_CONFIG, ENV_DB, ENV_FETCH_TIMEOUT,
    ENV_REFRESH_INTERVAL, ResolvedConfig, ServiceConfig,
};
pub use db::{Database, DbOptions};
pub use maintenance::{MaintenanceReport, run_maintenance};
pub use migrations::{MigrationReport, run_migrations};
pub use paths::AppPaths;
pub use quotas::{QuotaStore, SaveSummary, quota_id};
pub use services::{ServiceStore, SyncReport};
pub use transaction::{BUSY_BACKOFF, MAX_ATTEMPTS, retry_on_busy, run_in_transaction};
