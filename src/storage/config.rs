//! Configuration file loading and resolution.
//!
//! Loads configuration from `~/.config/quotad/config.toml` (platform
//! equivalent via `directories`) or the path in `QUOTAD_CONFIG`.
//!
//! ## Precedence
//!
//! Settings are resolved with the following precedence (highest first):
//! 1. CLI flags
//! 2. Environment variables
//! 3. Config file
//! 4. Built-in defaults
//!
//! ## Environment Variables
//!
//! - `QUOTAD_CONFIG`: Override config file path
//! - `QUOTAD_DB`: Database file path
//! - `QUOTAD_REFRESH_INTERVAL`: Refresh interval in seconds
//! - `QUOTAD_FETCH_TIMEOUT`: Per-service fetch timeout in seconds
//!
//! ## Example
//!
//! ```toml
//! [general]
//! refresh_interval_seconds = 300
//!
//! [[services]]
//! id = "or-main"
//! provider = "openrouter"
//! api_key_env = "OPENROUTER_API_KEY"
//! ```

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::AppPaths;
use crate::core::models::Service;
use crate::core::provider::ProviderKind;
use crate::error::{QuotadError, Result};
use crate::util::time::now_unix;

// =============================================================================
// Environment Variable Names
// =============================================================================

/// Environment variable to override config file path.
pub const ENV_CONFIG: &str = "QUOTAD_CONFIG";
/// Environment variable for the database path.
pub const ENV_DB: &str = "QUOTAD_DB";
/// Environment variable for the refresh interval in seconds.
pub const ENV_REFRESH_INTERVAL: &str = "QUOTAD_REFRESH_INTERVAL";
/// Environment variable for the fetch timeout in seconds.
pub const ENV_FETCH_TIMEOUT: &str = "QUOTAD_FETCH_TIMEOUT";

// =============================================================================
// Resolved Configuration
// =============================================================================

/// Values supplied on the command line.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub config: Option<PathBuf>,
    pub db: Option<PathBuf>,
    pub refresh_interval: Option<u64>,
    pub fetch_timeout: Option<u64>,
}

/// Fully resolved configuration after merging CLI, env vars, and config file.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Config file that was consulted (may not exist).
    pub config_path: PathBuf,
    pub db_path: PathBuf,
    pub refresh_interval: Duration,
    pub fetch_timeout: Duration,
    pub busy_timeout: Duration,
    pub maintenance_interval: Duration,
    pub vacuum_pages: u32,
    /// Log level from the config file, if any.
    pub log_level: Option<String>,
    /// Services to seed into the database.
    pub services: Vec<Service>,
    /// Source of each overridable setting.
    pub sources: ConfigSources,
}

/// Tracks the source of each configuration value.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    pub config_path: ConfigSource,
    pub db_path: ConfigSource,
    pub refresh_interval: ConfigSource,
    pub fetch_timeout: ConfigSource,
}

/// Where a configuration value came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConfigSource {
    /// Value from CLI flag.
    Cli,
    /// Value from environment variable.
    Env,
    /// Value from config file.
    ConfigFile,
    /// Built-in default.
    #[default]
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI flag"),
            Self::Env => write!(f, "environment variable"),
            Self::ConfigFile => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

impl ResolvedConfig {
    /// Resolve from CLI overrides, the process environment, and the config file.
    ///
    /// # Errors
    /// Returns an error if the config file exists but is invalid, or any
    /// resolved value is invalid.
    pub fn resolve(cli: &CliOverrides) -> Result<Self> {
        Self::resolve_with(cli, &|key| std::env::var(key).ok())
    }

    /// Resolve with an explicit environment lookup.
    ///
    /// # Errors
    /// Same as [`ResolvedConfig::resolve`].
    pub fn resolve_with(cli: &CliOverrides, env: &dyn Fn(&str) -> Option<String>) -> Result<Self> {
        let mut sources = ConfigSources::default();
        let env = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        let config_path = if let Some(path) = &cli.config {
            sources.config_path = ConfigSource::Cli;
            path.clone()
        } else if let Some(path) = env(ENV_CONFIG) {
            sources.config_path = ConfigSource::Env;
            PathBuf::from(path)
        } else {
            AppPaths::new().config_file()
        };

        let config = Config::load_from(&config_path)?;
        config.validate()?;

        let db_path = if let Some(path) = &cli.db {
            sources.db_path = ConfigSource::Cli;
            path.clone()
        } else if let Some(path) = env(ENV_DB) {
            sources.db_path = ConfigSource::Env;
            PathBuf::from(path)
        } else if let Some(path) = &config.storage.db_path {
            sources.db_path = ConfigSource::ConfigFile;
            path.clone()
        } else {
            AppPaths::new().db_file()
        };

        let refresh_secs = Self::resolve_seconds(
            cli.refresh_interval,
            env(ENV_REFRESH_INTERVAL),
            ENV_REFRESH_INTERVAL,
            config.general.refresh_interval_seconds,
            GeneralConfig::default().refresh_interval_seconds,
            &mut sources.refresh_interval,
        )?;
        let fetch_secs = Self::resolve_seconds(
            cli.fetch_timeout,
            env(ENV_FETCH_TIMEOUT),
            ENV_FETCH_TIMEOUT,
            config.general.fetch_timeout_seconds,
            GeneralConfig::default().fetch_timeout_seconds,
            &mut sources.fetch_timeout,
        )?;

        let services = config.to_services(&env)?;

        Ok(Self {
            config_path,
            db_path,
            refresh_interval: Duration::from_secs(refresh_secs),
            fetch_timeout: Duration::from_secs(fetch_secs),
            busy_timeout: Duration::from_millis(config.storage.busy_timeout_ms),
            maintenance_interval: Duration::from_secs(
                config.storage.maintenance_interval_hours * 3_600,
            ),
            vacuum_pages: config.storage.incremental_vacuum_pages,
            log_level: config.general.log_level.clone(),
            services,
            sources,
        })
    }

    fn resolve_seconds(
        cli: Option<u64>,
        env_value: Option<String>,
        env_name: &str,
        file_value: u64,
        default_value: u64,
        source: &mut ConfigSource,
    ) -> Result<u64> {
        let value = if let Some(value) = cli {
            *source = ConfigSource::Cli;
            value
        } else if let Some(raw) = env_value {
            *source = ConfigSource::Env;
            raw.trim().parse::<u64>().map_err(|_| {
                QuotadError::Config(format!("{env_name} must be a whole number of seconds, got {raw:?}"))
            })?
        } else if file_value == default_value {
            *source = ConfigSource::Default;
            file_value
        } else {
            *source = ConfigSource::ConfigFile;
            file_value
        };

        if value == 0 {
            return Err(QuotadError::Config(format!(
                "{env_name} resolved to 0 seconds; intervals must be positive"
            )));
        }
        Ok(value)
    }
}

// =============================================================================
// Config File
// =============================================================================

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings.
    pub general: GeneralConfig,
    /// Database settings.
    pub storage: StorageConfig,
    /// Upstream accounts to poll.
    pub services: Vec<ServiceConfig>,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Seconds between refresh cycles.
    pub refresh_interval_seconds: u64,
    /// Per-service fetch timeout in seconds.
    pub fetch_timeout_seconds: u64,
    /// Default log level (error, warn, info, debug, trace).
    pub log_level: Option<String>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            refresh_interval_seconds: 300,
            fetch_timeout_seconds: 15,
            log_level: None,
        }
    }
}

/// Database settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Database file; defaults to the platform data directory.
    pub db_path: Option<PathBuf>,
    /// SQLite busy timeout in milliseconds.
    pub busy_timeout_ms: u64,
    /// Hours between checkpoint/reclaim passes.
    pub maintenance_interval_hours: u64,
    /// Pages released per reclaim pass.
    pub incremental_vacuum_pages: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            busy_timeout_ms: 250,
            maintenance_interval_hours: 6,
            incremental_vacuum_pages: 512,
        }
    }
}

/// One `[[services]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub id: String,
    /// Display name; defaults to the id.
    #[serde(default)]
    pub name: Option<String>,
    pub provider: String,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Read the API key from this environment variable instead.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub bearer_token: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Polling order; defaults to position in the file.
    #[serde(default)]
    pub display_order: Option<i64>,
}

const fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from the default config file path.
    ///
    /// # Errors
    /// Returns an error only if the file exists but is invalid.
    pub fn load() -> Result<Self> {
        Self::load_from(&AppPaths::new().config_file())
    }

    /// Load configuration from a specific path.
    ///
    /// Returns default config if the file doesn't exist.
    ///
    /// # Errors
    /// Returns an error only if the file exists but is invalid.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(?path, "Config file not found, using defaults");
            return Ok(Self::default());
        }

        tracing::debug!(?path, "Loading config file");
        let content = fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| QuotadError::ConfigParse {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// Validate configuration values.
    ///
    /// Checks that intervals are positive, service ids are unique and
    /// non-empty, and provider names are known.
    ///
    /// # Errors
    /// Returns the first violation found.
    pub fn validate(&self) -> Result<()> {
        if self.general.refresh_interval_seconds == 0 {
            return Err(QuotadError::Config(
                "general.refresh_interval_seconds must be greater than 0".to_string(),
            ));
        }
        if self.general.fetch_timeout_seconds == 0 {
            return Err(QuotadError::Config(
                "general.fetch_timeout_seconds must be greater than 0".to_string(),
            ));
        }
        if self.storage.maintenance_interval_hours == 0 {
            return Err(QuotadError::Config(
                "storage.maintenance_interval_hours must be greater than 0".to_string(),
            ));
        }

        let valid_providers = ProviderKind::ALL
            .iter()
            .map(|provider| provider.cli_name())
            .collect::<Vec<_>>()
            .join(", ");

        let mut seen = HashSet::new();
        for service in &self.services {
            if service.id.trim().is_empty() {
                return Err(QuotadError::Config("Service id must not be empty".to_string()));
            }
            if !seen.insert(service.id.as_str()) {
                return Err(QuotadError::Config(format!(
                    "Duplicate service id \"{}\"",
                    service.id
                )));
            }
            ProviderKind::from_cli_name(&service.provider).map_err(|_| {
                QuotadError::Config(format!(
                    "Invalid provider \"{}\" for service \"{}\". Valid providers: {valid_providers}",
                    service.provider, service.id
                ))
            })?;
        }
        Ok(())
    }

    /// Build service records, resolving `api_key_env` through `env`.
    ///
    /// # Errors
    /// Returns an error if a provider name is invalid.
    pub fn to_services(&self, env: &dyn Fn(&str) -> Option<String>) -> Result<Vec<Service>> {
        let now = now_unix();
        self.services
            .iter()
            .enumerate()
            .map(|(idx, entry)| {
                let api_key = entry
                    .api_key
                    .clone()
                    .or_else(|| entry.api_key_env.as_deref().and_then(env));
                if api_key.is_none() && entry.bearer_token.is_none() {
                    tracing::warn!(service = %entry.id, "Service has no credentials configured");
                }
                Ok(Service {
                    id: entry.id.clone(),
                    name: entry.name.clone().unwrap_or_else(|| entry.id.clone()),
                    provider: ProviderKind::from_cli_name(&entry.provider)?,
                    api_key,
                    bearer_token: entry.bearer_token.clone(),
                    base_url: entry.base_url.clone(),
                    enabled: entry.enabled,
                    display_order: entry
                        .display_order
                        .unwrap_or_else(|| i64::try_from(idx).unwrap_or(i64::MAX)),
                    created_at: now,
                    updated_at: now,
                })
            })
            .collect()
    }
}
