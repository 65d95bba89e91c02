//! Error types for quotad.
//!
//! Uses `thiserror` for structured error types that map to exit codes.
//!
//! ## Error Taxonomy
//!
//! - [`StorageError`]: everything the SQLite layer can report. `Busy` is the
//!   only retryable variant and is handled transparently by
//!   [`crate::storage::transaction::run_in_transaction`].
//! - [`ProviderError`]: adapter failures, classified into
//!   [`ProviderErrorKind`] (`auth | rate_limit | network | unknown`). These
//!   are recorded on the per-service status and never converted into storage
//!   errors.
//! - [`QuotadError`]: top-level error for the binary and the public API.
//!
//! Each top-level error has a stable error code (e.g., `QD-S003`) for
//! programmatic handling.

pub mod suggestions;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use suggestions::FixSuggestion;

// =============================================================================
// Error Categories
// =============================================================================

/// High-level error categories for classification and routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// SQLite open/query/contention/integrity failures.
    Storage,
    /// Schema migration failures (fatal at startup).
    Migration,
    /// Upstream provider failures.
    Provider,
    /// Configuration parse or validation failures.
    Configuration,
    /// Unexpected errors, bugs, or unclassified issues.
    Internal,
}

impl ErrorCategory {
    /// Returns a human-readable description of the category.
    #[must_use]
    pub const fn description(&self) -> &'static str {
        match self {
            Self::Storage => "Storage error",
            Self::Migration => "Migration error",
            Self::Provider => "Provider error",
            Self::Configuration => "Configuration error",
            Self::Internal => "Internal error",
        }
    }

    /// Returns a short code prefix for this category.
    #[must_use]
    pub const fn code_prefix(&self) -> &'static str {
        match self {
            Self::Storage => "S",
            Self::Migration => "M",
            Self::Provider => "P",
            Self::Configuration => "C",
            Self::Internal => "X",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

// =============================================================================
// Exit Codes
// =============================================================================

/// Process exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExitCode {
    /// Success
    Success = 0,
    /// Unexpected failure
    GeneralError = 1,
    /// Invalid configuration
    ConfigError = 2,
    /// A schema migration failed; the process must not serve traffic
    MigrationFailed = 3,
    /// Database could not be opened or stayed busy past the retry ceiling
    StorageUnavailable = 4,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as Self
    }
}

// =============================================================================
// Storage Errors
// =============================================================================

/// Errors raised by the storage engine.
///
/// Messages carry the operation context and the SQLite message, never bound
/// parameter values.
#[derive(Error, Debug)]
pub enum StorageError {
    /// The database file could not be opened or configured.
    #[error("failed to open database at {path}: {message}")]
    Open { path: String, message: String },

    /// Generic execution failure.
    #[error("{context}: {message}")]
    Query { context: String, message: String },

    /// Another writer holds the database lock.
    #[error("database busy during {context}")]
    Busy { context: String },

    /// Integrity violation (unique, foreign key, not null, check).
    #[error("constraint violation during {context}: {message}")]
    Constraint { context: String, message: String },

    /// A stored value failed validation against its expected shape.
    #[error("invalid stored value during {context}: {message}")]
    Decode { context: String, message: String },
}

impl StorageError {
    /// Classify a rusqlite error, attaching the operation context.
    #[must_use]
    pub fn from_sqlite(context: impl Into<String>, err: &rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;

        let context = context.into();
        match err {
            rusqlite::Error::SqliteFailure(inner, _) => match inner.code {
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => Self::Busy { context },
                ErrorCode::ConstraintViolation => Self::Constraint {
                    context,
                    message: err.to_string(),
                },
                _ => Self::Query {
                    context,
                    message: err.to_string(),
                },
            },
            rusqlite::Error::FromSqlConversionFailure(..)
            | rusqlite::Error::InvalidColumnType(..)
            | rusqlite::Error::IntegralValueOutOfRange(..) => Self::Decode {
                context,
                message: err.to_string(),
            },
            _ => Self::Query {
                context,
                message: err.to_string(),
            },
        }
    }

    /// Shorthand for a decode failure detected in Rust code.
    #[must_use]
    pub fn decode(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            context: context.into(),
            message: message.into(),
        }
    }

    /// Whether this error is a contention signal worth retrying.
    #[must_use]
    pub const fn is_busy(&self) -> bool {
        matches!(self, Self::Busy { .. })
    }

    /// Stable error code.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Open { .. } => "QD-S001",
            Self::Query { .. } => "QD-S002",
            Self::Busy { .. } => "QD-S003",
            Self::Constraint { .. } => "QD-S004",
            Self::Decode { .. } => "QD-S005",
        }
    }
}

/// Extension for mapping rusqlite results into [`StorageError`].
pub trait SqliteResultExt<T> {
    /// Attach an operation context and classify the failure.
    fn context(self, context: &str) -> std::result::Result<T, StorageError>;
}

impl<T> SqliteResultExt<T> for rusqlite::Result<T> {
    fn context(self, context: &str) -> std::result::Result<T, StorageError> {
        self.map_err(|e| StorageError::from_sqlite(context, &e))
    }
}

// =============================================================================
// Provider Errors
// =============================================================================

/// Classification of provider failures exposed on service status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    Auth,
    RateLimit,
    Network,
    Unknown,
}

impl ProviderErrorKind {
    /// Wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::RateLimit => "rate_limit",
            Self::Network => "network",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by provider adapters.
#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    /// Credentials missing, expired, or rejected.
    #[error("authentication failed for {provider}: {message}")]
    Auth { provider: String, message: String },

    /// Provider asked us to slow down.
    #[error("rate limited by {provider}: {message}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
        message: String,
    },

    /// Transport-level failure (DNS, connect, TLS, read).
    #[error("network error for {provider}: {message}")]
    Network { provider: String, message: String },

    /// The fetch did not complete within the per-service timeout.
    #[error("request to {provider} timed out after {}", format_timeout(.after))]
    Timeout { provider: String, after: Duration },

    /// Anything else, including unparseable responses.
    #[error("{provider} request failed: {message}")]
    Unknown { provider: String, message: String },
}

/// Whole seconds when exact, milliseconds otherwise.
fn format_timeout(after: &Duration) -> String {
    if after.subsec_nanos() == 0 && after.as_secs() > 0 {
        format!("{}s", after.as_secs())
    } else {
        format!("{}ms", after.as_millis())
    }
}

impl ProviderError {
    /// Classification used for status reporting.
    #[must_use]
    pub const fn kind(&self) -> ProviderErrorKind {
        match self {
            Self::Auth { .. } => ProviderErrorKind::Auth,
            Self::RateLimited { .. } => ProviderErrorKind::RateLimit,
            Self::Network { .. } | Self::Timeout { .. } => ProviderErrorKind::Network,
            Self::Unknown { .. } => ProviderErrorKind::Unknown,
        }
    }

    /// Whether this is an authentication failure.
    #[must_use]
    pub const fn is_auth(&self) -> bool {
        matches!(self, Self::Auth { .. })
    }

    /// Whether the fetch was abandoned by the scheduler's timeout.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Provider name the error belongs to.
    #[must_use]
    pub fn provider(&self) -> &str {
        match self {
            Self::Auth { provider, .. }
            | Self::RateLimited { provider, .. }
            | Self::Network { provider, .. }
            | Self::Timeout { provider, .. }
            | Self::Unknown { provider, .. } => provider,
        }
    }
}

// =============================================================================
// Top-level Error
// =============================================================================

/// Main error type for quotad operations.
#[derive(Error, Debug)]
pub enum QuotadError {
    /// Storage engine failure.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Provider adapter failure.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// A named migration failed; startup must abort.
    #[error("migration {name} failed: {source}")]
    Migration {
        name: String,
        #[source]
        source: StorageError,
    },

    /// Generic configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Config file could not be parsed.
    #[error("config parse error at {path}: {message}")]
    ConfigParse { path: String, message: String },

    /// Unknown provider kind.
    #[error("invalid provider: {0}")]
    InvalidProvider(String),

    /// The clock-skew repair plan cannot be applied as requested.
    #[error("clock-skew repair refused: {0}")]
    RepairRefused(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Catch-all for other errors.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl QuotadError {
    /// Wrap a storage failure raised while applying a migration.
    #[must_use]
    pub fn migration(name: &str, source: StorageError) -> Self {
        Self::Migration {
            name: name.to_string(),
            source,
        }
    }

    /// Map error to process exit code.
    #[must_use]
    pub const fn exit_code(&self) -> ExitCode {
        match self {
            Self::Config(_)
            | Self::ConfigParse { .. }
            | Self::InvalidProvider(_)
            | Self::RepairRefused(_) => ExitCode::ConfigError,
            Self::Migration { .. } => ExitCode::MigrationFailed,
            Self::Storage(StorageError::Open { .. } | StorageError::Busy { .. }) => {
                ExitCode::StorageUnavailable
            }
            Self::Storage(_)
            | Self::Provider(_)
            | Self::Io(_)
            | Self::Json(_)
            | Self::Other(_) => ExitCode::GeneralError,
        }
    }

    /// Returns the error category for classification and routing.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::Storage(_) => ErrorCategory::Storage,
            Self::Migration { .. } => ErrorCategory::Migration,
            Self::Provider(_) => ErrorCategory::Provider,
            Self::Config(_)
            | Self::ConfigParse { .. }
            | Self::InvalidProvider(_)
            | Self::RepairRefused(_) => ErrorCategory::Configuration,
            Self::Io(_) | Self::Json(_) | Self::Other(_) => ErrorCategory::Internal,
        }
    }

    /// Returns a stable error code for programmatic handling.
    ///
    /// Format: `QD-{category}{number}`.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Storage(e) => e.error_code(),
            Self::Migration { .. } => "QD-M001",
            Self::Provider(ProviderError::Auth { .. }) => "QD-P001",
            Self::Provider(ProviderError::RateLimited { .. }) => "QD-P002",
            Self::Provider(ProviderError::Network { .. }) => "QD-P003",
            Self::Provider(ProviderError::Timeout { .. }) => "QD-P004",
            Self::Provider(ProviderError::Unknown { .. }) => "QD-P099",
            Self::ConfigParse { .. } => "QD-C001",
            Self::Config(_) => "QD-C002",
            Self::InvalidProvider(_) => "QD-C003",
            Self::RepairRefused(_) => "QD-C010",
            Self::Io(_) => "QD-X001",
            Self::Json(_) => "QD-X002",
            Self::Other(_) => "QD-X099",
        }
    }

    /// Returns whether the error is potentially recoverable by retrying.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Storage(StorageError::Busy { .. })
                | Self::Provider(
                    ProviderError::RateLimited { .. }
                        | ProviderError::Network { .. }
                        | ProviderError::Timeout { .. }
                )
        )
    }

    /// Returns actionable fix suggestions for this error.
    #[must_use]
    pub fn fix_suggestions(&self) -> Vec<FixSuggestion> {
        match self {
            Self::Storage(StorageError::Busy { .. }) => suggestions::busy_suggestions(),
            Self::Storage(StorageError::Open { path, .. }) => {
                suggestions::open_failed_suggestions(path)
            }
            Self::Migration { name, .. } => suggestions::migration_failed_suggestions(name),
            Self::Provider(e) => suggestions::provider_suggestions(e),
            Self::Config(_) | Self::ConfigParse { .. } | Self::InvalidProvider(_) => {
                suggestions::config_suggestions()
            }
            Self::RepairRefused(reason) => suggestions::repair_refused_suggestions(reason),
            _ => Vec::new(),
        }
    }
}

/// Result type alias for quotad operations.
pub type Result<T> = std::result::Result<T, QuotadError>;

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sqlite_failure(code: std::ffi::c_int) -> rusqlite::Error {
        rusqlite::Error::SqliteFailure(rusqlite::ffi::Error::new(code), None)
    }

    #[test]
    fn error_category_code_prefix() {
        assert_eq!(ErrorCategory::Storage.code_prefix(), "S");
        assert_eq!(ErrorCategory::Migration.code_prefix(), "M");
        assert_eq!(ErrorCategory::Provider.code_prefix(), "P");
        assert_eq!(ErrorCategory::Configuration.code_prefix(), "C");
        assert_eq!(ErrorCategory::Internal.code_prefix(), "X");
    }

    #[test]
    fn busy_and_locked_classify_as_busy() {
        let busy = StorageError::from_sqlite("begin", &sqlite_failure(rusqlite::ffi::SQLITE_BUSY));
        assert!(busy.is_busy());

        let locked =
            StorageError::from_sqlite("begin", &sqlite_failure(rusqlite::ffi::SQLITE_LOCKED));
        assert!(locked.is_busy());
    }

    #[test]
    fn constraint_failure_is_not_busy() {
        let err = StorageError::from_sqlite(
            "insert quota",
            &sqlite_failure(rusqlite::ffi::SQLITE_CONSTRAINT),
        );
        assert!(matches!(err, StorageError::Constraint { .. }));
        assert!(!err.is_busy());
    }

    #[test]
    fn conversion_failure_is_decode() {
        let err = StorageError::from_sqlite(
            "read quota",
            &rusqlite::Error::InvalidColumnType(0, "limit".into(), rusqlite::types::Type::Text),
        );
        assert!(matches!(err, StorageError::Decode { .. }));
    }

    #[test]
    fn sub_second_timeout_reports_milliseconds() {
        let timeout = ProviderError::Timeout {
            provider: "moonshot".to_string(),
            after: Duration::from_millis(200),
        };
        assert_eq!(timeout.to_string(), "request to moonshot timed out after 200ms");

        let mixed = ProviderError::Timeout {
            provider: "moonshot".to_string(),
            after: Duration::from_millis(1_500),
        };
        assert!(mixed.to_string().ends_with("after 1500ms"));
    }

    #[test]
    fn provider_error_kinds() {
        let timeout = ProviderError::Timeout {
            provider: "openrouter".to_string(),
            after: Duration::from_secs(15),
        };
        assert_eq!(timeout.kind(), ProviderErrorKind::Network);
        assert!(timeout.is_timeout());
        assert!(timeout.to_string().ends_with("timed out after 15s"));

        let auth = ProviderError::Auth {
            provider: "deepseek".to_string(),
            message: "HTTP 401".to_string(),
        };
        assert_eq!(auth.kind(), ProviderErrorKind::Auth);
        assert_eq!(auth.kind().as_str(), "auth");
        assert_eq!(ProviderErrorKind::RateLimit.as_str(), "rate_limit");
    }

    #[test]
    fn migration_failure_exit_code() {
        let err = QuotadError::migration(
            "003_legacy_timestamps",
            StorageError::Query {
                context: "rebuild quotas".to_string(),
                message: "no such table".to_string(),
            },
        );
        assert_eq!(err.exit_code(), ExitCode::MigrationFailed);
        assert_eq!(err.category(), ErrorCategory::Migration);
        assert_eq!(err.error_code(), "QD-M001");
        assert!(err.to_string().contains("003_legacy_timestamps"));
    }

    #[test]
    fn busy_is_retryable_constraint_is_not() {
        let busy = QuotadError::from(StorageError::Busy {
            context: "commit".to_string(),
        });
        assert!(busy.is_retryable());
        assert_eq!(busy.error_code(), "QD-S003");
        assert_eq!(busy.exit_code(), ExitCode::StorageUnavailable);

        let constraint = QuotadError::from(StorageError::Constraint {
            context: "insert".to_string(),
            message: "FOREIGN KEY constraint failed".to_string(),
        });
        assert!(!constraint.is_retryable());
    }

    #[test]
    fn every_fatal_error_has_suggestions() {
        let err = QuotadError::Config("bad".to_string());
        assert!(!err.fix_suggestions().is_empty());

        let err = QuotadError::migration(
            "001_baseline",
            StorageError::Busy {
                context: "begin".to_string(),
            },
        );
        assert!(!err.fix_suggestions().is_empty());
    }
}
