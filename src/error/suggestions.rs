//! Fix suggestions for quotad errors.
//!
//! Maps fatal and per-service errors to actionable operator hints.

use super::{ProviderError, ProviderErrorKind};

/// A fix suggestion for an error.
#[derive(Debug, Clone)]
pub struct FixSuggestion {
    /// Commands to try, in order of preference.
    pub commands: Vec<String>,

    /// Explanation of why this error occurred.
    pub context: String,

    /// Tips to prevent this error in the future.
    pub prevention: Option<String>,
}

impl FixSuggestion {
    /// Creates a new fix suggestion with required fields.
    #[must_use]
    pub fn new(commands: Vec<String>, context: impl Into<String>) -> Self {
        Self {
            commands,
            context: context.into(),
            prevention: None,
        }
    }

    /// Builder: adds prevention tips.
    #[must_use]
    pub fn with_prevention(mut self, prevention: impl Into<String>) -> Self {
        self.prevention = Some(prevention.into());
        self
    }
}

/// Suggestions when a write stayed busy past the retry ceiling.
#[must_use]
pub fn busy_suggestions() -> Vec<FixSuggestion> {
    vec![
        FixSuggestion::new(
            vec!["lsof <db-path>".to_string()],
            "Another process kept the database write lock for longer than the retry window.",
        )
        .with_prevention("Run a single quotad daemon per database file."),
    ]
}

/// Suggestions when the database file cannot be opened.
#[must_use]
pub fn open_failed_suggestions(path: &str) -> Vec<FixSuggestion> {
    vec![FixSuggestion::new(
        vec![format!("ls -la {path}"), "quotad --db <other-path> migrate".to_string()],
        format!("The database at {path} could not be opened. Check permissions and free disk space."),
    )]
}

/// Suggestions when a migration aborts startup.
#[must_use]
pub fn migration_failed_suggestions(name: &str) -> Vec<FixSuggestion> {
    vec![
        FixSuggestion::new(
            vec!["quotad migrate --log-level debug".to_string()],
            format!(
                "Migration {name} failed and was rolled back. The daemon refuses to start on a partially migrated schema."
            ),
        )
        .with_prevention("Back up the database before upgrading quotad."),
    ]
}

/// Suggestions for a classified provider failure.
#[must_use]
pub fn provider_suggestions(err: &ProviderError) -> Vec<FixSuggestion> {
    let provider = err.provider();
    match err.kind() {
        ProviderErrorKind::Auth => vec![FixSuggestion::new(
            vec![format!("quotad status --service <id>  # check {provider} credentials")],
            format!("{provider} rejected the configured credentials. Rotate the API key in the config file."),
        )],
        ProviderErrorKind::RateLimit => vec![
            FixSuggestion::new(
                Vec::new(),
                format!("{provider} is rate limiting quota polls."),
            )
            .with_prevention("Increase general.refresh_interval_seconds."),
        ],
        ProviderErrorKind::Network => vec![FixSuggestion::new(
            Vec::new(),
            format!("{provider} could not be reached. The next cycle retries automatically."),
        )],
        ProviderErrorKind::Unknown => vec![FixSuggestion::new(
            Vec::new(),
            format!("{provider} returned an unexpected response. The API may have changed."),
        )],
    }
}

/// Suggestions for config errors.
#[must_use]
pub fn config_suggestions() -> Vec<FixSuggestion> {
    vec![FixSuggestion::new(
        vec!["quotad config".to_string()],
        "The configuration is invalid. Print the resolved configuration to see which source each value came from.",
    )]
}

/// Suggestions when the clock-skew repair refuses to apply a plan.
#[must_use]
pub fn repair_refused_suggestions(reason: &str) -> Vec<FixSuggestion> {
    vec![FixSuggestion::new(
        vec![
            "quotad repair-clock-skew".to_string(),
            "quotad repair-clock-skew --apply --accept-timezone-fallback".to_string(),
        ],
        format!("{reason}. Review the dry-run plan before applying."),
    )]
}
