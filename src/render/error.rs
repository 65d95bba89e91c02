//! Error rendering.
//!
//! Human output shows the error code, fix commands, and context; JSON output
//! is a stable object for scripts.

use colored::Colorize;

use crate::cli::args::OutputFormat;
use crate::error::{FixSuggestion, ProviderError, QuotadError};

/// Render an error for the chosen output format.
#[must_use]
pub fn render_error(error: &QuotadError, format: OutputFormat, no_color: bool, pretty: bool) -> String {
    match format {
        OutputFormat::Json => render_error_json(error, pretty),
        OutputFormat::Human => render_human(error, no_color),
    }
}

fn render_human(error: &QuotadError, no_color: bool) -> String {
    let suggestions = error.fix_suggestions();
    let mut lines = Vec::new();

    let header = format!("Error [{}]: {error}", error.error_code());
    lines.push(if no_color {
        header
    } else {
        header.red().bold().to_string()
    });

    if !suggestions.is_empty() {
        lines.push(String::new());
        lines.push("How to fix:".to_string());
        lines.extend(render_commands(&suggestions, no_color));
    }

    if let Some(context) = suggestions.first().map(|s| s.context.as_str()) {
        if !context.is_empty() {
            lines.push(String::new());
            lines.push(format!("Why this happened: {context}"));
        }
    }
    if let Some(prevention) = suggestions.first().and_then(|s| s.prevention.as_deref()) {
        lines.push(format!("Prevention: {prevention}"));
    }

    lines.join("\n")
}

fn render_commands(suggestions: &[FixSuggestion], no_color: bool) -> Vec<String> {
    let mut lines = Vec::new();
    for (i, suggestion) in suggestions.iter().enumerate() {
        for (j, cmd) in suggestion.commands.iter().enumerate() {
            let prefix = if j == 0 {
                format!("  {}. ", i + 1)
            } else {
                "     Or: ".to_string()
            };
            let cmd = if no_color {
                cmd.clone()
            } else {
                cmd.cyan().to_string()
            };
            lines.push(format!("{prefix}{cmd}"));
        }
    }
    lines
}

/// JSON representation of an error for machine consumption.
#[derive(serde::Serialize)]
struct ErrorJson {
    error_code: &'static str,
    category: String,
    message: String,
    exit_code: i32,
    is_retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after_seconds: Option<u64>,
    suggestions: Vec<SuggestionJson>,
}

#[derive(serde::Serialize)]
struct SuggestionJson {
    commands: Vec<String>,
    context: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    prevention: Option<String>,
}

impl ErrorJson {
    fn from_error(error: &QuotadError) -> Self {
        let (provider, retry_after_seconds) = match error {
            QuotadError::Provider(e) => {
                let retry = match e {
                    ProviderError::RateLimited { retry_after, .. } => retry_after.map(|d| d.as_secs()),
                    _ => None,
                };
                (Some(e.provider().to_string()), retry)
            }
            _ => (None, None),
        };

        Self {
            error_code: error.error_code(),
            category: error.category().to_string(),
            message: error.to_string(),
            exit_code: i32::from(error.exit_code()),
            is_retryable: error.is_retryable(),
            provider,
            retry_after_seconds,
            suggestions: error
                .fix_suggestions()
                .into_iter()
                .map(|s| SuggestionJson {
                    commands: s.commands,
                    context: s.context,
                    prevention: s.prevention,
                })
                .collect(),
        }
    }
}

/// Render error as structured JSON.
#[must_use]
pub fn render_error_json(error: &QuotadError, pretty: bool) -> String {
    let json = ErrorJson::from_error(error);
    let rendered = if pretty {
        serde_json::to_string_pretty(&json)
    } else {
        serde_json::to_string(&json)
    };
    rendered.unwrap_or_else(|_| format!("Error [{}]: {error}", error.error_code()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;

    #[test]
    fn human_error_has_code_and_fix() {
        let err = QuotadError::Storage(StorageError::Busy {
            context: "save quotas".to_string(),
        });
        let out = render_error(&err, OutputFormat::Human, true, false);
        assert!(out.starts_with("Error [QD-S003]"));
        assert!(out.contains("How to fix:"));
        assert!(out.contains("  1. "));
    }

    #[test]
    fn json_error_is_parseable() {
        let err = QuotadError::Config("refresh interval must be positive".to_string());
        let out = render_error(&err, OutputFormat::Json, true, false);
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["error_code"], "QD-C002");
        assert_eq!(value["exit_code"], 2);
        assert_eq!(value["is_retryable"], false);
    }

    #[test]
    fn rate_limit_json_carries_retry_after() {
        let err = QuotadError::Provider(ProviderError::RateLimited {
            provider: "openrouter".to_string(),
            retry_after: Some(std::time::Duration::from_secs(30)),
            message: "HTTP 429".to_string(),
        });
        let value: serde_json::Value =
            serde_json::from_str(&render_error_json(&err, false)).unwrap();
        assert_eq!(value["provider"], "openrouter");
        assert_eq!(value["retry_after_seconds"], 30);
    }
}
