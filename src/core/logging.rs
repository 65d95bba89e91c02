//! Structured logging setup.
//!
//! Level, format and sink come from the CLI first, then `QUOTAD_LOG`,
//! `QUOTAD_LOG_FORMAT` and `QUOTAD_LOG_FILE`. `RUST_LOG` overrides the
//! level filter entirely when set.

use std::fs::OpenOptions;
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

pub const LOG_LEVEL_ENV: &str = "QUOTAD_LOG";
pub const LOG_FORMAT_ENV: &str = "QUOTAD_LOG_FORMAT";
pub const LOG_FILE_ENV: &str = "QUOTAD_LOG_FILE";

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable logs.
    #[default]
    Human,
    /// JSON logs (one event per line).
    Json,
    /// Compact logs (single line, terse).
    Compact,
}

impl LogFormat {
    /// Parse from string (case-insensitive).
    #[must_use]
    pub fn from_arg(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "human" => Some(Self::Human),
            "json" => Some(Self::Json),
            "compact" => Some(Self::Compact),
            _ => None,
        }
    }
}

/// Log level from CLI argument or config.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Parse from CLI argument.
    #[must_use]
    pub fn from_arg(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "trace" => Some(Self::Trace),
            "verbose" | "debug" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warn" | "warning" => Some(Self::Warn),
            "error" | "critical" | "crit" => Some(Self::Error),
            _ => None,
        }
    }

    /// Convert to tracing filter string.
    #[must_use]
    pub const fn as_filter(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    /// Convert to tracing level.
    #[must_use]
    pub const fn as_tracing_level(self) -> Level {
        match self {
            Self::Trace => Level::TRACE,
            Self::Debug => Level::DEBUG,
            Self::Info => Level::INFO,
            Self::Warn => Level::WARN,
            Self::Error => Level::ERROR,
        }
    }
}

/// Settings resolved from CLI flags and environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogSettings {
    pub level: LogLevel,
    pub format: LogFormat,
    pub file: Option<PathBuf>,
}

impl LogSettings {
    /// Merge CLI values over environment values over defaults.
    ///
    /// `json_output` forces JSON format regardless of other sources.
    #[must_use]
    pub fn resolve(
        cli_level: Option<LogLevel>,
        json_output: bool,
        config_level: Option<&str>,
        env: &dyn Fn(&str) -> Option<String>,
    ) -> Self {
        let non_empty = |key: &str| env(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let level = cli_level
            .or_else(|| non_empty(LOG_LEVEL_ENV).and_then(|v| LogLevel::from_arg(&v)))
            .or_else(|| config_level.and_then(LogLevel::from_arg))
            .unwrap_or_default();
        let format = if json_output {
            LogFormat::Json
        } else {
            non_empty(LOG_FORMAT_ENV)
                .and_then(|v| LogFormat::from_arg(&v))
                .unwrap_or_default()
        };
        let file = non_empty(LOG_FILE_ENV).map(PathBuf::from);

        Self { level, format, file }
    }
}

/// Initialize the global subscriber. Later calls are no-ops.
pub fn init(settings: &LogSettings) {
    let file = settings.file.as_ref().and_then(|path| {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .ok()
    });

    let make_writer = |file: Option<&std::fs::File>| -> BoxMakeWriter {
        if let Some(file) = file.and_then(|inner| inner.try_clone().ok()) {
            BoxMakeWriter::new(file)
        } else {
            BoxMakeWriter::new(std::io::stderr)
        }
    };

    let level = settings.level;
    let make_filter = || {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("quotad={}", level.as_filter())))
    };

    match settings.format {
        LogFormat::Json => {
            tracing_subscriber::fmt()
                .with_env_filter(make_filter())
                .json()
                .with_writer(make_writer(file.as_ref()))
                .with_span_events(FmtSpan::CLOSE)
                .try_init()
                .ok();
        }
        LogFormat::Compact => {
            tracing_subscriber::fmt()
                .with_env_filter(make_filter())
                .compact()
                .with_writer(make_writer(file.as_ref()))
                .with_target(true)
                .try_init()
                .ok();
        }
        LogFormat::Human => {
            tracing_subscriber::fmt()
                .with_env_filter(make_filter())
                .with_writer(make_writer(file.as_ref()))
                .with_target(false)
                .try_init()
                .ok();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_to_human_info_on_stderr() {
        let settings = LogSettings::resolve(None, false, None, &env_of(&[]));
        assert_eq!(settings, LogSettings::default());
        assert_eq!(settings.level, LogLevel::Info);
    }

    #[test]
    fn env_level_beats_config_but_not_cli() {
        let env = env_of(&[(LOG_LEVEL_ENV, "trace")]);
        let settings = LogSettings::resolve(None, false, Some("warn"), &env);
        assert_eq!(settings.level, LogLevel::Trace);

        let settings = LogSettings::resolve(Some(LogLevel::Error), false, Some("warn"), &env);
        assert_eq!(settings.level, LogLevel::Error);

        let settings = LogSettings::resolve(None, false, Some("warn"), &env_of(&[]));
        assert_eq!(settings.level, LogLevel::Warn);
    }

    #[test]
    fn json_output_forces_json_format() {
        let env = env_of(&[(LOG_FORMAT_ENV, "compact"), (LOG_FILE_ENV, " /tmp/q.log ")]);
        let settings = LogSettings::resolve(None, true, None, &env);
        assert_eq!(settings.format, LogFormat::Json);
        assert_eq!(settings.file, Some(PathBuf::from("/tmp/q.log")));

        let settings = LogSettings::resolve(None, false, None, &env);
        assert_eq!(settings.format, LogFormat::Compact);
    }

    #[test]
    fn blank_env_values_are_ignored() {
        let env = env_of(&[(LOG_LEVEL_ENV, "  "), (LOG_FILE_ENV, "")]);
        let settings = LogSettings::resolve(None, false, None, &env);
        assert_eq!(settings.level, LogLevel::Info);
        assert!(settings.file.is_none());
    }
}
