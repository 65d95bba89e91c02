//! Structured progress output for integration tests.
#![allow(dead_code)]
//!
//! Each test gets a [`TestLogger`] that prints phase changes and a final
//! duration to stderr, so `cargo test -- --nocapture` shows where a slow or
//! hanging test got stuck.
//!
//! - `TEST_LOG_LEVEL` - trace, debug, info, warn, error (default: info)
//! - `TEST_LOG_JSON` - "1" or "true" for one JSON object per line

use std::env;
use std::fmt::Display;
use std::sync::{Mutex, OnceLock};
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;

/// Severity of a test log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "trace" => Some(Self::Trace),
            "debug" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warn" | "warning" => Some(Self::Warn),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

impl Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Trace => "TRACE",
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy)]
struct Settings {
    min_level: LogLevel,
    json: bool,
}

fn settings() -> Settings {
    static SETTINGS: OnceLock<Settings> = OnceLock::new();
    *SETTINGS.get_or_init(|| Settings {
        min_level: env::var("TEST_LOG_LEVEL")
            .ok()
            .and_then(|s| LogLevel::parse(&s))
            .unwrap_or(LogLevel::Info),
        json: env::var("TEST_LOG_JSON").is_ok_and(|v| v == "1" || v.eq_ignore_ascii_case("true")),
    })
}

#[derive(Serialize)]
struct Line<'a> {
    timestamp: String,
    level: LogLevel,
    test: &'a str,
    phase: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_ms: Option<u64>,
}

/// Per-test logger with phase tracking.
pub struct TestLogger {
    test_name: String,
    started: Instant,
    phase: Mutex<String>,
}

impl TestLogger {
    #[must_use]
    pub fn new(test_name: &str) -> Self {
        let logger = Self {
            test_name: test_name.to_string(),
            started: Instant::now(),
            phase: Mutex::new("init".to_string()),
        };
        logger.emit(LogLevel::Info, "Test starting", None);
        logger
    }

    /// Enter a named phase ("setup", "act", "verify", ...).
    pub fn phase(&self, phase: &str) {
        if let Ok(mut current) = self.phase.lock() {
            *current = phase.to_string();
        }
        self.emit(LogLevel::Debug, &format!("Phase: {phase}"), None);
    }

    pub fn debug(&self, message: &str) {
        self.emit(LogLevel::Debug, message, None);
    }

    pub fn info(&self, message: &str) {
        self.emit(LogLevel::Info, message, None);
    }

    pub fn warn(&self, message: &str) {
        self.emit(LogLevel::Warn, message, None);
    }

    /// Record an outgoing HTTP request against a mock server.
    pub fn http_request(&self, method: &str, url: &str) {
        self.debug(&format!("HTTP {method} {url}"));
    }

    /// Record a database step.
    pub fn db(&self, step: &str) {
        self.debug(&format!("DB {step}"));
    }

    #[must_use]
    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    pub fn finish_ok(&self) {
        let ms = self.elapsed_ms();
        self.emit(LogLevel::Info, &format!("Test passed ({ms}ms)"), Some(ms));
    }

    fn emit(&self, level: LogLevel, message: &str, duration_ms: Option<u64>) {
        let settings = settings();
        if level < settings.min_level {
            return;
        }
        let phase = self.phase.lock().map(|p| p.clone()).unwrap_or_default();
        let timestamp = Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string();

        if settings.json {
            let line = Line {
                timestamp,
                level,
                test: &self.test_name,
                phase: &phase,
                message,
                duration_ms,
            };
            if let Ok(json) = serde_json::to_string(&line) {
                eprintln!("{json}");
            }
        } else {
            eprintln!("[{timestamp}] [{level}] [{}:{phase}] {message}", self.test_name);
        }
    }
}
