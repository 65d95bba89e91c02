//! Human-readable output.
//!
//! Plain text with optional ANSI color via `colored`.

use std::fmt::Write as _;

use colored::{Color, Colorize};

use crate::core::models::{Quota, ServiceStatus};
use crate::storage::clock_skew::{OffsetSource, RepairOutcome, SkewPlan};
use crate::storage::{MaintenanceReport, MigrationReport, ResolvedConfig};
use crate::util::{format_relative, format_unix, mask_secret};

fn paint(text: &str, color: Color, no_color: bool) -> String {
    if no_color {
        text.to_string()
    } else {
        text.color(color).to_string()
    }
}

fn bold(text: &str, no_color: bool) -> String {
    if no_color {
        text.to_string()
    } else {
        text.bold().to_string()
    }
}

/// Color for a remaining fraction.
fn remaining_color(percent: f64) -> Color {
    if percent >= 25.0 {
        Color::Green
    } else if percent >= 10.0 {
        Color::Yellow
    } else {
        Color::Red
    }
}

/// Render service statuses.
#[must_use]
pub fn render_statuses(statuses: &[ServiceStatus], now: i64, no_color: bool) -> String {
    if statuses.is_empty() {
        return "No enabled services. Add [[services]] to the config file.\n".to_string();
    }

    let mut out = String::new();
    for status in statuses {
        let health = if status.is_healthy {
            paint("ok", Color::Green, no_color)
        } else if status.auth_error {
            paint("auth error", Color::Yellow, no_color)
        } else {
            paint("error", Color::Red, no_color)
        };
        let updated = status
            .last_updated
            .map_or_else(|| "never".to_string(), |ts| format_relative(ts, now));
        let _ = writeln!(
            out,
            "{} ({}) [{}] updated {}",
            bold(&status.service.name, no_color),
            status.service.provider,
            health,
            updated
        );
        if let Some(error) = &status.error {
            let _ = writeln!(out, "  {}", paint(error, Color::Red, no_color));
        }
        for quota in &status.quotas {
            out.push_str(&render_quota_line(quota, now, no_color));
        }
        out.push('\n');
    }
    out
}

fn render_quota_line(quota: &Quota, now: i64, no_color: bool) -> String {
    let mut line = format!("  {:<20} ", quota.metric);
    if quota.limit > 0.0 {
        let percent = (quota.remaining / quota.limit * 100.0).clamp(0.0, 100.0);
        let _ = write!(
            line,
            "{:.2} / {:.2} remaining ({})",
            quota.remaining,
            quota.limit,
            paint(&format!("{percent:.0}%"), remaining_color(percent), no_color)
        );
    } else {
        let _ = write!(line, "{:.2} remaining, {:.2} used", quota.remaining, quota.used);
    }
    if let Some(reset_at) = quota.reset_at {
        let _ = write!(line, ", resets {}", format_relative(reset_at, now));
    }
    if quota.is_zeroed() {
        line.push_str(&paint(" (no longer reported)", Color::BrightBlack, no_color));
    }
    line.push('\n');
    line
}

/// Render a migration run.
#[must_use]
pub fn render_migrations(report: &MigrationReport, no_color: bool) -> String {
    let mut out = String::new();
    if report.is_noop() {
        out.push_str(&paint("Schema is up to date.\n", Color::Green, no_color));
    } else {
        for name in &report.applied {
            let _ = writeln!(out, "{} {name}", paint("applied", Color::Green, no_color));
        }
    }
    for name in &report.rerun {
        let _ = writeln!(out, "{} {name}", paint("re-ran ", Color::BrightBlack, no_color));
    }
    out
}

/// Render a maintenance pass.
#[must_use]
pub fn render_maintenance(report: &MaintenanceReport, no_color: bool) -> String {
    let mut out = String::new();
    let checkpoint = if report.checkpoint_busy {
        paint("partial (readers active)", Color::Yellow, no_color)
    } else {
        paint("complete", Color::Green, no_color)
    };
    let _ = writeln!(out, "Checkpoint:      {checkpoint}");
    let _ = writeln!(
        out,
        "WAL frames:      {} ({} checkpointed)",
        report.wal_frames, report.checkpointed_frames
    );
    let _ = writeln!(out, "Pages reclaimed: {}", report.pages_reclaimed);
    let _ = writeln!(out, "Duration:        {}ms", report.duration_ms);
    out
}

/// Render a clock-skew plan (dry run).
#[must_use]
pub fn render_skew_plan(plan: &SkewPlan, no_color: bool) -> String {
    let mut out = String::new();
    let Some(block) = &plan.block else {
        let _ = writeln!(
            out,
            "{} No usage history is stamped after {}.",
            paint("clean", Color::Green, no_color),
            format_unix(plan.cutoff)
        );
        return out;
    };

    let _ = writeln!(
        out,
        "Future-stamped block: {} samples, {} .. {}",
        block.samples,
        format_unix(block.first_ts),
        format_unix(block.last_ts)
    );
    let source = match plan.source {
        OffsetSource::Discontinuity => paint("inferred from data", Color::Green, no_color),
        OffsetSource::TimezoneFallback => {
            paint("host timezone fallback", Color::Yellow, no_color)
        }
    };
    let _ = writeln!(out, "Offset:               -{}s ({source})", plan.offset_secs);
    if let Some(interval) = plan.typical_interval_secs {
        let _ = writeln!(out, "Typical interval:     {interval}s");
    }
    let _ = writeln!(out, "Quota rows affected:  {}", plan.quota_rows);
    if !plan.ambiguous_rowids.is_empty() {
        let _ = writeln!(
            out,
            "{} {} future samples outside the block will not be touched.",
            paint("warning:", Color::Yellow, no_color),
            plan.ambiguous_rowids.len()
        );
    }
    if plan.is_actionable() {
        let _ = writeln!(out, "\nRe-run with --apply to shift the block.");
    }
    out
}

/// Render an applied repair.
#[must_use]
pub fn render_repair(outcome: &RepairOutcome, no_color: bool) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{} {} samples and {} quota rows shifted.",
        paint("repaired", Color::Green, no_color),
        outcome.samples_shifted,
        outcome.quota_rows_shifted
    );
    if let Some(path) = &outcome.backup_path {
        let _ = writeln!(out, "Backup: {}", path.display());
    }
    out
}

/// Render the resolved configuration with value sources.
#[must_use]
pub fn render_config(config: &ResolvedConfig, no_color: bool) -> String {
    let src = |s: &dyn std::fmt::Display| paint(&format!("({s})"), Color::BrightBlack, no_color);
    let mut out = String::new();
    let _ = writeln!(
        out,
        "config file:      {} {}",
        config.config_path.display(),
        src(&config.sources.config_path)
    );
    let _ = writeln!(
        out,
        "database:         {} {}",
        config.db_path.display(),
        src(&config.sources.db_path)
    );
    let _ = writeln!(
        out,
        "refresh interval: {}s {}",
        config.refresh_interval.as_secs(),
        src(&config.sources.refresh_interval)
    );
    let _ = writeln!(
        out,
        "fetch timeout:    {}s {}",
        config.fetch_timeout.as_secs(),
        src(&config.sources.fetch_timeout)
    );
    let _ = writeln!(out, "busy timeout:     {}ms", config.busy_timeout.as_millis());
    let _ = writeln!(
        out,
        "maintenance:      every {}h, {} pages",
        config.maintenance_interval.as_secs() / 3600,
        config.vacuum_pages
    );

    let _ = writeln!(out, "\nservices:");
    if config.services.is_empty() {
        let _ = writeln!(out, "  (none)");
    }
    for service in &config.services {
        let credential = service
            .credential()
            .map_or_else(|| paint("missing", Color::Red, no_color), mask_secret);
        let enabled = if service.enabled { "" } else { " [disabled]" };
        let _ = writeln!(
            out,
            "  {:<16} {:<10} key {}{}",
            service.id, service.provider, credential, enabled
        );
    }
    out
}
