//! Historical clock-skew repair.
//!
//! A host whose clock ran ahead leaves a block of history samples stamped
//! in the future. [`plan_repair`] finds that block in insertion order and
//! infers how far to shift it back; [`apply_repair`] writes a backup and
//! performs the shift in one transaction. Never part of startup.

use std::path::{Path, PathBuf};

use rusqlite::params;
use serde::Serialize;

use super::db::Database;
use crate::error::{QuotadError, Result, SqliteResultExt};

/// Samples more than this far in the future count as skewed.
pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

/// Inferred offsets are rounded to this granularity.
pub const OFFSET_GRANULARITY_SECS: i64 = 15 * 60;

/// Inputs for planning.
#[derive(Debug, Clone, Copy)]
pub struct SkewOptions {
    /// Reference "now" (unix seconds).
    pub now: i64,
    pub tolerance_secs: i64,
    /// Host UTC offset in seconds, used only when no discontinuity is found.
    pub local_offset_secs: i64,
}

impl SkewOptions {
    /// Options for the current moment and host timezone.
    #[must_use]
    pub fn current() -> Self {
        use chrono::Offset;
        Self {
            now: crate::util::time::now_unix(),
            tolerance_secs: DEFAULT_TOLERANCE_SECS,
            local_offset_secs: i64::from(chrono::Local::now().offset().fix().local_minus_utc()),
        }
    }
}

/// How the offset was determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OffsetSource {
    /// Forward jump at the start of the block minus the sampling interval.
    Discontinuity,
    /// Host timezone offset; needs explicit operator opt-in to apply.
    TimezoneFallback,
}

/// The contiguous run of future-stamped samples.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkewBlock {
    pub first_rowid: i64,
    pub last_rowid: i64,
    pub first_ts: i64,
    pub last_ts: i64,
    pub samples: usize,
}

/// A proposed repair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkewPlan {
    pub block: Option<SkewBlock>,
    /// Seconds to subtract from every sample in the block.
    pub offset_secs: i64,
    pub source: OffsetSource,
    /// Typical spacing between cycles before the block.
    pub typical_interval_secs: Option<i64>,
    /// Future-stamped samples outside the block; never modified.
    pub ambiguous_rowids: Vec<i64>,
    /// Quota rows with future `created_at`/`updated_at`.
    pub quota_rows: usize,
    /// Threshold used to classify samples as future.
    pub cutoff: i64,
}

impl SkewPlan {
    /// Whether applying this plan would change anything.
    #[must_use]
    pub fn is_actionable(&self) -> bool {
        self.block.is_some() && self.offset_secs > 0
    }
}

/// Result of applying a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairOutcome {
    pub samples_shifted: usize,
    pub quota_rows_shifted: usize,
    pub backup_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    rowid: i64,
    ts: i64,
}

/// Scan history and propose a repair. Read-only.
///
/// # Errors
/// Returns a storage error if the scan fails.
pub fn plan_repair(db: &Database, options: &SkewOptions) -> Result<SkewPlan> {
    let cutoff = options.now + options.tolerance_secs;
    let samples = db.query(
        "SELECT rowid, ts FROM usage_history ORDER BY rowid",
        [],
        |r| {
            Ok(Sample {
                rowid: r.get(0)?,
                ts: r.get(1)?,
            })
        },
    )?;
    let quota_rows = db.query(
        "SELECT COUNT(*) FROM quotas WHERE created_at > ?1 OR updated_at > ?1",
        [cutoff],
        |r| r.get::<_, i64>(0),
    )?;
    let quota_rows = quota_rows
        .first()
        .map_or(0, |n| usize::try_from(*n).unwrap_or(0));

    let mut plan = build_plan(&samples, cutoff, options.local_offset_secs);
    plan.quota_rows = quota_rows;

    tracing::info!(
        block = ?plan.block,
        offset_secs = plan.offset_secs,
        source = ?plan.source,
        ambiguous = plan.ambiguous_rowids.len(),
        "Planned clock-skew repair"
    );
    Ok(plan)
}

fn build_plan(samples: &[Sample], cutoff: i64, local_offset_secs: i64) -> SkewPlan {
    let runs = future_runs(samples, cutoff);
    let mut plan = SkewPlan {
        block: None,
        offset_secs: 0,
        source: OffsetSource::Discontinuity,
        typical_interval_secs: None,
        ambiguous_rowids: Vec::new(),
        quota_rows: 0,
        cutoff,
    };

    let Some(longest) = runs
        .iter()
        .enumerate()
        .max_by_key(|(idx, (start, end))| (end - start, std::cmp::Reverse(*idx)))
        .map(|(idx, _)| idx)
    else {
        return plan;
    };

    for (idx, (start, end)) in runs.iter().enumerate() {
        if idx != longest {
            plan.ambiguous_rowids
                .extend(samples[*start..*end].iter().map(|s| s.rowid));
        }
    }

    let (start, end) = runs[longest];
    let block = &samples[start..end];
    let max_ts = block.iter().map(|s| s.ts).max().unwrap_or(cutoff);
    let min_ts = block.iter().map(|s| s.ts).min().unwrap_or(cutoff);
    plan.block = Some(SkewBlock {
        first_rowid: block[0].rowid,
        last_rowid: block[block.len() - 1].rowid,
        first_ts: min_ts,
        last_ts: max_ts,
        samples: block.len(),
    });

    plan.typical_interval_secs = typical_interval(&samples[..start]);
    let inferred = start
        .checked_sub(1)
        .map(|prev| samples[prev].ts)
        .zip(plan.typical_interval_secs)
        .map(|(prev_ts, interval)| round_offset(block[0].ts - prev_ts - interval));

    match inferred {
        // The shifted block must land in the past and after its predecessor.
        Some(offset)
            if offset > 0
                && max_ts - offset <= cutoff
                && min_ts - offset >= samples[start - 1].ts =>
        {
            plan.offset_secs = offset;
        }
        _ => {
            plan.source = OffsetSource::TimezoneFallback;
            plan.offset_secs = local_offset_secs.max(0);
        }
    }
    plan
}

/// Half-open index ranges of consecutive future-stamped samples.
fn future_runs(samples: &[Sample], cutoff: i64) -> Vec<(usize, usize)> {
    let mut runs = Vec::new();
    let mut start = None;
    for (idx, sample) in samples.iter().enumerate() {
        match (sample.ts > cutoff, start) {
            (true, None) => start = Some(idx),
            (false, Some(s)) => {
                runs.push((s, idx));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        runs.push((s, samples.len()));
    }
    runs
}

/// Median gap between distinct consecutive timestamps.
fn typical_interval(samples: &[Sample]) -> Option<i64> {
    let mut gaps: Vec<i64> = samples
        .windows(2)
        .map(|w| w[1].ts - w[0].ts)
        .filter(|gap| *gap > 0)
        .collect();
    if gaps.is_empty() {
        return None;
    }
    gaps.sort_unstable();
    Some(gaps[gaps.len() / 2])
}

fn round_offset(raw: i64) -> i64 {
    let g = OFFSET_GRANULARITY_SECS;
    ((raw + g / 2).div_euclid(g)) * g
}

/// Options for applying a plan.
#[derive(Debug, Clone, Default)]
pub struct ApplyOptions {
    /// Permit plans whose offset came from the host timezone.
    pub accept_timezone_fallback: bool,
    /// Backup destination; defaults next to the database file.
    pub backup_path: Option<PathBuf>,
}

/// Back up the database, then shift the planned block and future-stamped
/// quota timestamps back by the plan's offset.
///
/// # Errors
/// Returns [`QuotadError::RepairRefused`] when the plan needs an opt-in
/// that was not given, has no usable offset, or no longer matches the data.
/// Storage failures roll the shift back; the backup is kept.
pub fn apply_repair(db: &Database, plan: &SkewPlan, options: &ApplyOptions) -> Result<RepairOutcome> {
    let Some(block) = plan.block.clone() else {
        return Ok(RepairOutcome {
            samples_shifted: 0,
            quota_rows_shifted: 0,
            backup_path: None,
        });
    };
    if plan.source == OffsetSource::TimezoneFallback && !options.accept_timezone_fallback {
        return Err(QuotadError::RepairRefused(
            "Offset was inferred from the host timezone, not from the data".to_string(),
        ));
    }
    if plan.offset_secs <= 0 {
        return Err(QuotadError::RepairRefused(
            "No positive offset could be inferred".to_string(),
        ));
    }

    let backup_path = match (options.backup_path.clone(), db.path()) {
        (Some(path), _) => Some(path),
        (None, Some(db_path)) => Some(default_backup_path(db_path, plan.cutoff)),
        (None, None) => None,
    };
    if let Some(path) = &backup_path {
        write_backup(db, path)?;
    } else {
        tracing::warn!("In-memory database, skipping backup");
    }

    let offset = plan.offset_secs;
    let cutoff = plan.cutoff;
    let (samples_shifted, quota_rows_shifted) = db.transaction(|tx| -> Result<(usize, usize)> {
        let current: i64 = tx
            .query_row(
                "SELECT COUNT(*) FROM usage_history WHERE rowid BETWEEN ?1 AND ?2 AND ts > ?3",
                params![block.first_rowid, block.last_rowid, cutoff],
                |r| r.get(0),
            )
            .context("verify skew block")?;
        if usize::try_from(current).ok() != Some(block.samples) {
            return Err(QuotadError::RepairRefused(
                "History changed since the plan was made".to_string(),
            ));
        }

        let samples = tx
            .execute(
                "UPDATE OR REPLACE usage_history SET ts = ts - ?3 \
                 WHERE rowid BETWEEN ?1 AND ?2 AND ts > ?4",
                params![block.first_rowid, block.last_rowid, offset, cutoff],
            )
            .context("shift skewed samples")?;
        let quotas = tx
            .execute(
                "UPDATE quotas SET \
                     created_at = CASE WHEN created_at > ?2 THEN created_at - ?1 ELSE created_at END, \
                     updated_at = CASE WHEN updated_at > ?2 THEN updated_at - ?1 ELSE updated_at END \
                 WHERE created_at > ?2 OR updated_at > ?2",
                params![offset, cutoff],
            )
            .context("shift skewed quota timestamps")?;
        Ok((samples, quotas))
    })?;

    tracing::info!(
        samples_shifted,
        quota_rows_shifted,
        offset_secs = offset,
        "Applied clock-skew repair"
    );
    Ok(RepairOutcome {
        samples_shifted,
        quota_rows_shifted,
        backup_path,
    })
}

fn default_backup_path(db_path: &Path, stamp: i64) -> PathBuf {
    let mut name = db_path
        .file_name()
        .map(std::ffi::OsStr::to_os_string)
        .unwrap_or_default();
    name.push(format!(".pre-skew-repair-{stamp}.bak"));
    db_path.with_file_name(name)
}

fn write_backup(db: &Database, path: &Path) -> Result<()> {
    if path.exists() {
        return Err(QuotadError::RepairRefused(format!(
            "Backup target {} already exists",
            path.display()
        )));
    }
    let target = path.to_string_lossy().into_owned();
    db.with_writer(|conn| conn.execute("VACUUM INTO ?1", [&target]))
        .context("write backup")?;
    tracing::info!(path = %path.display(), "Wrote pre-repair backup");
    Ok(())
}
