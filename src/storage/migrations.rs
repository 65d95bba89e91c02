//! Versioned schema migrations.
//!
//! Migrations run once at startup in a fixed order, each inside its own
//! retried transaction, and are recorded by name in the `migrations` table.
//! Any failure aborts startup.

use std::collections::HashSet;

use rusqlite::{Connection, params};
use serde::Serialize;

use super::db::Database;
use super::legacy;
use super::quotas::quota_id;
use super::schema::{
    ADDITIVE_COLUMNS, BASE_INDEXES, MIGRATIONS_TABLE, SEQ_INDEXES, TABLES,
};
use super::transaction::run_in_transaction;
use crate::error::{QuotadError, Result, SqliteResultExt, StorageError};
use crate::util::time::now_unix;

type ApplyFn = fn(&Connection) -> std::result::Result<(), StorageError>;

#[derive(Debug, Clone, Copy)]
struct Migration {
    name: &'static str,
    apply: ApplyFn,
    /// Re-executed on every start even when already recorded.
    always_run: bool,
    /// Runs with `foreign_keys = OFF` (table rebuilds).
    rebuilds_tables: bool,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        name: "001_baseline",
        apply: apply_baseline,
        always_run: false,
        rebuilds_tables: false,
    },
    Migration {
        name: "002_additive_columns",
        apply: apply_additive_columns,
        always_run: true,
        rebuilds_tables: false,
    },
    Migration {
        name: "003_legacy_timestamps",
        apply: apply_legacy_timestamps,
        always_run: false,
        rebuilds_tables: true,
    },
    Migration {
        name: "004_quota_sequence",
        apply: apply_quota_sequence,
        always_run: false,
        rebuilds_tables: false,
    },
];

/// Names of all migrations in application order.
#[must_use]
pub fn migration_names() -> Vec<&'static str> {
    MIGRATIONS.iter().map(|m| m.name).collect()
}

/// What a migration run did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    /// Migrations applied for the first time.
    pub applied: Vec<&'static str>,
    /// Already-recorded migrations re-executed because they always run.
    pub rerun: Vec<&'static str>,
    /// Already-recorded migrations skipped.
    pub skipped: Vec<&'static str>,
}

impl MigrationReport {
    /// Whether this run changed the recorded schema version.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.applied.is_empty()
    }
}

/// Apply all pending migrations.
///
/// # Errors
/// Returns [`QuotadError::Migration`] naming the first migration that
/// failed; its transaction has been rolled back.
pub fn run_migrations(db: &Database) -> Result<MigrationReport> {
    db.execute_script(MIGRATIONS_TABLE)
        .map_err(|e| QuotadError::migration("migrations_table", e))?;

    let recorded: HashSet<String> = db
        .query("SELECT name FROM migrations", [], |row| row.get(0))
        .map_err(|e| QuotadError::migration("migrations_table", e))?
        .into_iter()
        .collect();

    let mut report = MigrationReport::default();

    for migration in MIGRATIONS {
        let already = recorded.contains(migration.name);
        if already && !migration.always_run {
            report.skipped.push(migration.name);
            continue;
        }

        tracing::debug!(migration = migration.name, "Applying migration");
        db.with_writer(|conn| apply_one(conn, migration, !already))
            .map_err(|e| {
                tracing::error!(migration = migration.name, error = %e, "Migration failed");
                QuotadError::migration(migration.name, e)
            })?;

        if already {
            report.rerun.push(migration.name);
        } else {
            tracing::info!(migration = migration.name, "Applied migration");
            report.applied.push(migration.name);
        }
    }

    Ok(report)
}

fn apply_one(
    conn: &Connection,
    migration: &Migration,
    record: bool,
) -> std::result::Result<(), StorageError> {
    if migration.rebuilds_tables {
        conn.pragma_update(None, "foreign_keys", false)
            .context("disable foreign keys")?;
    }

    let result = run_in_transaction(conn, |tx| -> std::result::Result<(), StorageError> {
        (migration.apply)(tx)?;
        if record {
            tx.execute(
                "INSERT OR IGNORE INTO migrations (name, applied_at) VALUES (?1, ?2)",
                params![migration.name, now_unix()],
            )
            .context("record migration")?;
        }
        Ok(())
    });

    if migration.rebuilds_tables {
        conn.pragma_update(None, "foreign_keys", true)
            .context("enable foreign keys")?;
    }
    result
}

fn apply_baseline(conn: &Connection) -> std::result::Result<(), StorageError> {
    for table in TABLES {
        conn.execute_batch(&table.create_sql(table.name))
            .context("create baseline table")?;
    }
    for index in BASE_INDEXES {
        conn.execute_batch(index).context("create baseline index")?;
    }
    Ok(())
}

fn apply_additive_columns(conn: &Connection) -> std::result::Result<(), StorageError> {
    let mut added_raw = false;
    for (table, column, decl) in ADDITIVE_COLUMNS {
        let sql = format!("ALTER TABLE \"{table}\" ADD COLUMN \"{column}\" {decl}");
        match conn.execute_batch(&sql) {
            Ok(()) => {
                tracing::info!(table, column, "Added column");
                if *table == "quotas" && column.starts_with("raw_") {
                    added_raw = true;
                }
            }
            Err(err) if is_duplicate_column(&err) => {}
            Err(err) => return Err(StorageError::from_sqlite("add column", &err)),
        }
    }

    // Rows written before raw values existed carried only normalized numbers.
    if added_raw {
        conn.execute(
            "UPDATE quotas SET raw_limit = \"limit\", raw_used = used, raw_remaining = remaining \
             WHERE raw_limit = 0 AND raw_used = 0 AND raw_remaining = 0",
            [],
        )
        .context("backfill raw quota values")?;
    }
    Ok(())
}

fn is_duplicate_column(err: &rusqlite::Error) -> bool {
    err.to_string().contains("duplicate column name")
}

fn apply_legacy_timestamps(conn: &Connection) -> std::result::Result<(), StorageError> {
    let report = legacy::reconcile_legacy_timestamps(conn)?;
    if report.tables_rebuilt.is_empty() {
        tracing::debug!("No legacy timestamp columns found");
    } else {
        tracing::info!(
            tables = ?report.tables_rebuilt,
            rows_copied = report.rows_copied,
            duplicates_collapsed = report.duplicates_collapsed,
            rows_dropped = report.rows_dropped,
            timestamps_defaulted = report.timestamps_defaulted,
            "Rebuilt legacy tables"
        );
    }
    Ok(())
}

fn apply_quota_sequence(conn: &Connection) -> std::result::Result<(), StorageError> {
    conn.execute("UPDATE quotas SET seq = rowid WHERE seq = 0", [])
        .context("backfill quota sequence")?;
    adopt_quota_ids(conn)?;
    for index in SEQ_INDEXES {
        conn.execute_batch(index).context("create sequence index")?;
    }
    Ok(())
}

/// Collapse each (service, metric) to its current row and give that row the
/// deterministic id the upsert conflicts on.
fn adopt_quota_ids(conn: &Connection) -> std::result::Result<(), StorageError> {
    let superseded = conn
        .execute(
            "DELETE FROM quotas WHERE EXISTS (SELECT 1 FROM quotas o \
                 WHERE o.service_id = quotas.service_id AND o.metric = quotas.metric \
                 AND (o.seq > quotas.seq OR (o.seq = quotas.seq AND o.rowid > quotas.rowid)))",
            [],
        )
        .context("drop superseded quota rows")?;

    let rows: Vec<(String, String, String)> = {
        let mut stmt = conn
            .prepare("SELECT id, service_id, metric FROM quotas")
            .context("list quota ids")?;
        let mapped = stmt
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))
            .context("list quota ids")?;
        mapped
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("list quota ids")?
    };

    let mut renamed = 0usize;
    for (id, service_id, metric) in rows {
        let target = quota_id(&service_id, &metric);
        if id != target {
            conn.execute(
                "UPDATE quotas SET id = ?1 WHERE id = ?2",
                params![target, id],
            )
            .context("adopt quota id")?;
            renamed += 1;
        }
    }

    if superseded > 0 || renamed > 0 {
        tracing::info!(superseded, renamed, "Adopted legacy quota rows");
    }
    Ok(())
}
