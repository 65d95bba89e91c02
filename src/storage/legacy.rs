//! Legacy timestamp reconciliation.
//!
//! Early databases stored `created_at`, `updated_at` and `ts` as text. Any
//! table still declaring a timestamp column with a non-integer type is
//! rebuilt into the target shape: create a shadow table, copy rows in rowid
//! order while converting timestamps to unix seconds, drop the original,
//! rename the shadow. History rows whose timestamps collapse onto the same
//! second keep the last-inserted value.
//!
//! Callers must disable foreign keys before invoking this and run it inside
//! a transaction.

use rusqlite::types::Value;
use rusqlite::{Connection, params_from_iter};

use super::schema::{BASE_INDEXES, SEQ_INDEXES, TABLES, TableDef};
use crate::error::{SqliteResultExt, StorageError};
use crate::util::time::{numeric_to_seconds, now_unix, parse_legacy_timestamp};

/// Outcome of a reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LegacyReport {
    /// Tables that were rebuilt.
    pub tables_rebuilt: Vec<String>,
    /// Rows read from legacy tables and written to their replacements.
    pub rows_copied: usize,
    /// History rows replaced by a later row with the same whole-second key.
    pub duplicates_collapsed: usize,
    /// Rows skipped: unparseable history timestamps or orphaned service ids.
    pub rows_dropped: usize,
    /// `created_at`/`updated_at` values that could not be parsed and were
    /// set to the migration time.
    pub timestamps_defaulted: usize,
}

/// Column metadata from `PRAGMA table_info`.
#[derive(Debug, Clone)]
struct ColumnInfo {
    name: String,
    decl_type: String,
}

/// Whether `table` has a timestamp column declared with a non-integer type.
///
/// # Errors
/// Returns a [`StorageError`] if the table cannot be introspected.
pub fn is_legacy_table(conn: &Connection, table: &TableDef) -> Result<bool, StorageError> {
    let columns = table_info(conn, table.name)?;
    Ok(columns.iter().any(|col| {
        table.timestamp_columns.contains(&col.name.as_str())
            && col.name != "reset_at"
            && !col.decl_type.to_ascii_uppercase().contains("INT")
    }))
}

/// Rebuild every legacy table. A database with no legacy tables is untouched.
///
/// # Errors
/// Returns a [`StorageError`] if any rebuild step fails or the foreign key
/// check finds dangling rows afterwards.
pub fn reconcile_legacy_timestamps(conn: &Connection) -> Result<LegacyReport, StorageError> {
    let mut report = LegacyReport::default();
    let now = now_unix();

    for table in TABLES {
        if !is_legacy_table(conn, table)? {
            continue;
        }
        rebuild_table(conn, table, now, &mut report)?;
        report.tables_rebuilt.push(table.name.to_string());
    }

    if !report.tables_rebuilt.is_empty() {
        for index in BASE_INDEXES.iter().chain(SEQ_INDEXES) {
            conn.execute_batch(index).context("recreate index")?;
        }
        check_foreign_keys(conn)?;
    }

    Ok(report)
}

fn rebuild_table(
    conn: &Connection,
    table: &TableDef,
    now: i64,
    report: &mut LegacyReport,
) -> Result<(), StorageError> {
    let shadow = format!("{}_rebuild", table.name);
    conn.execute_batch(&format!("DROP TABLE IF EXISTS \"{shadow}\""))
        .context("drop stale shadow table")?;
    conn.execute_batch(&table.create_sql(&shadow))
        .context("create shadow table")?;

    let legacy_columns: Vec<String> = table_info(conn, table.name)?
        .into_iter()
        .map(|c| c.name)
        .collect();
    let columns: Vec<&str> = table
        .column_names()
        .filter(|name| legacy_columns.iter().any(|c| c == name))
        .collect();

    let column_list = columns
        .iter()
        .map(|c| format!("\"{c}\""))
        .collect::<Vec<_>>()
        .join(", ");
    let placeholders = vec!["?"; columns.len()].join(", ");
    let orphan_filter = if table.owned_by_service {
        " WHERE service_id IN (SELECT id FROM services)"
    } else {
        ""
    };

    let select = format!(
        "SELECT {column_list} FROM \"{}\"{orphan_filter} ORDER BY rowid",
        table.name
    );
    let insert =
        format!("INSERT OR REPLACE INTO \"{shadow}\" ({column_list}) VALUES ({placeholders})");

    if table.owned_by_service {
        let total: i64 = conn
            .query_row(&format!("SELECT COUNT(*) FROM \"{}\"", table.name), [], |r| {
                r.get(0)
            })
            .context("count legacy rows")?;
        let kept: i64 = conn
            .query_row(
                &format!("SELECT COUNT(*) FROM \"{}\"{orphan_filter}", table.name),
                [],
                |r| r.get(0),
            )
            .context("count owned legacy rows")?;
        report.rows_dropped += usize::try_from(total - kept).unwrap_or(0);
    }

    let mut read = conn.prepare(&select).context("read legacy rows")?;
    let mut write = conn.prepare(&insert).context("prepare shadow insert")?;
    let mut rows = read.query([]).context("read legacy rows")?;
    let mut inserted = 0usize;

    while let Some(row) = rows.next().context("read legacy row")? {
        let mut values = Vec::with_capacity(columns.len());
        let mut keep = true;

        for (idx, column) in columns.iter().enumerate() {
            let value: Value = row.get(idx).context("read legacy value")?;
            if !table.timestamp_columns.contains(column) {
                values.push(value);
                continue;
            }
            match (convert_timestamp(&value), *column) {
                (Some(seconds), _) => values.push(Value::Integer(seconds)),
                (None, "reset_at") => values.push(Value::Null),
                (None, "ts") => {
                    keep = false;
                    break;
                }
                (None, _) => {
                    report.timestamps_defaulted += 1;
                    values.push(Value::Integer(now));
                }
            }
        }

        if !keep {
            report.rows_dropped += 1;
            continue;
        }
        write
            .execute(params_from_iter(values))
            .context("copy legacy row")?;
        inserted += 1;
    }
    drop(rows);
    drop(read);
    drop(write);

    let final_count: i64 = conn
        .query_row(&format!("SELECT COUNT(*) FROM \"{shadow}\""), [], |r| {
            r.get(0)
        })
        .context("count rebuilt rows")?;
    let final_count = usize::try_from(final_count).unwrap_or(0);

    report.rows_copied += inserted;
    report.duplicates_collapsed += inserted.saturating_sub(final_count);

    conn.execute_batch(&format!(
        "DROP TABLE \"{table}\"; ALTER TABLE \"{shadow}\" RENAME TO \"{table}\";",
        table = table.name
    ))
    .context("swap rebuilt table")?;

    tracing::debug!(
        table = table.name,
        rows = inserted,
        kept = final_count,
        "Rebuilt legacy table"
    );
    Ok(())
}

#[allow(clippy::cast_precision_loss)]
fn convert_timestamp(value: &Value) -> Option<i64> {
    match value {
        Value::Integer(i) => numeric_to_seconds(*i as f64),
        Value::Real(f) => numeric_to_seconds(*f),
        Value::Text(s) => parse_legacy_timestamp(s),
        Value::Null | Value::Blob(_) => None,
    }
}

fn table_info(conn: &Connection, table: &str) -> Result<Vec<ColumnInfo>, StorageError> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info(\"{table}\")"))
        .context("introspect table")?;
    let rows = stmt
        .query_map([], |row| {
            Ok(ColumnInfo {
                name: row.get(1)?,
                decl_type: row.get(2)?,
            })
        })
        .context("introspect table")?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .context("introspect table")
}

fn check_foreign_keys(conn: &Connection) -> Result<(), StorageError> {
    let mut stmt = conn
        .prepare("PRAGMA foreign_key_check")
        .context("foreign key check")?;
    let violations: Vec<String> = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .context("foreign key check")?
        .collect::<rusqlite::Result<_>>()
        .context("foreign key check")?;

    if violations.is_empty() {
        Ok(())
    } else {
        Err(StorageError::Constraint {
            context: "legacy rebuild foreign key check".to_string(),
            message: format!(
                "{} dangling rows in {}",
                violations.len(),
                violations.join(", ")
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::schema::{QUOTAS, SERVICES, USAGE_HISTORY};

    fn legacy_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE services (id TEXT PRIMARY KEY, name TEXT NOT NULL, provider TEXT NOT NULL, \
                 api_key TEXT, enabled INTEGER NOT NULL DEFAULT 1, created_at TEXT NOT NULL, \
                 updated_at TEXT NOT NULL);
             CREATE TABLE usage_history (service_id TEXT NOT NULL, metric TEXT NOT NULL, \
                 ts TEXT NOT NULL, value REAL NOT NULL, PRIMARY KEY (service_id, metric, ts));
             CREATE TABLE quotas (id TEXT PRIMARY KEY, service_id TEXT NOT NULL, metric TEXT NOT NULL, \
                 \"limit\" REAL NOT NULL, used REAL NOT NULL, remaining REAL NOT NULL, \
                 created_at INTEGER NOT NULL, updated_at INTEGER NOT NULL);",
        )
        .unwrap();
        conn
    }

    #[test]
    fn detects_text_timestamp_columns() {
        let conn = legacy_conn();
        assert!(is_legacy_table(&conn, &SERVICES).unwrap());
        assert!(is_legacy_table(&conn, &USAGE_HISTORY).unwrap());
        assert!(!is_legacy_table(&conn, &QUOTAS).unwrap());
    }

    #[test]
    fn collapses_subsecond_history_keeping_last() {
        let conn = legacy_conn();
        conn.execute_batch(
            "INSERT INTO services VALUES ('svc', 'Svc', 'deepseek', NULL, 1, \
                 '2024-03-01 10:00:00', '2024-03-01T10:00:00Z');
             INSERT INTO usage_history VALUES ('svc', 'balance_usd', '2024-03-01 10:00:00.100', 1.0);
             INSERT INTO usage_history VALUES ('svc', 'balance_usd', '2024-03-01 10:00:00.900', 2.0);
             INSERT INTO usage_history VALUES ('svc', 'balance_usd', '1709287260000', 3.0);
             INSERT INTO usage_history VALUES ('svc', 'balance_usd', 'garbage', 4.0);
             INSERT INTO usage_history VALUES ('ghost', 'balance_usd', '1709287200', 5.0);",
        )
        .unwrap();

        let report = reconcile_legacy_timestamps(&conn).unwrap();
        assert_eq!(report.tables_rebuilt, vec!["services", "usage_history"]);
        assert_eq!(report.duplicates_collapsed, 1);
        assert_eq!(report.rows_dropped, 2);

        let mut stmt = conn
            .prepare("SELECT ts, value FROM usage_history ORDER BY ts")
            .unwrap();
        let rows: Vec<(i64, f64)> = stmt
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))
            .unwrap()
            .collect::<rusqlite::Result<_>>()
            .unwrap();
        assert_eq!(rows, vec![(1_709_287_200, 2.0), (1_709_287_260, 3.0)]);

        let created: i64 = conn
            .query_row("SELECT created_at FROM services", [], |r| r.get(0))
            .unwrap();
        assert_eq!(created, 1_709_287_200);
        assert!(!is_legacy_table(&conn, &SERVICES).unwrap());
    }

    #[test]
    fn clean_schema_is_untouched() {
        let conn = Connection::open_in_memory().unwrap();
        for table in TABLES {
            conn.execute_batch(&table.create_sql(table.name)).unwrap();
        }
        let report = reconcile_legacy_timestamps(&conn).unwrap();
        assert_eq!(report, LegacyReport::default());
    }
}
