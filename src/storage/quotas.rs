//! Quota persistence and reconciliation.
//!
//! [`QuotaStore::save_quotas`] folds one cycle's readings for a service into
//! current state and history inside a single transaction:
//!
//! 1. readings with a non-finite number are dropped,
//! 2. each surviving reading is upserted by its deterministic id,
//! 3. a history sample is written at the cycle timestamp,
//! 4. metrics stored for the service but not reported this cycle are zeroed.
//!
//! "Current" means highest `seq` per (service, metric), never `updated_at`.

use std::collections::HashSet;
use std::sync::Arc;

use rusqlite::types::{ToSql, ToSqlOutput};
use rusqlite::{Connection, Row, params};
use serde::Serialize;
use sha2::{Digest, Sha256};

use super::db::Database;
use crate::core::models::{Quota, QuotaKind, QuotaReading, Replenishment, UsageSample};
use crate::error::{Result, SqliteResultExt, StorageError};

impl ToSql for QuotaKind {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

/// Deterministic quota id: `q_` + first 16 hex chars of
/// SHA-256(`service_id` NUL `metric`).
#[must_use]
pub fn quota_id(service_id: &str, metric: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(service_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(metric.as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("q_{}", &digest[..16])
}

/// What one `save_quotas` call did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveSummary {
    /// Readings written to `quotas`.
    pub upserted: usize,
    /// Readings dropped for NaN/infinite values.
    pub skipped_non_finite: usize,
    /// Stored metrics zeroed because they were absent this cycle.
    pub zeroed: Vec<String>,
    /// History samples written (readings plus zero samples).
    pub samples_written: usize,
}

const QUOTA_COLUMNS: &str = "q.id, q.service_id, q.metric, q.raw_limit, q.raw_used, \
     q.raw_remaining, q.\"limit\", q.used, q.remaining, q.type, q.replenishment_amount, \
     q.replenishment_period, q.reset_at, q.seq, q.created_at, q.updated_at";

/// Rows with no newer write for the same (service, metric).
const CURRENT_FILTER: &str = "NOT EXISTS (SELECT 1 FROM quotas o \
     WHERE o.service_id = q.service_id AND o.metric = q.metric \
     AND (o.seq > q.seq OR (o.seq = q.seq AND o.rowid > q.rowid)))";

fn quota_from_row(row: &Row<'_>) -> rusqlite::Result<Quota> {
    let amount: Option<f64> = row.get(10)?;
    let period: Option<String> = row.get(11)?;
    let kind: Option<String> = row.get(9)?;
    Ok(Quota {
        id: row.get(0)?,
        service_id: row.get(1)?,
        metric: row.get(2)?,
        raw_limit: row.get(3)?,
        raw_used: row.get(4)?,
        raw_remaining: row.get(5)?,
        limit: row.get(6)?,
        used: row.get(7)?,
        remaining: row.get(8)?,
        kind: kind.as_deref().and_then(QuotaKind::parse),
        replenishment: amount
            .zip(period)
            .map(|(amount, period)| Replenishment { amount, period }),
        reset_at: row.get(12)?,
        seq: row.get(13)?,
        created_at: row.get(14)?,
        updated_at: row.get(15)?,
    })
}

/// Access to `quotas` and `usage_history`.
#[derive(Debug, Clone)]
pub struct QuotaStore {
    db: Arc<Database>,
}

impl QuotaStore {
    #[must_use]
    pub const fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Persist one cycle's readings for a service.
    ///
    /// An input whose readings are all non-finite is a no-op: an empty
    /// surviving set is not evidence that metrics disappeared.
    ///
    /// # Errors
    /// Returns a storage error if the transaction fails; nothing from this
    /// call is persisted in that case.
    pub fn save_quotas(
        &self,
        service_id: &str,
        readings: &[QuotaReading],
        now: i64,
    ) -> Result<SaveSummary> {
        let mut summary = SaveSummary::default();
        let surviving: Vec<&QuotaReading> = readings
            .iter()
            .filter(|reading| match reading.non_finite_field() {
                Some(field) => {
                    tracing::warn!(
                        service = service_id,
                        metric = %reading.metric,
                        field,
                        "Skipping quota reading with non-finite value"
                    );
                    summary.skipped_non_finite += 1;
                    false
                }
                None => true,
            })
            .collect();

        if surviving.is_empty() {
            return Ok(summary);
        }

        // A metric reported with a bad number was still reported.
        let reported: HashSet<&str> = readings.iter().map(|r| r.metric.as_str()).collect();

        let written = self.db.transaction(|tx| -> Result<SaveSummary> {
            write_cycle(tx, service_id, &surviving, &reported, now)
        })?;

        summary.upserted = written.upserted;
        summary.zeroed = written.zeroed;
        summary.samples_written = written.samples_written;

        tracing::debug!(
            service = service_id,
            upserted = summary.upserted,
            zeroed = summary.zeroed.len(),
            skipped = summary.skipped_non_finite,
            "Saved quotas"
        );
        Ok(summary)
    }

    /// Current quota rows for a service, ordered by metric.
    ///
    /// # Errors
    /// Returns a storage error if the query fails.
    pub fn current_quotas(&self, service_id: &str) -> Result<Vec<Quota>> {
        Ok(self.db.query(
            &format!(
                "SELECT {QUOTA_COLUMNS} FROM quotas q \
                 WHERE q.service_id = ?1 AND {CURRENT_FILTER} ORDER BY q.metric"
            ),
            [service_id],
            quota_from_row,
        )?)
    }

    /// History samples for one metric within `[from, to]`, oldest first.
    ///
    /// # Errors
    /// Returns a storage error if the query fails.
    pub fn history(
        &self,
        service_id: &str,
        metric: &str,
        from: i64,
        to: i64,
    ) -> Result<Vec<UsageSample>> {
        Ok(self.db.query(
            "SELECT service_id, metric, ts, value FROM usage_history \
             WHERE service_id = ?1 AND metric = ?2 AND ts BETWEEN ?3 AND ?4 ORDER BY ts",
            params![service_id, metric, from, to],
            |row| {
                Ok(UsageSample {
                    service_id: row.get(0)?,
                    metric: row.get(1)?,
                    ts: row.get(2)?,
                    value: row.get(3)?,
                })
            },
        )?)
    }

    /// Most recent write time across a service's quotas.
    ///
    /// # Errors
    /// Returns a storage error if the query fails.
    pub fn latest_update(&self, service_id: &str) -> Result<Option<i64>> {
        let rows = self.db.query(
            "SELECT MAX(updated_at) FROM quotas WHERE service_id = ?1",
            [service_id],
            |row| row.get::<_, Option<i64>>(0),
        )?;
        Ok(rows.into_iter().next().flatten())
    }
}

fn write_cycle(
    tx: &Connection,
    service_id: &str,
    readings: &[&QuotaReading],
    reported: &HashSet<&str>,
    now: i64,
) -> Result<SaveSummary> {
    let mut summary = SaveSummary::default();
    let mut seq = next_seq(tx)?;

    for reading in readings {
        upsert_quota(tx, service_id, reading, seq, now)?;
        write_sample(tx, service_id, &reading.metric, now, reading.used)?;
        seq += 1;
        summary.upserted += 1;
        summary.samples_written += 1;
    }

    let stored = current_ids(tx, service_id)?;

    for (id, metric) in stored {
        if reported.contains(metric.as_str()) {
            continue;
        }
        tx.execute(
            "UPDATE quotas SET raw_limit = 0, raw_used = 0, raw_remaining = 0, \
                 \"limit\" = 0, used = 0, remaining = 0, seq = ?2, updated_at = ?3 \
             WHERE id = ?1",
            params![id, seq, now],
        )
        .context("zero missing quota")?;
        write_sample(tx, service_id, &metric, now, 0.0)?;
        seq += 1;
        summary.samples_written += 1;
        tracing::info!(service = service_id, metric = %metric, "Zeroed quota missing from provider");
        summary.zeroed.push(metric);
    }

    Ok(summary)
}

fn next_seq(tx: &Connection) -> std::result::Result<i64, StorageError> {
    tx.query_row("SELECT COALESCE(MAX(seq), 0) + 1 FROM quotas", [], |r| {
        r.get(0)
    })
    .context("next quota sequence")
}

#[allow(clippy::cast_possible_truncation)]
fn upsert_quota(
    tx: &Connection,
    service_id: &str,
    reading: &QuotaReading,
    seq: i64,
    now: i64,
) -> std::result::Result<(), StorageError> {
    let (amount, period) = reading
        .replenishment
        .as_ref()
        .map_or((None, None), |r| (Some(r.amount), Some(r.period.as_str())));

    tx.execute(
        "INSERT INTO quotas (id, service_id, metric, raw_limit, raw_used, raw_remaining, \
             \"limit\", used, remaining, type, replenishment_amount, replenishment_period, \
             reset_at, seq, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?15) \
         ON CONFLICT(id) DO UPDATE SET \
             raw_limit = excluded.raw_limit, \
             raw_used = excluded.raw_used, \
             raw_remaining = excluded.raw_remaining, \
             \"limit\" = excluded.\"limit\", \
             used = excluded.used, \
             remaining = excluded.remaining, \
             type = excluded.type, \
             replenishment_amount = excluded.replenishment_amount, \
             replenishment_period = excluded.replenishment_period, \
             reset_at = excluded.reset_at, \
             seq = excluded.seq, \
             updated_at = excluded.updated_at",
        params![
            quota_id(service_id, &reading.metric),
            service_id,
            reading.metric,
            reading.raw_limit.unwrap_or(reading.limit),
            reading.raw_used.unwrap_or(reading.used),
            reading.raw_remaining.unwrap_or(reading.remaining),
            reading.limit,
            reading.used,
            reading.remaining,
            reading.kind,
            amount,
            period,
            reading.reset_at.map(|ts| ts.trunc() as i64),
            seq,
            now,
        ],
    )
    .context("upsert quota")?;
    Ok(())
}

fn write_sample(
    tx: &Connection,
    service_id: &str,
    metric: &str,
    ts: i64,
    value: f64,
) -> std::result::Result<(), StorageError> {
    tx.execute(
        "INSERT OR REPLACE INTO usage_history (service_id, metric, ts, value) \
         VALUES (?1, ?2, ?3, ?4)",
        params![service_id, metric, ts, value],
    )
    .context("write usage sample")?;
    Ok(())
}

fn current_ids(
    tx: &Connection,
    service_id: &str,
) -> std::result::Result<Vec<(String, String)>, StorageError> {
    let mut stmt = tx
        .prepare_cached(&format!(
            "SELECT q.id, q.metric FROM quotas q \
             WHERE q.service_id = ?1 AND {CURRENT_FILTER} ORDER BY q.metric"
        ))
        .context("list current quotas")?;
    let rows = stmt
        .query_map([service_id], |r| Ok((r.get(0)?, r.get(1)?)))
        .context("list current quotas")?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .context("list current quotas")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::Service;
    use crate::core::provider::ProviderKind;
    use crate::storage::migrations::run_migrations;
    use crate::storage::services::ServiceStore;

    fn setup() -> (Arc<Database>, QuotaStore) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        run_migrations(&db).unwrap();
        ServiceStore::new(Arc::clone(&db))
            .upsert(&Service::new("svc", "Svc", ProviderKind::OpenRouter))
            .unwrap();
        let store = QuotaStore::new(Arc::clone(&db));
        (db, store)
    }

    fn count(db: &Database, sql: &str) -> i64 {
        db.query(sql, [], |r| r.get::<_, i64>(0)).unwrap()[0]
    }

    #[test]
    fn quota_id_is_stable_and_separated() {
        let id = quota_id("svc", "credits");
        assert!(id.starts_with("q_"));
        assert_eq!(id.len(), 18);
        assert_eq!(id, quota_id("svc", "credits"));
        // NUL separator keeps ("ab","c") and ("a","bc") apart.
        assert_ne!(quota_id("ab", "c"), quota_id("a", "bc"));
    }

    #[test]
    fn raw_values_default_to_normalized() {
        let (_db, store) = setup();
        store
            .save_quotas("svc", &[QuotaReading::new("credits", 10.0, 4.0, 6.0)], 100)
            .unwrap();
        let quota = &store.current_quotas("svc").unwrap()[0];
        assert_eq!(
            (quota.raw_limit, quota.raw_used, quota.raw_remaining),
            (10.0, 4.0, 6.0)
        );
    }

    #[test]
    fn repeated_upsert_keeps_one_row_and_created_at() {
        let (db, store) = setup();
        store
            .save_quotas("svc", &[QuotaReading::new("credits", 10.0, 4.0, 6.0)], 100)
            .unwrap();
        store
            .save_quotas("svc", &[QuotaReading::new("credits", 10.0, 5.0, 5.0)], 200)
            .unwrap();

        assert_eq!(count(&db, "SELECT COUNT(*) FROM quotas"), 1);
        let quota = &store.current_quotas("svc").unwrap()[0];
        assert_eq!(quota.used, 5.0);
        assert_eq!(quota.created_at, 100);
        assert_eq!(quota.updated_at, 200);
        assert_eq!(store.latest_update("svc").unwrap(), Some(200));
    }

    #[test]
    fn all_non_finite_input_is_a_noop() {
        let (db, store) = setup();
        store
            .save_quotas("svc", &[QuotaReading::new("credits", 10.0, 4.0, 6.0)], 100)
            .unwrap();

        let summary = store
            .save_quotas(
                "svc",
                &[QuotaReading::new("other", f64::NAN, 0.0, 0.0)],
                200,
            )
            .unwrap();
        assert_eq!(summary.skipped_non_finite, 1);
        assert!(summary.zeroed.is_empty());

        let quota = &store.current_quotas("svc").unwrap()[0];
        assert_eq!(quota.used, 4.0);
        assert_eq!(count(&db, "SELECT COUNT(*) FROM usage_history"), 1);
    }

    #[test]
    fn non_finite_metric_is_not_treated_as_missing() {
        let (db, store) = setup();
        store
            .save_quotas(
                "svc",
                &[
                    QuotaReading::new("a", 10.0, 1.0, 9.0),
                    QuotaReading::new("b", 5.0, 2.0, 3.0),
                ],
                100,
            )
            .unwrap();

        let summary = store
            .save_quotas(
                "svc",
                &[
                    QuotaReading::new("a", 10.0, 3.0, 7.0),
                    QuotaReading::new("b", 5.0, f64::NAN, 3.0),
                ],
                200,
            )
            .unwrap();

        assert!(summary.zeroed.is_empty());
        assert_eq!(summary.skipped_non_finite, 1);
        assert_eq!(summary.samples_written, 1);

        let b = store.history("svc", "b", 0, 1_000).unwrap();
        assert_eq!(b.len(), 1);
        assert_eq!(b[0].ts, 100);
        let current = store.current_quotas("svc").unwrap();
        let stored_b = current.iter().find(|q| q.metric == "b").unwrap();
        assert_eq!(stored_b.used, 2.0);
        assert_eq!(count(&db, "SELECT COUNT(*) FROM usage_history WHERE ts = 200"), 1);
    }

    #[test]
    fn kind_replenishment_and_reset_round_trip() {
        let (_db, store) = setup();
        let reading = QuotaReading::new("requests", 60.0, 0.0, 60.0)
            .with_kind(QuotaKind::RateLimit)
            .with_replenishment(60.0, "10s")
            .with_reset_at(1_700_000_000.75);
        store.save_quotas("svc", &[reading], 100).unwrap();

        let quota = &store.current_quotas("svc").unwrap()[0];
        assert_eq!(quota.kind, Some(QuotaKind::RateLimit));
        assert_eq!(
            quota.replenishment,
            Some(Replenishment {
                amount: 60.0,
                period: "10s".to_string()
            })
        );
        assert_eq!(quota.reset_at, Some(1_700_000_000));
    }

    #[test]
    fn zeroing_preserves_kind_and_bumps_seq() {
        let (_db, store) = setup();
        store
            .save_quotas(
                "svc",
                &[
                    QuotaReading::new("a", 10.0, 1.0, 9.0).with_kind(QuotaKind::Usage),
                    QuotaReading::new("b", 5.0, 1.0, 4.0),
                ],
                100,
            )
            .unwrap();
        let before = store.current_quotas("svc").unwrap();

        let summary = store
            .save_quotas("svc", &[QuotaReading::new("b", 5.0, 2.0, 3.0)], 200)
            .unwrap();
        assert_eq!(summary.zeroed, vec!["a"]);

        let after = store.current_quotas("svc").unwrap();
        let a = after.iter().find(|q| q.metric == "a").unwrap();
        assert!(a.is_zeroed());
        assert_eq!(a.kind, Some(QuotaKind::Usage));
        assert!(a.seq > before.iter().map(|q| q.seq).max().unwrap());

        let samples = store.history("svc", "a", 0, 1_000).unwrap();
        let values: Vec<f64> = samples.iter().map(|s| s.value).collect();
        assert_eq!(values, vec![1.0, 0.0]);
    }
}
