//! Service rows.
//!
//! Services are seeded from the config file on startup. Deleting a service
//! cascades to its quotas and history.

use std::sync::Arc;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{Row, params};
use serde::Serialize;

use super::db::Database;
use crate::core::models::Service;
use crate::core::provider::ProviderKind;
use crate::error::{Result, SqliteResultExt};
use crate::util::time::now_unix;

impl ToSql for ProviderKind {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.cli_name()))
    }
}

impl FromSql for ProviderKind {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let name = value.as_str()?;
        Self::from_cli_name(name).map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

const SERVICE_COLUMNS: &str = "id, name, provider, api_key, bearer_token, base_url, enabled, \
     display_order, created_at, updated_at";

fn service_from_row(row: &Row<'_>) -> rusqlite::Result<Service> {
    Ok(Service {
        id: row.get(0)?,
        name: row.get(1)?,
        provider: row.get(2)?,
        api_key: row.get(3)?,
        bearer_token: row.get(4)?,
        base_url: row.get(5)?,
        enabled: row.get(6)?,
        display_order: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

/// Result of reconciling configured services with stored ones.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Services inserted or updated from config.
    pub upserted: usize,
    /// Stored services missing from config that were disabled.
    pub disabled: Vec<String>,
}

/// Access to the `services` table.
#[derive(Debug, Clone)]
pub struct ServiceStore {
    db: Arc<Database>,
}

impl ServiceStore {
    #[must_use]
    pub const fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert or update a service. `created_at` survives updates.
    ///
    /// # Errors
    /// Returns a storage error if the write fails.
    pub fn upsert(&self, service: &Service) -> Result<()> {
        self.db.transaction(|tx| {
            upsert_row(tx, service, now_unix())?;
            Ok(())
        })
    }

    /// Make the stored services match `configured`.
    ///
    /// Configured services are upserted. Stored services absent from the
    /// list are disabled rather than deleted so their history survives.
    ///
    /// # Errors
    /// Returns a storage error if the transaction fails.
    pub fn sync(&self, configured: &[Service]) -> Result<SyncReport> {
        let now = now_unix();
        let report = self.db.transaction(|tx| -> Result<SyncReport> {
            let mut report = SyncReport::default();
            for service in configured {
                upsert_row(tx, service, now)?;
                report.upserted += 1;
            }

            let mut stmt = tx
                .prepare("SELECT id FROM services WHERE enabled = 1")
                .context("list enabled services")?;
            let stored: Vec<String> = stmt
                .query_map([], |r| r.get(0))
                .context("list enabled services")?
                .collect::<rusqlite::Result<_>>()
                .context("list enabled services")?;

            for id in stored {
                if configured.iter().all(|s| s.id != id) {
                    tx.execute(
                        "UPDATE services SET enabled = 0, updated_at = ?2 WHERE id = ?1",
                        params![id, now],
                    )
                    .context("disable unconfigured service")?;
                    report.disabled.push(id);
                }
            }
            Ok(report)
        })?;

        if !report.disabled.is_empty() {
            tracing::info!(disabled = ?report.disabled, "Disabled services missing from config");
        }
        Ok(report)
    }

    /// Enabled services in polling order.
    ///
    /// # Errors
    /// Returns a storage error if the query fails.
    pub fn list_enabled(&self) -> Result<Vec<Service>> {
        Ok(self.db.query(
            &format!(
                "SELECT {SERVICE_COLUMNS} FROM services WHERE enabled = 1 \
                 ORDER BY display_order, id"
            ),
            [],
            service_from_row,
        )?)
    }

    /// All services, enabled or not, in polling order.
    ///
    /// # Errors
    /// Returns a storage error if the query fails.
    pub fn list_all(&self) -> Result<Vec<Service>> {
        Ok(self.db.query(
            &format!("SELECT {SERVICE_COLUMNS} FROM services ORDER BY display_order, id"),
            [],
            service_from_row,
        )?)
    }

    /// Look up one service.
    ///
    /// # Errors
    /// Returns a storage error if the query fails.
    pub fn get(&self, id: &str) -> Result<Option<Service>> {
        let mut rows = self.db.query(
            &format!("SELECT {SERVICE_COLUMNS} FROM services WHERE id = ?1"),
            [id],
            service_from_row,
        )?;
        Ok(rows.pop())
    }

    /// Replace a service's credentials. Returns `false` if it does not exist.
    ///
    /// # Errors
    /// Returns a storage error if the write fails.
    pub fn rotate_credentials(
        &self,
        id: &str,
        api_key: Option<&str>,
        bearer_token: Option<&str>,
    ) -> Result<bool> {
        let changed = self.db.transaction(|tx| -> Result<usize> {
            Ok(tx
                .execute(
                    "UPDATE services SET api_key = ?2, bearer_token = ?3, updated_at = ?4 \
                     WHERE id = ?1",
                    params![id, api_key, bearer_token, now_unix()],
                )
                .context("rotate credentials")?)
        })?;
        if changed > 0 {
            tracing::info!(service = id, "Rotated service credentials");
        }
        Ok(changed > 0)
    }

    /// Delete a service and, by cascade, its quotas and history.
    ///
    /// # Errors
    /// Returns a storage error if the write fails.
    pub fn delete(&self, id: &str) -> Result<bool> {
        let changed = self.db.transaction(|tx| -> Result<usize> {
            Ok(tx
                .execute("DELETE FROM services WHERE id = ?1", [id])
                .context("delete service")?)
        })?;
        Ok(changed > 0)
    }
}

fn upsert_row(
    tx: &rusqlite::Connection,
    service: &Service,
    now: i64,
) -> std::result::Result<usize, crate::error::StorageError> {
    tx.execute(
        "INSERT INTO services (id, name, provider, api_key, bearer_token, base_url, enabled, \
             display_order, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9) \
         ON CONFLICT(id) DO UPDATE SET \
             name = excluded.name, \
             provider = excluded.provider, \
             api_key = excluded.api_key, \
             bearer_token = excluded.bearer_token, \
             base_url = excluded.base_url, \
             enabled = excluded.enabled, \
             display_order = excluded.display_order, \
             updated_at = excluded.updated_at",
        params![
            service.id,
            service.name,
            service.provider,
            service.api_key,
            service.bearer_token,
            service.base_url,
            service.enabled,
            service.display_order,
            now,
        ],
    )
    .context("upsert service")
}
