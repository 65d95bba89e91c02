//! Transaction scoping with busy retry.
//!
//! Every write transaction in quotad goes through [`run_in_transaction`].
//! Contention on `BEGIN IMMEDIATE` or `COMMIT` is retried on a fixed backoff
//! schedule; failures inside the body are rolled back and surfaced as-is.

use std::time::Duration;

use rusqlite::Connection;

use crate::error::{SqliteResultExt, StorageError};

/// Sleep before each retry. The first attempt runs immediately, so at most
/// `BUSY_BACKOFF.len() + 1` attempts are made.
pub const BUSY_BACKOFF: [Duration; 3] = [
    Duration::from_millis(25),
    Duration::from_millis(75),
    Duration::from_millis(150),
];

/// Upper bound on attempts for one logical operation.
pub const MAX_ATTEMPTS: usize = BUSY_BACKOFF.len() + 1;

/// Retry `op` while it fails with [`StorageError::Busy`].
///
/// `op` receives the 1-based attempt number. Non-busy errors return
/// immediately; the last busy error is returned once the schedule is spent.
///
/// # Errors
/// Returns the first non-busy error, or the final busy error.
pub fn retry_on_busy<T>(
    context: &str,
    mut op: impl FnMut(usize) -> Result<T, StorageError>,
) -> Result<T, StorageError> {
    let mut attempt = 1;
    loop {
        match op(attempt) {
            Err(err) if err.is_busy() && attempt < MAX_ATTEMPTS => {
                let delay = BUSY_BACKOFF[attempt - 1];
                tracing::debug!(
                    context,
                    attempt,
                    delay_ms = delay.as_millis(),
                    "Database busy, retrying"
                );
                std::thread::sleep(delay);
                attempt += 1;
            }
            Err(err) => {
                if err.is_busy() {
                    tracing::warn!(context, attempts = attempt, "Database still busy, giving up");
                }
                return Err(err);
            }
            Ok(value) => return Ok(value),
        }
    }
}

/// Run `body` between `BEGIN IMMEDIATE` and `COMMIT`.
///
/// Busy on begin or commit retries the whole transaction (the body is
/// re-run). Any failure rolls back; a failed rollback is logged and the
/// original error wins.
///
/// # Errors
/// Returns the body's error unchanged, or a [`StorageError`] converted into
/// `E` when begin/commit fails.
pub fn run_in_transaction<T, E, F>(conn: &Connection, mut body: F) -> Result<T, E>
where
    E: From<StorageError>,
    F: FnMut(&Connection) -> Result<T, E>,
{
    let outcome = retry_on_busy("transaction", |_attempt| {
        conn.execute_batch("BEGIN IMMEDIATE")
            .context("begin transaction")?;

        let result = match body(conn) {
            Ok(value) => value,
            Err(err) => {
                rollback_quietly(conn);
                return Ok(Err(err));
            }
        };

        if let Err(err) = conn.execute_batch("COMMIT").context("commit transaction") {
            rollback_quietly(conn);
            return Err(err);
        }
        Ok(Ok(result))
    });

    match outcome {
        Ok(inner) => inner,
        Err(err) => Err(E::from(err)),
    }
}

fn rollback_quietly(conn: &Connection) {
    if conn.is_autocommit() {
        return;
    }
    if let Err(err) = conn.execute_batch("ROLLBACK") {
        tracing::warn!(error = %err, "Rollback failed");
    }
}
