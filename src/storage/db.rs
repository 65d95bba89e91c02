//! SQLite storage engine.
//!
//! One writer connection behind a mutex plus, for file-backed databases, a
//! read-only connection so readers are not blocked by an open write
//! transaction (WAL mode). In-memory databases share the writer.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rusqlite::{Connection, OpenFlags, Params, Row};

use super::transaction::run_in_transaction;
use crate::error::{SqliteResultExt, StorageError};

/// Default busy timeout applied to every connection.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(250);

/// Options for opening a [`Database`].
#[derive(Debug, Clone)]
pub struct DbOptions {
    /// How long SQLite itself waits on a lock before reporting busy.
    pub busy_timeout: Duration,
}

impl Default for DbOptions {
    fn default() -> Self {
        Self {
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }
}

impl DbOptions {
    /// Override the busy timeout.
    #[must_use]
    pub const fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }
}

/// Shared database handle.
pub struct Database {
    writer: Mutex<Connection>,
    reader: Option<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.path)
            .field("has_reader", &self.reader.is_some())
            .finish_non_exhaustive()
    }
}

impl Database {
    /// Open (or create) a file-backed database.
    ///
    /// New files are created with `auto_vacuum = INCREMENTAL`; every
    /// connection runs in WAL mode with foreign keys enforced.
    ///
    /// # Errors
    /// Returns [`StorageError::Open`] if the parent directory cannot be
    /// created or either connection cannot be opened and configured.
    pub fn open(path: &Path, options: &DbOptions) -> Result<Self, StorageError> {
        let open_err = |message: String| StorageError::Open {
            path: path.display().to_string(),
            message,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| open_err(e.to_string()))?;
        }

        let is_new = !path.exists();
        let writer = Connection::open(path).map_err(|e| open_err(e.to_string()))?;
        if is_new {
            writer
                .pragma_update(None, "auto_vacuum", "INCREMENTAL")
                .map_err(|e| open_err(e.to_string()))?;
        }
        configure_writer(&writer, options).map_err(|e| open_err(e.to_string()))?;

        let reader = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY
                | OpenFlags::SQLITE_OPEN_NO_MUTEX
                | OpenFlags::SQLITE_OPEN_URI,
        )
        .map_err(|e| open_err(e.to_string()))?;
        reader
            .busy_timeout(options.busy_timeout)
            .map_err(|e| open_err(e.to_string()))?;

        tracing::debug!(path = %path.display(), is_new, "Opened database");

        Ok(Self {
            writer: Mutex::new(writer),
            reader: Some(Mutex::new(reader)),
            path: Some(path.to_path_buf()),
        })
    }

    /// Open an in-memory database (tests, dry runs).
    ///
    /// # Errors
    /// Returns [`StorageError::Open`] if SQLite cannot allocate the database.
    pub fn open_in_memory() -> Result<Self, StorageError> {
        let open_err = |e: rusqlite::Error| StorageError::Open {
            path: ":memory:".to_string(),
            message: e.to_string(),
        };
        let writer = Connection::open_in_memory().map_err(open_err)?;
        configure_writer(&writer, &DbOptions::default()).map_err(open_err)?;

        Ok(Self {
            writer: Mutex::new(writer),
            reader: None,
            path: None,
        })
    }

    /// Path of the database file, `None` when in memory.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn writer(&self) -> MutexGuard<'_, Connection> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn reader(&self) -> MutexGuard<'_, Connection> {
        self.reader.as_ref().map_or_else(
            || self.writer(),
            |reader| reader.lock().unwrap_or_else(PoisonError::into_inner),
        )
    }

    /// Run a read query and map every row.
    ///
    /// # Errors
    /// Returns a classified [`StorageError`] if preparation, execution, or
    /// row mapping fails.
    pub fn query<T, P, F>(&self, sql: &str, params: P, map: F) -> Result<Vec<T>, StorageError>
    where
        P: Params,
        F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
    {
        let conn = self.reader();
        let mut stmt = conn.prepare_cached(sql).context("prepare query")?;
        let rows = stmt.query_map(params, map).context("run query")?;
        rows.collect::<rusqlite::Result<Vec<T>>>()
            .context("map query rows")
    }

    /// Run a single statement outside any explicit transaction.
    ///
    /// # Errors
    /// Returns a classified [`StorageError`] on failure.
    pub fn execute<P: Params>(&self, sql: &str, params: P) -> Result<usize, StorageError> {
        self.writer().execute(sql, params).context("execute statement")
    }

    /// Run a multi-statement script on the writer.
    ///
    /// # Errors
    /// Returns a classified [`StorageError`] on failure.
    pub fn execute_script(&self, sql: &str) -> Result<(), StorageError> {
        self.writer().execute_batch(sql).context("execute script")
    }

    /// Run `body` inside a retried `BEGIN IMMEDIATE` transaction.
    ///
    /// # Errors
    /// Propagates the body's error, or [`StorageError::Busy`] once the retry
    /// ceiling is reached.
    pub fn transaction<T, E, F>(&self, body: F) -> Result<T, E>
    where
        E: From<StorageError>,
        F: FnMut(&Connection) -> Result<T, E>,
    {
        let conn = self.writer();
        run_in_transaction(&conn, body)
    }

    /// Borrow the writer connection directly.
    ///
    /// For work that must run outside an application transaction (schema
    /// migration scaffolding, checkpoints, backups).
    pub fn with_writer<T>(&self, f: impl FnOnce(&Connection) -> T) -> T {
        let conn = self.writer();
        f(&conn)
    }
}

fn configure_writer(conn: &Connection, options: &DbOptions) -> rusqlite::Result<()> {
    conn.busy_timeout(options.busy_timeout)?;
    let mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    if !mode.eq_ignore_ascii_case("wal") && !mode.eq_ignore_ascii_case("memory") {
        tracing::warn!(journal_mode = %mode, "WAL journal mode unavailable");
    }
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "foreign_keys", true)?;
    Ok(())
}
