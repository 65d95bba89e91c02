//! Test utilities for quotad.
//!
//! Provides data factories, migrated throwaway databases, and a scripted
//! [`QuotaSource`] for driving the scheduler without a network.
//!
//! # Usage
//!
//! ```rust,ignore
//! use quotad::test_utils::*;
//!
//! let db = TestDb::file();
//! let source = ScriptedSource::new()
//!     .respond("svc-a", vec![make_test_reading("credits", 10.0, 4.0)])
//!     .hang("svc-b");
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::core::models::{QuotaKind, QuotaReading, Service};
use crate::core::provider::ProviderKind;
use crate::error::ProviderError;
use crate::providers::QuotaSource;
use crate::storage::{Database, DbOptions, ServiceStore, run_migrations};

// =============================================================================
// Test Data Factories
// =============================================================================

/// A service with a placeholder key.
#[must_use]
pub fn make_test_service(id: &str, provider: ProviderKind, display_order: i64) -> Service {
    Service::new(id, &format!("Service {id}"), provider)
        .with_api_key(&format!("sk-test-{id}-0000000000"))
        .with_display_order(display_order)
}

/// A credits reading with `remaining = limit - used`.
#[must_use]
pub fn make_test_reading(metric: &str, limit: f64, used: f64) -> QuotaReading {
    QuotaReading::new(metric, limit, used, limit - used).with_kind(QuotaKind::Credits)
}

// =============================================================================
// Databases
// =============================================================================

/// A migrated database that cleans up after itself.
pub struct TestDb {
    pub db: Arc<Database>,
    dir: Option<tempfile::TempDir>,
}

impl TestDb {
    /// File-backed database in a temp directory (WAL, separate reader).
    ///
    /// # Panics
    /// Panics if the database cannot be created or migrated.
    #[must_use]
    pub fn file() -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp directory");
        let db = Database::open(&dir.path().join("quotad.db"), &DbOptions::default())
            .expect("Failed to open test database");
        run_migrations(&db).expect("Failed to migrate test database");
        Self {
            db: Arc::new(db),
            dir: Some(dir),
        }
    }

    /// In-memory database.
    ///
    /// # Panics
    /// Panics if the database cannot be created or migrated.
    #[must_use]
    pub fn memory() -> Self {
        let db = Database::open_in_memory().expect("Failed to open in-memory database");
        run_migrations(&db).expect("Failed to migrate test database");
        Self {
            db: Arc::new(db),
            dir: None,
        }
    }

    /// Directory holding the database file, if file-backed.
    #[must_use]
    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_ref().map(tempfile::TempDir::path)
    }

    /// Path of the database file, if file-backed.
    #[must_use]
    pub fn path(&self) -> Option<PathBuf> {
        self.db.path().map(Path::to_path_buf)
    }

    /// Insert services.
    ///
    /// # Panics
    /// Panics if an insert fails.
    pub fn seed(&self, services: &[Service]) {
        let store = ServiceStore::new(Arc::clone(&self.db));
        for service in services {
            store.upsert(service).expect("Failed to seed service");
        }
    }

    /// Write a file next to the database.
    ///
    /// # Panics
    /// Panics for in-memory databases or on I/O failure.
    pub fn write_file(&self, name: &str, content: &str) -> PathBuf {
        let path = self.dir().expect("in-memory TestDb has no directory").join(name);
        fs::write(&path, content).expect("Failed to write test file");
        path
    }
}

// =============================================================================
// Scripted Quota Source
// =============================================================================

/// What a scripted service does when fetched.
#[derive(Debug, Clone)]
pub enum Script {
    /// Return these readings.
    Respond(Vec<QuotaReading>),
    /// Fail with this error.
    Fail(ProviderError),
    /// Wait, then return these readings.
    Delay(Duration, Vec<QuotaReading>),
    /// Never resolve.
    Hang,
}

/// A fetch observed by [`ScriptedSource`].
#[derive(Debug, Clone)]
pub struct FetchCall {
    pub service_id: String,
    pub at: Instant,
}

/// [`QuotaSource`] that replays per-service scripts.
///
/// Each service's scripts are consumed in order; the last one repeats.
/// Unscripted services return no readings.
#[derive(Debug, Default, Clone)]
pub struct ScriptedSource {
    scripts: Arc<Mutex<HashMap<String, Vec<Script>>>>,
    calls: Arc<Mutex<Vec<FetchCall>>>,
}

impl ScriptedSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a script step for a service.
    ///
    /// # Panics
    /// Panics if the script lock is poisoned.
    #[must_use]
    pub fn script(self, service_id: &str, step: Script) -> Self {
        self.scripts
            .lock()
            .expect("script lock")
            .entry(service_id.to_string())
            .or_default()
            .push(step);
        self
    }

    #[must_use]
    pub fn respond(self, service_id: &str, readings: Vec<QuotaReading>) -> Self {
        self.script(service_id, Script::Respond(readings))
    }

    #[must_use]
    pub fn fail(self, service_id: &str, error: ProviderError) -> Self {
        self.script(service_id, Script::Fail(error))
    }

    #[must_use]
    pub fn delay(self, service_id: &str, delay: Duration, readings: Vec<QuotaReading>) -> Self {
        self.script(service_id, Script::Delay(delay, readings))
    }

    #[must_use]
    pub fn hang(self, service_id: &str) -> Self {
        self.script(service_id, Script::Hang)
    }

    /// Every fetch so far, in call order.
    ///
    /// # Panics
    /// Panics if the call log lock is poisoned.
    #[must_use]
    pub fn calls(&self) -> Vec<FetchCall> {
        self.calls.lock().expect("call lock").clone()
    }

    fn next_step(&self, service_id: &str) -> Option<Script> {
        let mut scripts = self.scripts.lock().expect("script lock");
        let steps = scripts.get_mut(service_id)?;
        if steps.len() > 1 {
            Some(steps.remove(0))
        } else {
            steps.first().cloned()
        }
    }
}

#[async_trait]
impl QuotaSource for ScriptedSource {
    async fn fetch_quotas(&self, service: &Service) -> Result<Vec<QuotaReading>, ProviderError> {
        self.calls.lock().expect("call lock").push(FetchCall {
            service_id: service.id.clone(),
            at: Instant::now(),
        });

        match self.next_step(&service.id) {
            None => Ok(Vec::new()),
            Some(Script::Respond(readings)) => Ok(readings),
            Some(Script::Fail(error)) => Err(error),
            Some(Script::Delay(delay, readings)) => {
                tokio::time::sleep(delay).await;
                Ok(readings)
            }
            Some(Script::Hang) => std::future::pending().await,
        }
    }
}
