//! Fixture loading and shared setup for integration tests.
#![allow(dead_code)]

use std::fs;
use std::path::PathBuf;

use rusqlite::Connection;
use serde::de::DeserializeOwned;

/// Directory holding fixture files.
fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

/// Load and deserialize a JSON fixture.
///
/// # Panics
/// Panics if the file cannot be read or parsed.
pub fn load_fixture<T: DeserializeOwned>(path: &str) -> T {
    let full_path = fixtures_dir().join(path);
    let content = fs::read_to_string(&full_path)
        .unwrap_or_else(|e| panic!("Failed to read fixture {}: {e}", full_path.display()));
    serde_json::from_str(&content)
        .unwrap_or_else(|e| panic!("Failed to parse fixture {}: {e}", full_path.display()))
}

/// Raw text of a fixture.
///
/// # Panics
/// Panics if the file cannot be read.
pub fn fixture_text(path: &str) -> String {
    let full_path = fixtures_dir().join(path);
    fs::read_to_string(&full_path)
        .unwrap_or_else(|e| panic!("Failed to read fixture {}: {e}", full_path.display()))
}

/// Schema of the first release: text timestamps, no raw columns, no
/// sequence column, no migrations table.
pub const FIRST_RELEASE_SCHEMA: &str = "
    CREATE TABLE services (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        provider TEXT NOT NULL,
        api_key TEXT,
        bearer_token TEXT,
        base_url TEXT,
        enabled INTEGER NOT NULL DEFAULT 1,
        display_order INTEGER NOT NULL DEFAULT 0,
        created_at TEXT,
        updated_at TEXT
    );
    CREATE TABLE quotas (
        id TEXT PRIMARY KEY,
        service_id TEXT NOT NULL REFERENCES services(id) ON DELETE CASCADE,
        metric TEXT NOT NULL,
        \"limit\" REAL NOT NULL DEFAULT 0,
        used REAL NOT NULL DEFAULT 0,
        remaining REAL NOT NULL DEFAULT 0,
        type TEXT,
        reset_at TEXT,
        created_at TEXT,
        updated_at TEXT
    );
    CREATE TABLE usage_history (
        service_id TEXT NOT NULL REFERENCES services(id) ON DELETE CASCADE,
        metric TEXT NOT NULL,
        ts TEXT NOT NULL,
        value REAL NOT NULL,
        PRIMARY KEY (service_id, metric, ts)
    );
";

/// Create a first-release database at `path` and return a raw connection
/// for seeding rows.
///
/// # Panics
/// Panics if the schema cannot be created.
pub fn first_release_db(path: &std::path::Path) -> Connection {
    let conn = Connection::open(path).expect("open legacy db");
    conn.execute_batch(FIRST_RELEASE_SCHEMA).expect("create legacy schema");
    conn
}
