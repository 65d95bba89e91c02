//! Integration tests for upgrading first-release databases.
//!
//! A first-release file stores every timestamp as text. Opening it with the
//! current binary must leave integer timestamps behind, collapse history
//! samples that land on the same second, and drop rows it cannot keep.

mod common;

use std::path::Path;
use std::sync::Arc;

use quotad::core::provider::ProviderKind;
use quotad::storage::migrations::migration_names;
use quotad::storage::{Database, DbOptions, QuotaStore, ServiceStore, quota_id, run_migrations};
use quotad::test_utils::make_test_reading;

use common::fixtures::first_release_db;
use common::logger::TestLogger;

/// 2024-01-01T00:00:00Z
const JAN_1: i64 = 1_704_067_200;

fn seed_first_release(path: &Path) {
    let conn = first_release_db(path);
    conn.execute_batch(
        "INSERT INTO services (id, name, provider, api_key, enabled, created_at, updated_at) VALUES
             ('or-main', 'OpenRouter', 'openrouter', 'sk-or-test', 1,
              '2024-01-01 00:00:00', '2024-01-01T00:10:00Z'),
             ('ds', 'DeepSeek', 'deepseek', 'sk-ds-test', 1, 'yesterday', '1704067200000');

         INSERT INTO quotas (id, service_id, metric, \"limit\", used, remaining, type,
                             reset_at, created_at, updated_at) VALUES
             ('q-or', 'or-main', 'credits', 50, 12, 38, 'credits', 'never',
              '2024-01-01 00:00:00', '2024-01-01 00:10:00'),
             ('q-gone', 'deleted-svc', 'credits', 1, 0, 1, NULL, NULL,
              '2024-01-01 00:00:00', '2024-01-01 00:00:00');

         INSERT INTO usage_history (service_id, metric, ts, value) VALUES
             ('or-main', 'credits', '2024-01-01 00:00:00', 10),
             ('or-main', 'credits', '2024-01-01 00:00:00.400', 11),
             ('or-main', 'credits', '2024-01-01T00:05:00Z', 12),
             ('or-main', 'credits', 'not a time', 99),
             ('deleted-svc', 'credits', '2024-01-01 00:00:00', 1);",
    )
    .unwrap();
}

fn open(path: &Path) -> Arc<Database> {
    Arc::new(Database::open(path, &DbOptions::default()).unwrap())
}

fn declared_type(db: &Database, table: &str, column: &str) -> String {
    db.query(
        &format!("SELECT type FROM pragma_table_info('{table}') WHERE name = ?1"),
        [column],
        |r| r.get::<_, String>(0),
    )
    .unwrap()
    .remove(0)
}

#[test]
fn first_release_database_is_upgraded_in_place() {
    let log = TestLogger::new("first_release_database_is_upgraded_in_place");
    log.phase("setup");
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("quotad.db");
    seed_first_release(&path);

    log.phase("migrate");
    let db = open(&path);
    let report = run_migrations(&db).unwrap();
    log.db(&format!("run_migrations applied {:?}", report.applied));
    assert_eq!(report.applied, migration_names());

    log.phase("verify schema");
    for (table, column) in [
        ("services", "created_at"),
        ("services", "updated_at"),
        ("quotas", "created_at"),
        ("quotas", "reset_at"),
        ("usage_history", "ts"),
    ] {
        assert_eq!(declared_type(&db, table, column), "INTEGER", "{table}.{column}");
    }

    log.phase("verify services");
    let services = ServiceStore::new(Arc::clone(&db));
    let or_main = services.get("or-main").unwrap().unwrap();
    assert_eq!(or_main.provider, ProviderKind::OpenRouter);
    assert_eq!(or_main.created_at, JAN_1);
    assert_eq!(or_main.updated_at, JAN_1 + 600);

    let ds = services.get("ds").unwrap().unwrap();
    assert_eq!(ds.updated_at, JAN_1, "millisecond epoch is scaled to seconds");
    assert!(ds.created_at > JAN_1, "unparseable value defaults to migration time");

    log.phase("verify quotas");
    let quotas = QuotaStore::new(Arc::clone(&db));
    let current = quotas.current_quotas("or-main").unwrap();
    assert_eq!(current.len(), 1);
    let credits = &current[0];
    assert_eq!(credits.id, quota_id("or-main", "credits"));
    assert_eq!(credits.raw_limit, 50.0);
    assert_eq!(credits.raw_used, 12.0);
    assert_eq!(credits.created_at, JAN_1);
    assert_eq!(credits.updated_at, JAN_1 + 600);
    assert_eq!(credits.reset_at, None);
    assert!(credits.seq > 0, "sequence is backfilled");

    let orphans = db
        .query(
            "SELECT COUNT(*) FROM quotas WHERE service_id = 'deleted-svc'",
            [],
            |r| r.get::<_, i64>(0),
        )
        .unwrap();
    assert_eq!(orphans, [0]);

    log.phase("verify history");
    let history = quotas.history("or-main", "credits", 0, i64::MAX).unwrap();
    let points: Vec<(i64, f64)> = history.iter().map(|s| (s.ts, s.value)).collect();
    assert_eq!(points, [(JAN_1, 11.0), (JAN_1 + 300, 12.0)]);

    let all_history = db
        .query("SELECT COUNT(*) FROM usage_history", [], |r| r.get::<_, i64>(0))
        .unwrap();
    assert_eq!(all_history, [2]);

    log.finish_ok();
}

#[test]
fn upgraded_database_accepts_new_writes_and_reopens_cleanly() {
    let log = TestLogger::new("upgraded_database_accepts_new_writes_and_reopens_cleanly");
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("quotad.db");
    seed_first_release(&path);

    {
        let db = open(&path);
        run_migrations(&db).unwrap();
        let quotas = QuotaStore::new(Arc::clone(&db));
        quotas
            .save_quotas("or-main", &[make_test_reading("credits", 50.0, 20.0)], JAN_1 + 900)
            .unwrap();
    }

    log.phase("reopen");
    let db = open(&path);
    let report = run_migrations(&db).unwrap();
    assert!(report.is_noop());
    assert_eq!(report.rerun, ["002_additive_columns"]);

    let rows = db
        .query("SELECT COUNT(*) FROM quotas", [], |r| r.get::<_, i64>(0))
        .unwrap();
    assert_eq!(rows, [1], "the save updates the upgraded row in place");

    let quotas = QuotaStore::new(Arc::clone(&db));
    let current = quotas.current_quotas("or-main").unwrap();
    assert_eq!(current.len(), 1);
    assert_eq!(current[0].id, quota_id("or-main", "credits"));
    assert_eq!(current[0].used, 20.0);
    assert_eq!(current[0].created_at, JAN_1);
    assert_eq!(current[0].updated_at, JAN_1 + 900);

    let history = quotas.history("or-main", "credits", 0, i64::MAX).unwrap();
    assert_eq!(history.len(), 3);
    log.finish_ok();
}

#[test]
fn current_schema_database_is_not_rebuilt() {
    let log = TestLogger::new("current_schema_database_is_not_rebuilt");
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("quotad.db");

    {
        let db = open(&path);
        run_migrations(&db).unwrap();
        db.execute(
            "INSERT INTO services (id, name, provider, created_at, updated_at) \
             VALUES ('svc', 'Svc', 'moonshot', 1, 1)",
            [],
        )
        .unwrap();
        // Forget the legacy step so it runs again on reopen.
        db.execute("DELETE FROM migrations WHERE name = '003_legacy_timestamps'", [])
            .unwrap();
    }

    let db = open(&path);
    let report = run_migrations(&db).unwrap();
    assert_eq!(report.applied, ["003_legacy_timestamps"]);

    let created = db
        .query("SELECT created_at FROM services WHERE id = 'svc'", [], |r| {
            r.get::<_, i64>(0)
        })
        .unwrap();
    assert_eq!(created, [1]);
    log.finish_ok();
}
