//! Integration tests for quota persistence against a file-backed database.
//!
//! Covers the reconciliation rules end to end:
//! - upsert idempotence and history last-write-wins
//! - disappearance zeroing and reintroduction
//! - per-service isolation and cascade delete
//! - transaction atomicity and the busy-retry ceiling

mod common;

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use quotad::core::models::QuotaReading;
use quotad::core::provider::ProviderKind;
use quotad::error::{ExitCode, QuotadError, StorageError};
use quotad::storage::{Database, DbOptions, QuotaStore, ServiceStore, quota_id, run_migrations};
use quotad::test_utils::{TestDb, make_test_reading, make_test_service};

use common::logger::TestLogger;

fn seeded() -> (TestDb, QuotaStore) {
    let test_db = TestDb::file();
    test_db.seed(&[
        make_test_service("svc-a", ProviderKind::OpenRouter, 1),
        make_test_service("svc-b", ProviderKind::Moonshot, 2),
    ]);
    let store = QuotaStore::new(Arc::clone(&test_db.db));
    (test_db, store)
}

fn count(db: &Database, sql: &str) -> i64 {
    db.query(sql, [], |r| r.get::<_, i64>(0)).unwrap()[0]
}

#[test]
fn same_reading_twice_keeps_one_row_with_latest_fields() {
    let log = TestLogger::new("same_reading_twice_keeps_one_row_with_latest_fields");
    log.phase("setup");
    let (test_db, store) = seeded();

    log.phase("act");
    store
        .save_quotas("svc-a", &[make_test_reading("credits", 50.0, 10.0)], 1_000)
        .unwrap();
    store
        .save_quotas("svc-a", &[make_test_reading("credits", 50.0, 12.5)], 2_000)
        .unwrap();

    log.phase("verify");
    assert_eq!(count(&test_db.db, "SELECT COUNT(*) FROM quotas"), 1);
    let current = store.current_quotas("svc-a").unwrap();
    assert_eq!(current.len(), 1);
    let quota = &current[0];
    assert_eq!(quota.id, quota_id("svc-a", "credits"));
    assert_eq!(quota.used, 12.5);
    assert_eq!(quota.remaining, 37.5);
    assert_eq!(quota.created_at, 1_000);
    assert_eq!(quota.updated_at, 2_000);

    let history = store.history("svc-a", "credits", 0, 10_000).unwrap();
    let values: Vec<(i64, f64)> = history.iter().map(|s| (s.ts, s.value)).collect();
    assert_eq!(values, [(1_000, 10.0), (2_000, 12.5)]);
    log.finish_ok();
}

#[test]
fn second_save_in_same_second_replaces_history_sample() {
    let log = TestLogger::new("second_save_in_same_second_replaces_history_sample");
    let (_test_db, store) = seeded();

    store
        .save_quotas("svc-a", &[make_test_reading("credits", 50.0, 1.0)], 5_000)
        .unwrap();
    store
        .save_quotas("svc-a", &[make_test_reading("credits", 50.0, 2.0)], 5_000)
        .unwrap();

    let history = store.history("svc-a", "credits", 0, 10_000).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].value, 2.0);
    log.finish_ok();
}

#[test]
fn missing_metric_is_zeroed_then_restored() {
    let log = TestLogger::new("missing_metric_is_zeroed_then_restored");
    log.phase("setup");
    let (_test_db, store) = seeded();
    store
        .save_quotas(
            "svc-b",
            &[
                make_test_reading("balance", 40.0, 0.0),
                make_test_reading("voucher_balance", 30.0, 0.0),
            ],
            1_000,
        )
        .unwrap();

    log.phase("voucher disappears");
    let summary = store
        .save_quotas("svc-b", &[make_test_reading("balance", 38.0, 0.0)], 2_000)
        .unwrap();
    assert_eq!(summary.zeroed, ["voucher_balance"]);

    let current = store.current_quotas("svc-b").unwrap();
    let voucher = current.iter().find(|q| q.metric == "voucher_balance").unwrap();
    assert!(voucher.is_zeroed());
    assert_eq!(voucher.raw_limit, 0.0);
    assert_eq!(voucher.updated_at, 2_000);
    let voucher_history = store.history("svc-b", "voucher_balance", 0, 10_000).unwrap();
    assert_eq!(voucher_history.last().map(|s| (s.ts, s.value)), Some((2_000, 0.0)));

    log.phase("voucher returns");
    store
        .save_quotas(
            "svc-b",
            &[
                make_test_reading("balance", 38.0, 0.0),
                make_test_reading("voucher_balance", 25.0, 0.0),
            ],
            3_000,
        )
        .unwrap();
    let current = store.current_quotas("svc-b").unwrap();
    let voucher = current.iter().find(|q| q.metric == "voucher_balance").unwrap();
    assert_eq!(voucher.limit, 25.0);
    assert!(!voucher.is_zeroed());
    assert_eq!(current.len(), 2);
    log.finish_ok();
}

#[test]
fn non_finite_reading_is_skipped_but_others_persist() {
    let log = TestLogger::new("non_finite_reading_is_skipped_but_others_persist");
    let (_test_db, store) = seeded();

    let summary = store
        .save_quotas(
            "svc-a",
            &[
                make_test_reading("credits", 50.0, 5.0),
                QuotaReading::new("requests", f64::INFINITY, 0.0, 0.0),
            ],
            1_000,
        )
        .unwrap();

    assert_eq!(summary.upserted, 1);
    assert_eq!(summary.skipped_non_finite, 1);
    let metrics: Vec<String> = store
        .current_quotas("svc-a")
        .unwrap()
        .into_iter()
        .map(|q| q.metric)
        .collect();
    assert_eq!(metrics, ["credits"]);
    log.finish_ok();
}

#[test]
fn saving_one_service_never_touches_another() {
    let log = TestLogger::new("saving_one_service_never_touches_another");
    let (_test_db, store) = seeded();

    store
        .save_quotas("svc-b", &[make_test_reading("balance", 10.0, 0.0)], 1_000)
        .unwrap();
    store
        .save_quotas("svc-a", &[make_test_reading("credits", 50.0, 5.0)], 2_000)
        .unwrap();

    let b = store.current_quotas("svc-b").unwrap();
    assert_eq!(b.len(), 1);
    assert!(!b[0].is_zeroed());
    assert_eq!(b[0].updated_at, 1_000);
    log.finish_ok();
}

#[test]
fn deleting_a_service_cascades() {
    let log = TestLogger::new("deleting_a_service_cascades");
    let (test_db, store) = seeded();
    store
        .save_quotas("svc-a", &[make_test_reading("credits", 50.0, 5.0)], 1_000)
        .unwrap();

    let services = ServiceStore::new(Arc::clone(&test_db.db));
    assert!(services.delete("svc-a").unwrap());

    assert_eq!(count(&test_db.db, "SELECT COUNT(*) FROM quotas"), 0);
    assert_eq!(count(&test_db.db, "SELECT COUNT(*) FROM usage_history"), 0);
    log.finish_ok();
}

#[test]
fn failure_after_first_reading_rolls_back_the_whole_cycle() {
    let log = TestLogger::new("failure_after_first_reading_rolls_back_the_whole_cycle");
    log.phase("setup");
    let (test_db, store) = seeded();
    store
        .save_quotas("svc-a", &[make_test_reading("credits", 50.0, 5.0)], 500)
        .unwrap();
    // Reject the second reading after the first one's rows are written.
    test_db
        .db
        .execute_script(
            "CREATE TRIGGER reject_requests BEFORE INSERT ON quotas \
             WHEN NEW.metric = 'requests' \
             BEGIN SELECT RAISE(ABORT, 'requests rejected'); END;",
        )
        .unwrap();

    log.phase("failing save");
    let err = store
        .save_quotas(
            "svc-a",
            &[
                make_test_reading("credits", 50.0, 9.0),
                make_test_reading("requests", 100.0, 1.0),
            ],
            1_000,
        )
        .unwrap_err();
    assert!(matches!(err, QuotadError::Storage(StorageError::Constraint { .. })));

    log.phase("verify");
    assert_eq!(count(&test_db.db, "SELECT COUNT(*) FROM quotas"), 1);
    assert_eq!(count(&test_db.db, "SELECT COUNT(*) FROM usage_history"), 1);
    assert_eq!(
        count(&test_db.db, "SELECT COUNT(*) FROM usage_history WHERE ts = 1000"),
        0
    );
    let current = store.current_quotas("svc-a").unwrap();
    assert_eq!(current[0].used, 5.0);
    assert_eq!(current[0].updated_at, 500);
    log.finish_ok();
}

#[test]
fn unknown_service_save_persists_nothing() {
    let log = TestLogger::new("unknown_service_save_persists_nothing");
    let (test_db, store) = seeded();

    // No such service: the first insert violates the foreign key.
    let err = store
        .save_quotas(
            "ghost",
            &[
                make_test_reading("credits", 1.0, 0.0),
                make_test_reading("requests", 1.0, 0.0),
            ],
            1_000,
        )
        .unwrap_err();

    assert!(matches!(err, QuotadError::Storage(StorageError::Constraint { .. })));
    assert_eq!(count(&test_db.db, "SELECT COUNT(*) FROM quotas"), 0);
    assert_eq!(count(&test_db.db, "SELECT COUNT(*) FROM usage_history"), 0);
    log.finish_ok();
}

#[test]
fn write_lock_held_past_retry_ceiling_surfaces_busy() {
    let log = TestLogger::new("write_lock_held_past_retry_ceiling_surfaces_busy");
    log.phase("setup");
    let test_db = TestDb::file();
    test_db.seed(&[make_test_service("svc-a", ProviderKind::OpenRouter, 1)]);
    let path = test_db.path().unwrap();

    let options = DbOptions::default().with_busy_timeout(Duration::from_millis(10));
    let contender = Database::open(&path, &options).unwrap();
    run_migrations(&contender).unwrap();
    let store = QuotaStore::new(Arc::new(contender));

    log.phase("hold lock");
    let holder_path = path.clone();
    let (locked_tx, locked_rx) = std::sync::mpsc::channel();
    let holder = thread::spawn(move || {
        let conn = rusqlite::Connection::open(holder_path).unwrap();
        conn.execute_batch("BEGIN IMMEDIATE").unwrap();
        locked_tx.send(()).unwrap();
        thread::sleep(Duration::from_millis(1_500));
        conn.execute_batch("ROLLBACK").unwrap();
    });
    locked_rx.recv().unwrap();

    log.phase("save");
    let started = Instant::now();
    let err = store
        .save_quotas("svc-a", &[make_test_reading("credits", 1.0, 0.0)], 1_000)
        .unwrap_err();
    log.info(&format!("gave up after {}ms", started.elapsed().as_millis()));

    assert!(matches!(err, QuotadError::Storage(StorageError::Busy { .. })));
    assert_eq!(err.exit_code(), ExitCode::StorageUnavailable);
    assert!(err.is_retryable());
    // 25 + 75 + 150ms of backoff between the four attempts.
    assert!(started.elapsed() >= Duration::from_millis(250));

    holder.join().unwrap();
    log.finish_ok();
}

#[test]
fn short_lock_is_absorbed_by_retry() {
    let log = TestLogger::new("short_lock_is_absorbed_by_retry");
    let test_db = TestDb::file();
    test_db.seed(&[make_test_service("svc-a", ProviderKind::OpenRouter, 1)]);
    let path = test_db.path().unwrap();

    let options = DbOptions::default().with_busy_timeout(Duration::from_millis(10));
    let contender = Arc::new(Database::open(&path, &options).unwrap());
    let store = QuotaStore::new(Arc::clone(&contender));

    let holder_path = path.clone();
    let (locked_tx, locked_rx) = std::sync::mpsc::channel();
    let holder = thread::spawn(move || {
        let conn = rusqlite::Connection::open(holder_path).unwrap();
        conn.execute_batch("BEGIN IMMEDIATE").unwrap();
        locked_tx.send(()).unwrap();
        thread::sleep(Duration::from_millis(60));
        conn.execute_batch("COMMIT").unwrap();
    });
    locked_rx.recv().unwrap();

    store
        .save_quotas("svc-a", &[make_test_reading("credits", 1.0, 0.0)], 1_000)
        .unwrap();
    holder.join().unwrap();

    assert_eq!(store.current_quotas("svc-a").unwrap().len(), 1);
    log.finish_ok();
}
