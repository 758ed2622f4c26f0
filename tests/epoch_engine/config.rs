//! Configuration Tests
//!
//! Startup validation, TOML configuration files, result delivery options
//! and strict reconciliation checks.

use crate::*;
use std::io::Write;

// =============================================================================
// STARTUP VALIDATION
// =============================================================================

#[test]
fn test_refuses_strict_validation_without_results() {
    let config = EngineConfig::new()
        .manual_epochs()
        .strict_validation(true)
        .synchronous_results(false);
    let err = PhaseKv::open(config).err().unwrap();
    assert!(matches!(err, Error::Config(ref msg) if msg.contains("synchronous_results")));
    assert!(err.is_fatal());
}

#[test]
fn test_refuses_zero_workers() {
    let err = PhaseKv::builder().workers(0).open().err().unwrap();
    assert!(matches!(err, Error::Config(_)));
}

#[test]
fn test_refuses_out_of_range_ratio() {
    let config = EngineConfig::new().write_ratio_threshold(1.5);
    assert!(matches!(PhaseKv::open(config), Err(Error::Config(_))));
}

// =============================================================================
// CONFIGURATION FILES
// =============================================================================

#[test]
fn test_open_with_config_file() {
    init_tracing();
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
workers = 3
contention_threshold = 50
cold_mode = "locking"

[epoch]
policy = "manual"
"#
    )
    .unwrap();

    let db = PhaseKv::open_with_config_file(file.path()).unwrap();
    let config = db.coordinator().config();
    assert_eq!(config.workers, 3);
    assert_eq!(config.contention_threshold, 50);
    assert_eq!(config.cold_mode, ColdMode::Locking);
    assert_eq!(config.epoch, EpochPolicy::Manual);
    assert_eq!(db.coordinator().workers().len(), 3);
    db.finish().unwrap();
}

#[test]
fn test_invalid_config_file_is_rejected() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "workers = \"many\"").unwrap();
    assert!(matches!(
        PhaseKv::open_with_config_file(file.path()),
        Err(Error::Config(_))
    ));

    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
        PhaseKv::open_with_config_file(dir.path().join("absent.toml")),
        Err(Error::Io(_))
    ));
}

// =============================================================================
// RESULT DELIVERY
// =============================================================================

#[test]
fn test_fire_and_forget_keeps_no_results() {
    init_tracing();
    let config = EngineConfig::new()
        .workers(2)
        .manual_epochs()
        .synchronous_results(false);
    let db = PhaseKv::builder()
        .config(config)
        .preload(key("clicks"), Value::Int(0))
        .hot_key(key("clicks"))
        .open()
        .unwrap();

    let write = db
        .submit(Query::new().write(key("cold"), Value::Int(1)))
        .unwrap();
    assert!(write.is_committed());
    assert!(write.result.is_none());
    assert!(matches!(db.run(Query::new().read(key("cold"))), Err(Error::ResultDropped)));

    let stashed = db
        .submit(Query::new().add_checked(key("clicks"), 5, 0))
        .unwrap();
    assert!(stashed.is_deferred());
    assert!(stashed.ticket.is_none());

    db.finish().unwrap();
    assert_eq!(int_of(&db, "clicks"), Some(5));
    assert_eq!(int_of(&db, "cold"), Some(1));
}

#[test]
fn test_query_completion_used_for_immediate_outcome() {
    let db = manual_db(1, ColdMode::Optimistic);
    let (query, ticket) = Query::new()
        .write(key("greeting"), Value::from("hi"))
        .awaitable();
    let exec = db.submit(query).unwrap();
    assert!(exec.is_committed());
    assert!(ticket.wait().unwrap().outcome.is_committed());
    db.finish().unwrap();
}

// =============================================================================
// STRICT VALIDATION
// =============================================================================

#[test]
fn test_strict_validation_passes_clean_epochs() {
    init_tracing();
    let config = EngineConfig::new()
        .workers(2)
        .manual_epochs()
        .strict_validation(true);
    let db = PhaseKv::builder()
        .config(config)
        .preload(key("total"), Value::Int(0))
        .hot_key(key("total"))
        .open()
        .unwrap();

    exec_on(&db, 0, Query::new().add(key("total"), 4));
    let read = exec_on(&db, 1, Query::new().read(key("total")));
    db.advance_epoch().unwrap();
    assert_eq!(read.wait().unwrap().value_of(&key("total")), Some(&Value::Int(4)));
    db.finish().unwrap();
}

#[test]
fn test_strict_validation_accepts_near_overflow_increment() {
    init_tracing();
    let config = EngineConfig::new()
        .workers(1)
        .manual_epochs()
        .strict_validation(true);
    let db = PhaseKv::builder()
        .config(config)
        .preload(key("near_max"), Value::Int(i64::MAX - 1))
        .hot_key(key("near_max"))
        .open()
        .unwrap();

    // Would overflow at the merge, so it is replayed instead of buffered
    let exec = exec_on(&db, 0, Query::new().add(key("near_max"), 5));
    assert!(exec.is_deferred());

    db.advance_epoch().unwrap();
    assert!(matches!(
        exec.wait().unwrap().outcome,
        Outcome::Aborted(AbortReason::Overflow { .. })
    ));
    assert_eq!(int_of(&db, "near_max"), Some(i64::MAX - 1));
    db.finish().unwrap();
}

#[test]
fn test_strict_validation_flags_unmergeable_delta() {
    init_tracing();
    let config = EngineConfig::new()
        .workers(1)
        .manual_epochs()
        .strict_validation(true);
    let db = PhaseKv::builder()
        .config(config)
        .preload(key("total"), Value::Int(0))
        .hot_key(key("total"))
        .open()
        .unwrap();

    assert!(exec_on(&db, 0, Query::new().add(key("total"), 5)).is_committed());
    // Overwritten behind the engine while the increment is buffered
    db.store().put(key("total"), Value::from("corrupt"));

    let err = db.advance_epoch().unwrap_err();
    assert!(matches!(err, Error::Internal(_)));
    assert!(err.is_fatal());
    assert_eq!(db.get(&key("total")), Some(Value::from("corrupt")));

    // A failed cycle halts the workers
    assert!(matches!(
        db.submit(Query::new().add(key("total"), 1)),
        Err(Error::WorkerDisconnected(0))
    ));
    assert!(matches!(db.advance_epoch(), Err(Error::Internal(_))));
}
