//! Cold Path Tests
//!
//! Transactions on cold keys run directly under per-key synchronization,
//! in both cold modes.

use crate::*;
use std::thread;

const THREADS: usize = 4;
const INCREMENTS: usize = 250;

fn concurrent_increments(cold_mode: ColdMode) {
    let db = manual_db(THREADS, cold_mode);

    thread::scope(|s| {
        for t in 0..THREADS {
            let db = &db;
            s.spawn(move || {
                for _ in 0..INCREMENTS {
                    let result = run_with_retry(db, t, || Query::new().add(key("counter"), 1));
                    assert!(result.outcome.is_committed());
                }
            });
        }
    });

    assert_eq!(int_of(&db, "counter"), Some((THREADS * INCREMENTS) as i64));
    db.finish().unwrap();
}

// =============================================================================
// ATOMICITY
// =============================================================================

#[test]
fn test_no_lost_updates_with_locking() {
    concurrent_increments(ColdMode::Locking);
}

#[test]
fn test_no_lost_updates_with_optimistic() {
    concurrent_increments(ColdMode::Optimistic);
}

#[test]
fn test_transfer_preserves_total() {
    let db = manual_db(THREADS, ColdMode::Optimistic);
    db.run(
        Query::new()
            .write(key("a"), Value::Int(500))
            .write(key("b"), Value::Int(500)),
    )
    .unwrap();

    thread::scope(|s| {
        for t in 0..THREADS {
            let db = &db;
            s.spawn(move || {
                for i in 0..100 {
                    let (from, to) = if (i + t) % 2 == 0 { ("a", "b") } else { ("b", "a") };
                    run_with_retry(db, t, || {
                        Query::new().add(key(from), -1).add(key(to), 1)
                    });
                }
            });
        }
    });

    let a = int_of(&db, "a").unwrap();
    let b = int_of(&db, "b").unwrap();
    assert_eq!(a + b, 1000);
    db.finish().unwrap();
}

// =============================================================================
// ABORTS
// =============================================================================

#[test]
fn test_abort_leaves_no_partial_write() {
    for cold_mode in [ColdMode::Locking, ColdMode::Optimistic] {
        let db = manual_db(2, cold_mode);
        db.run(Query::new().write(key("balance"), Value::Int(2)))
            .unwrap();

        let err = db
            .run(
                Query::new()
                    .write(key("audit"), Value::from("withdrawn"))
                    .add_checked(key("balance"), -5, 0),
            )
            .unwrap_err();

        assert!(matches!(
            err.abort_reason(),
            Some(AbortReason::BelowFloor { current: 2, .. })
        ));
        assert!(!err.is_retryable());
        assert_eq!(db.get(&key("audit")), None);
        assert_eq!(int_of(&db, "balance"), Some(2));
        db.finish().unwrap();
    }
}

#[test]
fn test_type_mismatch_aborts_cold_add() {
    let db = manual_db(1, ColdMode::Locking);
    db.run(Query::new().write(key("name"), Value::from("alice")))
        .unwrap();

    let err = db.run(Query::new().add(key("name"), 1)).unwrap_err();
    assert!(matches!(
        err.abort_reason(),
        Some(AbortReason::TypeMismatch { .. })
    ));
    assert_eq!(db.get(&key("name")), Some(Value::from("alice")));
    db.finish().unwrap();
}

#[test]
fn test_reads_observe_committed_writes() {
    let db = manual_db(2, ColdMode::Optimistic);
    db.run(Query::new().write(key("color"), Value::from("blue")))
        .unwrap();

    let result = db
        .run(Query::new().read(key("color")).read(key("missing")))
        .unwrap();
    assert_eq!(result.value_of(&key("color")), Some(&Value::from("blue")));
    assert_eq!(result.value_of(&key("missing")), None);
    assert_eq!(result.values.len(), 2);
    db.finish().unwrap();
}

#[test]
fn test_absent_key_counts_from_zero() {
    let db = manual_db(1, ColdMode::Locking);
    let result = db
        .run(Query::new().add_checked(key("fresh"), 3, 0))
        .unwrap();
    assert_eq!(result.value_of(&key("fresh")), Some(&Value::Int(3)));

    db.run(Query::new().append(key("log"), Value::from("x")))
        .unwrap();
    assert_eq!(db.get(&key("log")), Some(Value::List(vec![Value::from("x")])));
    db.finish().unwrap();
}
