//! Hot Path Tests
//!
//! Commutative updates to hot keys are buffered per worker and merged at
//! the end of the epoch.

use crate::*;
use std::thread;

// =============================================================================
// CONVERGENCE
// =============================================================================

#[test]
fn test_hot_increments_converge() {
    const WORKERS: usize = 4;
    const PER_WORKER: usize = 250;
    let db = hot_db(WORKERS, "likes", Value::Int(0));

    thread::scope(|s| {
        for w in 0..WORKERS {
            let db = &db;
            s.spawn(move || {
                for _ in 0..PER_WORKER {
                    let exec = exec_on(db, w, Query::new().add(key("likes"), 1));
                    assert!(exec.is_committed());
                }
            });
        }
    });

    // Nothing visible before reconciliation
    assert_eq!(int_of(&db, "likes"), Some(0));

    db.advance_epoch().unwrap();
    assert_eq!(int_of(&db, "likes"), Some((WORKERS * PER_WORKER) as i64));

    let counts = db.counts();
    assert_eq!(counts[Stat::Buffered], (WORKERS * PER_WORKER) as u64);
    assert_eq!(counts[Stat::Deferred], 0);
    assert_eq!(counts[Stat::MergedKeys], 1);
    db.finish().unwrap();
}

#[test]
fn test_hot_max_keeps_largest() {
    let db = hot_db(3, "high_score", Value::Int(40));
    exec_on(&db, 0, Query::new().max(key("high_score"), 12));
    exec_on(&db, 1, Query::new().max(key("high_score"), 97));
    exec_on(&db, 2, Query::new().max(key("high_score"), 55));

    db.advance_epoch().unwrap();
    assert_eq!(int_of(&db, "high_score"), Some(97));
    db.finish().unwrap();
}

#[test]
fn test_hot_append_keeps_worker_order() {
    let db = hot_db(2, "events", Value::List(Vec::new()));
    for i in 0..5 {
        exec_on(&db, 0, Query::new().append(key("events"), Value::Int(i)));
        exec_on(&db, 1, Query::new().append(key("events"), Value::Int(100 + i)));
    }

    db.advance_epoch().unwrap();
    let list = db.get(&key("events")).unwrap();
    let items = list.as_list().unwrap();
    assert_eq!(items.len(), 10);

    let from_first: Vec<_> = items.iter().filter_map(Value::as_int).filter(|v| *v < 100).collect();
    let from_second: Vec<_> = items.iter().filter_map(Value::as_int).filter(|v| *v >= 100).collect();
    assert_eq!(from_first, vec![0, 1, 2, 3, 4]);
    assert_eq!(from_second, vec![100, 101, 102, 103, 104]);
    db.finish().unwrap();
}

#[test]
fn test_hot_ordered_put_highest_stamp_wins() {
    let db = hot_db(2, "status", Value::from("init"));
    exec_on(&db, 0, Query::new().ordered_put(key("status"), 9, Value::from("newest")));
    exec_on(&db, 1, Query::new().ordered_put(key("status"), 3, Value::from("stale")));
    exec_on(&db, 0, Query::new().ordered_put(key("status"), 5, Value::from("older")));

    db.advance_epoch().unwrap();
    assert_eq!(db.get(&key("status")), Some(Value::from("newest")));
    db.finish().unwrap();
}

#[test]
fn test_ordered_put_agrees_across_modes_and_epochs() {
    init_tracing();
    let db = PhaseKv::builder()
        .workers(2)
        .manual_epochs()
        .preload(key("cold_status"), Value::from("init"))
        .preload(key("hot_status"), Value::from("init"))
        .hot_key(key("hot_status"))
        .open()
        .unwrap();

    // (worker, stamp, value) per epoch
    let epochs: [&[(usize, u64, &str)]; 2] = [
        &[(0, 5, "newest"), (1, 1, "stale")],
        &[(1, 1, "late and stale"), (0, 3, "older")],
    ];
    for puts in epochs {
        for &(worker, stamp, value) in puts {
            for name in ["cold_status", "hot_status"] {
                let query = Query::new().ordered_put(key(name), stamp, Value::from(value));
                assert!(exec_on(&db, worker, query).is_committed());
            }
        }
        db.advance_epoch().unwrap();
    }

    assert_eq!(db.mode(&key("cold_status")), Mode::Cold);
    assert_eq!(db.mode(&key("hot_status")), Mode::Hot);
    assert_eq!(db.get(&key("cold_status")), Some(Value::from("newest")));
    assert_eq!(db.get(&key("hot_status")), Some(Value::from("newest")));
    db.finish().unwrap();
}

// =============================================================================
// OVERFLOW
// =============================================================================

#[test]
fn test_committed_increment_survives_overflowing_neighbour() {
    let db = hot_db(2, "n", Value::Int(0));
    let huge = exec_on(&db, 0, Query::new().add(key("n"), i64::MAX));
    let one = exec_on(&db, 1, Query::new().add(key("n"), 1));
    // Too close to the limit to buffer next to another worker
    assert!(huge.is_deferred());
    assert!(one.is_committed());

    db.advance_epoch().unwrap();
    assert!(matches!(
        huge.wait().unwrap().outcome,
        Outcome::Aborted(AbortReason::Overflow { .. })
    ));
    assert_eq!(int_of(&db, "n"), Some(1));
    assert_eq!(db.counts()[Stat::Buffered], 1);
    db.finish().unwrap();
}

#[test]
fn test_increment_overflowing_worker_buffer_is_stashed() {
    let db = hot_db(1, "n", Value::Int(0));
    assert!(exec_on(&db, 0, Query::new().add(key("n"), i64::MAX)).is_committed());
    let over = exec_on(&db, 0, Query::new().add(key("n"), 1));
    assert!(over.is_deferred());

    db.advance_epoch().unwrap();
    assert!(matches!(
        over.wait().unwrap().outcome,
        Outcome::Aborted(AbortReason::Overflow { .. })
    ));
    assert_eq!(int_of(&db, "n"), Some(i64::MAX));
    db.finish().unwrap();
}

// =============================================================================
// SPLIT TRANSACTIONS
// =============================================================================

#[test]
fn test_split_commits_cold_part_immediately() {
    let db = hot_db(2, "page_views", Value::Int(0));
    let result = db
        .run(
            Query::new()
                .add(key("page_views"), 1)
                .write(key("last_visitor"), Value::from("bob")),
        )
        .unwrap();
    assert!(result.outcome.is_committed());

    assert_eq!(db.get(&key("last_visitor")), Some(Value::from("bob")));
    assert_eq!(int_of(&db, "page_views"), Some(0));

    db.advance_epoch().unwrap();
    assert_eq!(int_of(&db, "page_views"), Some(1));
    db.finish().unwrap();
}

#[test]
fn test_aborted_split_buffers_nothing() {
    let db = PhaseKv::builder()
        .workers(1)
        .manual_epochs()
        .preload(key("sold"), Value::Int(0))
        .preload(key("credits"), Value::Int(1))
        .hot_key(key("sold"))
        .open()
        .unwrap();

    let err = db
        .run(
            Query::new()
                .add(key("sold"), 1)
                .add_checked(key("credits"), -2, 0),
        )
        .unwrap_err();
    assert!(matches!(
        err.abort_reason(),
        Some(AbortReason::BelowFloor { .. })
    ));

    db.advance_epoch().unwrap();
    assert_eq!(int_of(&db, "sold"), Some(0));
    assert_eq!(int_of(&db, "credits"), Some(1));
    assert_eq!(db.counts()[Stat::Buffered], 0);
    db.finish().unwrap();
}

#[test]
fn test_hot_type_mismatch_aborts_before_buffering() {
    let db = hot_db(1, "label", Value::from("fixed"));
    let exec = exec_on(&db, 0, Query::new().add(key("label"), 1));
    assert!(matches!(
        exec.outcome,
        Outcome::Aborted(AbortReason::TypeMismatch { .. })
    ));

    db.advance_epoch().unwrap();
    assert_eq!(db.get(&key("label")), Some(Value::from("fixed")));
    db.finish().unwrap();
}

// =============================================================================
// STOCK SCENARIO
// =============================================================================

#[test]
fn test_unchecked_decrements_overshoot() {
    let db = hot_db(2, "stock", Value::Int(10));
    for i in 0..100 {
        let exec = exec_on(&db, i % 2, Query::new().add(key("stock"), -1));
        assert!(exec.is_committed());
    }
    db.finish().unwrap();
    assert_eq!(int_of(&db, "stock"), Some(-90));
}

#[test]
fn test_checked_decrements_stop_at_floor() {
    let db = hot_db(2, "stock", Value::Int(10));
    let executions: Vec<_> = (0..100)
        .map(|i| exec_on(&db, i % 2, Query::new().add_checked(key("stock"), -1, 0)))
        .collect();
    assert!(executions.iter().all(Execution::is_deferred));

    db.finish().unwrap();

    let results: Vec<_> = executions
        .into_iter()
        .map(|exec| exec.wait().unwrap())
        .collect();
    let committed: Vec<_> = results.iter().filter(|r| r.outcome.is_committed()).collect();
    assert_eq!(committed.len(), 10);
    // Replay follows submission order
    assert_eq!(committed[0].value_of(&key("stock")), Some(&Value::Int(9)));
    assert_eq!(committed[9].value_of(&key("stock")), Some(&Value::Int(0)));
    assert!(results[10..].iter().all(|r| matches!(
        r.outcome,
        Outcome::Aborted(AbortReason::BelowFloor { current: 0, .. })
    )));

    assert_eq!(int_of(&db, "stock"), Some(0));
    let counts = db.counts();
    assert_eq!(counts[Stat::Replayed], 100);
    assert_eq!(counts[Stat::ReplayAborts], 90);
    assert_eq!(counts.iterations, 10);
}
