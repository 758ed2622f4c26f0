//! Epoch Barrier Tests
//!
//! Epoch numbering, background drivers, the quiescence grace period and
//! shutdown.

use crate::*;
use std::thread;
use std::time::{Duration, Instant};

/// Poll `check` until it holds or `limit` elapses
fn eventually(limit: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    check()
}

// =============================================================================
// NUMBERING
// =============================================================================

#[test]
fn test_concurrent_cycles_number_epochs_once_each() {
    let db = manual_db(3, ColdMode::Optimistic);
    let mut seen: Vec<u64> = thread::scope(|s| {
        let handles: Vec<_> = (0..4)
            .map(|_| {
                s.spawn(|| {
                    (0..10)
                        .map(|_| db.advance_epoch().unwrap().as_u64())
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect()
    });

    seen.sort_unstable();
    assert_eq!(seen, (1..=40).collect::<Vec<_>>());
    assert_eq!(db.epoch(), Epoch(40));
    assert_eq!(db.counts()[Stat::Epochs], 40);
    db.finish().unwrap();
}

#[test]
fn test_epoch_never_goes_backwards_under_load() {
    init_tracing();
    let db = PhaseKv::builder()
        .workers(2)
        .epoch(EpochPolicy::Interval { millis: 2 })
        .preload(key("hits"), Value::Int(0))
        .hot_key(key("hits"))
        .open()
        .unwrap();

    thread::scope(|s| {
        s.spawn(|| {
            for i in 0..400 {
                exec_on(&db, i % 2, Query::new().add(key("hits"), 1));
            }
        });
        let mut last = db.epoch();
        for _ in 0..200 {
            let now = db.epoch();
            assert!(now >= last);
            last = now;
            thread::sleep(Duration::from_micros(200));
        }
    });

    db.finish().unwrap();
    assert_eq!(int_of(&db, "hits"), Some(400));
}

// =============================================================================
// DRIVERS
// =============================================================================

#[test]
fn test_interval_driver_advances_epochs() {
    init_tracing();
    let db = PhaseKv::builder()
        .workers(2)
        .epoch(EpochPolicy::Interval { millis: 5 })
        .open()
        .unwrap();

    assert!(eventually(Duration::from_secs(5), || db.epoch() >= Epoch(3)));
    db.finish().unwrap();
}

#[test]
fn test_transaction_slices_end_epochs() {
    init_tracing();
    let db = PhaseKv::builder()
        .workers(2)
        .epoch(EpochPolicy::Transactions { count: 10 })
        .open()
        .unwrap();

    assert_eq!(db.epoch(), Epoch::ZERO);
    for i in 0..10 {
        db.run(Query::new().write(key("slot"), Value::Int(i))).unwrap();
    }
    assert!(eventually(Duration::from_secs(5), || db.epoch() >= Epoch(1)));
    db.finish().unwrap();
}

// =============================================================================
// QUIESCENCE
// =============================================================================

#[test]
fn test_blocked_worker_times_out_barrier() {
    init_tracing();
    let config = EngineConfig::new()
        .workers(1)
        .manual_epochs()
        .cold_mode(ColdMode::Locking)
        .quiescence_grace(Duration::from_millis(100));
    let db = PhaseKv::builder()
        .config(config)
        .preload(key("row"), Value::Int(0))
        .open()
        .unwrap();

    let record = db.store().record(&key("row")).unwrap();
    thread::scope(|s| {
        let slot = record.write_slot();
        let blocked = s.spawn(|| exec_on(&db, 0, Query::new().add(key("row"), 1)));
        // Let the worker reach the lock
        thread::sleep(Duration::from_millis(50));

        let err = db.advance_epoch().unwrap_err();
        assert!(matches!(err, Error::QuiescenceTimeout { worker: 0, .. }));
        assert!(err.is_fatal());

        drop(slot);
        assert!(blocked.join().unwrap().is_committed());
    });

    // A failed barrier halts the engine: nothing more is acknowledged
    for name in ["row", "other"] {
        assert!(matches!(
            db.submit(Query::new().add(key(name), 1)),
            Err(Error::WorkerDisconnected(0))
        ));
    }
    assert!(matches!(db.advance_epoch(), Err(Error::Internal(_))));
    assert_eq!(int_of(&db, "row"), Some(1));
    assert_eq!(db.get(&key("other")), None);
    db.finish().unwrap_err();
}

// =============================================================================
// SHUTDOWN
// =============================================================================

#[test]
fn test_finish_stops_engine() {
    let db = manual_db(2, ColdMode::Optimistic);
    db.run(Query::new().write(key("k"), Value::Int(1))).unwrap();
    db.finish().unwrap();

    // Idempotent
    db.finish().unwrap();
    assert!(matches!(db.advance_epoch(), Err(Error::Stopped)));
    assert!(matches!(
        db.submit(Query::new().read(key("k"))),
        Err(Error::WorkerDisconnected(_))
    ));
    assert_eq!(int_of(&db, "k"), Some(1));
}

#[test]
fn test_drop_without_finish_joins_workers() {
    let db = hot_db(2, "pending", Value::Int(0));
    exec_on(&db, 0, Query::new().add(key("pending"), 1));
    drop(db);
}

#[test]
fn test_counters_cover_barrier_and_reconciliation() {
    let db = manual_db(2, ColdMode::Locking);
    for i in 0..20 {
        db.run(Query::new().add(key(&format!("k{}", i % 4)), 1)).unwrap();
    }
    db.advance_epoch().unwrap();

    let counts = db.counts();
    assert_eq!(counts[Stat::Committed], 20);
    assert_eq!(counts.iterations, 20);
    assert_eq!(counts[Stat::Samples], 20);
    assert!(counts.barrier_wait > Duration::ZERO);

    let per_worker: u64 = db
        .coordinator()
        .worker_stats()
        .iter()
        .map(|stats| stats.committed)
        .sum();
    assert_eq!(per_worker, 20);
    db.finish().unwrap();
}
