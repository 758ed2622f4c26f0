//! Stash Tests
//!
//! Transactions that need merged hot-key state are stashed and replayed
//! once per epoch, after the merge.

use crate::*;
use std::time::Duration;

#[test]
fn test_hot_read_sees_merged_value() {
    let db = hot_db(2, "visits", Value::Int(5));
    exec_on(&db, 0, Query::new().add(key("visits"), 3));
    exec_on(&db, 1, Query::new().add(key("visits"), 4));

    let read = exec_on(&db, 0, Query::new().read(key("visits")));
    assert!(read.is_deferred());

    db.advance_epoch().unwrap();
    let result = read.wait().unwrap();
    assert_eq!(result.value_of(&key("visits")), Some(&Value::Int(12)));
    db.finish().unwrap();
}

#[test]
fn test_stashed_result_delivered_exactly_once() {
    let db = hot_db(2, "seats", Value::Int(3));
    let mut tickets = Vec::new();
    for i in 0..6 {
        let (query, ticket) = Query::new().add_checked(key("seats"), -1, 0).awaitable();
        let exec = exec_on(&db, i % 2, query);
        assert!(exec.is_deferred());
        // The query's own slot is used; no second ticket
        assert!(exec.ticket.is_none());
        tickets.push(ticket);
    }

    for ticket in &tickets {
        assert!(ticket.wait_timeout(Duration::from_millis(5)).unwrap().is_none());
    }

    db.advance_epoch().unwrap();

    let mut committed = 0;
    for ticket in &tickets {
        let result = ticket.try_take().unwrap().expect("delivered after reconciliation");
        if result.outcome.is_committed() {
            committed += 1;
        }
        // The slot is single-use
        assert!(matches!(
            ticket.try_take().map_err(Error::from),
            Err(Error::ResultDropped)
        ));
    }
    assert_eq!(committed, 3);
    assert_eq!(int_of(&db, "seats"), Some(0));
    db.finish().unwrap();
}

#[test]
fn test_replay_follows_submission_order() {
    let db = hot_db(2, "owner", Value::from("nobody"));
    let first = exec_on(&db, 1, Query::new().write(key("owner"), Value::from("alice")));
    let second = exec_on(&db, 0, Query::new().write(key("owner"), Value::from("bob")));
    assert!(first.is_deferred() && second.is_deferred());

    db.advance_epoch().unwrap();
    assert!(first.wait().unwrap().outcome.is_committed());
    assert!(second.wait().unwrap().outcome.is_committed());
    assert_eq!(db.get(&key("owner")), Some(Value::from("bob")));
    db.finish().unwrap();
}

#[test]
fn test_delta_kind_clash_is_stashed() {
    let db = hot_db(1, "bid", Value::Int(10));
    assert!(exec_on(&db, 0, Query::new().max(key("bid"), 20)).is_committed());

    let clash = exec_on(&db, 0, Query::new().add(key("bid"), 5));
    assert!(clash.is_deferred());

    db.advance_epoch().unwrap();
    assert!(clash.wait().unwrap().outcome.is_committed());
    // The merge runs before the replay
    assert_eq!(int_of(&db, "bid"), Some(25));
    db.finish().unwrap();
}

#[test]
fn test_finish_delivers_pending_stash() {
    let db = hot_db(1, "queue", Value::List(Vec::new()));
    let read = db.submit(Query::new().read(key("queue"))).unwrap();
    assert!(read.is_deferred());

    db.finish().unwrap();
    let result = read.wait().unwrap();
    assert_eq!(result.value_of(&key("queue")), Some(&Value::List(Vec::new())));
}

#[test]
fn test_run_waits_for_replay() {
    let db = hot_db(2, "tokens", Value::Int(1));

    std::thread::scope(|s| {
        let waiter = s.spawn(|| db.run(Query::new().add_checked(key("tokens"), -1, 0)));
        // Keep cycling until the deferred transaction is picked up
        while !waiter.is_finished() {
            db.advance_epoch().unwrap();
            std::thread::sleep(Duration::from_millis(2));
        }
        let result = waiter.join().unwrap().unwrap();
        assert_eq!(result.value_of(&key("tokens")), Some(&Value::Int(0)));
    });

    let denied = {
        let (query, ticket) = Query::new().add_checked(key("tokens"), -1, 0).awaitable();
        db.submit(query).unwrap();
        db.advance_epoch().unwrap();
        ticket.wait().unwrap()
    };
    assert!(matches!(
        denied.outcome,
        Outcome::Aborted(AbortReason::BelowFloor { .. })
    ));
    db.finish().unwrap();
}
