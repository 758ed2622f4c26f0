//! Epoch Engine Integration Test Suite
//!
//! End-to-end behavior of the engine through the `phasekv` facade:
//! cold-path atomicity, hot-key delta merging, stash replay, epoch
//! barriers, adaptive classification and configuration handling.
//!
//! ## Running Tests
//!
//! ```bash
//! # Run the whole suite
//! cargo test --test epoch_engine
//!
//! # Run the hot path tests only
//! cargo test --test epoch_engine hot_path::
//! ```

use once_cell::sync::Lazy;
use phasekv::prelude::*;
use tracing_subscriber::filter::LevelFilter;

pub mod cold_path;
pub mod config;
pub mod epochs;
pub mod hot_path;
pub mod stash;

// =============================================================================
// SHARED TEST UTILITIES
// =============================================================================

static TRACING: Lazy<()> = Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(LevelFilter::WARN)
        .try_init();
});

/// Route engine logs through the test harness
pub fn init_tracing() {
    Lazy::force(&TRACING);
}

pub fn key(name: &str) -> Key {
    Key::new(name)
}

/// Engine whose epochs only advance on request
pub fn manual_db(workers: usize, cold_mode: ColdMode) -> PhaseKv {
    init_tracing();
    PhaseKv::builder()
        .workers(workers)
        .cold_mode(cold_mode)
        .manual_epochs()
        .open()
        .expect("Failed to start engine")
}

/// Manual-epoch engine with `name` preloaded and already hot
pub fn hot_db(workers: usize, name: &str, initial: Value) -> PhaseKv {
    init_tracing();
    PhaseKv::builder()
        .workers(workers)
        .manual_epochs()
        .preload(key(name), initial)
        .hot_key(key(name))
        .open()
        .expect("Failed to start engine")
}

/// Execute on a specific worker, bypassing key-based routing
pub fn exec_on(db: &PhaseKv, worker: usize, query: Query) -> Execution {
    db.coordinator().workers()[worker]
        .execute(query)
        .expect("worker is running")
}

/// Resubmit until the transaction does not fail with a retryable abort
pub fn run_with_retry(db: &PhaseKv, worker: usize, build: impl Fn() -> Query) -> TxnResult {
    loop {
        let result = exec_on(db, worker, build()).wait().expect("result delivered");
        match &result.outcome {
            Outcome::Aborted(reason) if reason.is_retryable() => continue,
            _ => return result,
        }
    }
}

pub fn int_of(db: &PhaseKv, name: &str) -> Option<i64> {
    db.get(&key(name)).and_then(|v| v.as_int())
}
