//! Storage layer for phasekv
//!
//! This crate implements the key store:
//! - KeyRecord: versioned value slot, mode flag and access-sample counters
//! - KeyStore: DashMap-sharded table of records with FxHash keys
//!
//! The store has no concurrency-control logic of its own beyond per-record
//! locks and atomics. Deciding who may touch a record, and when, belongs to
//! the cold-access strategies and the epoch coordinator.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod record;
pub mod sharded;

pub use record::{AccessSample, KeyRecord, Slot};
pub use sharded::KeyStore;

use std::sync::Arc;

/// Create a key store sized for `capacity` keys
pub fn new_store(capacity: usize) -> Arc<KeyStore> {
    Arc::new(KeyStore::with_capacity(capacity))
}
