//! Optimistic cold access
//!
//! Reads take the record lock only long enough to copy the value and its
//! version, and remember the version in a read set. Writes are buffered.
//!
//! ## Commit Sequence
//!
//! ```text
//! 1. body(view)                - reads recorded, writes buffered
//! 2. try-lock write set        - in key order; a held lock aborts (Conflict)
//! 3. validate read set         - every observed version must be unchanged
//!                                and not locked by another committer
//! 4. install writes            - version += 1 per key
//! 5. release locks
//! ```
//!
//! Never blocking on a lock during commit means no waits-for cycles; the
//! price is that contended cold keys abort and the caller retries. Those
//! aborts are exactly the signal the contention classifier uses to promote
//! a key to hot mode.

use phasekv_core::{AbortReason, ColdMode, Key, Value};
use phasekv_storage::{KeyRecord, KeyStore, Slot};
use smallvec::SmallVec;
use std::sync::Arc;

use crate::strategy::{ColdAccess, ColdView, Footprint, PendingWrite, TxnBody, WriteBuffer};

/// Versioned reads with commit-time validation
#[derive(Debug, Default, Clone, Copy)]
pub struct OptimisticAccess;

impl OptimisticAccess {
    /// Create the strategy
    pub fn new() -> Self {
        OptimisticAccess
    }
}

struct OptimisticView<'s> {
    store: &'s KeyStore,
    reads: SmallVec<[(Arc<KeyRecord>, u64); 4]>,
    writes: WriteBuffer,
    doomed: Option<Key>,
}

impl OptimisticView<'_> {
    /// Copy the committed slot and add its version to the read set
    fn observe(&mut self, key: &Key) -> Slot {
        let record = self.store.record_or_insert(key);
        let slot = record.snapshot();
        match self.reads.iter().find(|(r, _)| Arc::ptr_eq(r, &record)) {
            // A second read saw a different version; validation would fail
            Some((_, seen)) if *seen != slot.version => {
                self.doomed.get_or_insert_with(|| key.clone());
            }
            Some(_) => {}
            None => self.reads.push((record, slot.version)),
        }
        slot
    }
}

impl ColdView for OptimisticView<'_> {
    fn read(&mut self, key: &Key) -> Option<Value> {
        if let Some(value) = self.writes.get(key) {
            return Some(value.clone());
        }
        self.observe(key).value
    }

    fn write(&mut self, key: &Key, value: Value) {
        self.writes.put(key, value);
    }

    fn stamp(&mut self, key: &Key) -> Option<u64> {
        if let Some(stamp) = self.writes.stamp(key) {
            return Some(stamp);
        }
        self.observe(key).stamp
    }

    fn write_ordered(&mut self, key: &Key, value: Value, stamp: u64) {
        self.writes.put_ordered(key, value, stamp);
    }
}

impl ColdAccess for OptimisticAccess {
    fn mode(&self) -> ColdMode {
        ColdMode::Optimistic
    }

    fn run(
        &self,
        store: &KeyStore,
        _footprint: &Footprint,
        body: &mut TxnBody<'_>,
    ) -> Result<(), AbortReason> {
        let mut view = OptimisticView {
            store,
            reads: SmallVec::new(),
            writes: WriteBuffer::new(),
            doomed: None,
        };
        body(&mut view)?;

        let OptimisticView {
            reads,
            writes,
            doomed,
            ..
        } = view;
        if let Some(key) = doomed {
            return Err(AbortReason::Conflict { key });
        }

        let mut write_records: SmallVec<[Arc<KeyRecord>; 4]> = SmallVec::new();
        let mut pending: SmallVec<[PendingWrite; 4]> = SmallVec::new();
        for write in writes.into_sorted() {
            write_records.push(store.record_or_insert(&write.key));
            pending.push(write);
        }

        let mut guards = SmallVec::<[_; 4]>::new();
        for record in &write_records {
            match record.try_write_slot() {
                Some(guard) => guards.push(guard),
                None => {
                    return Err(AbortReason::Conflict {
                        key: record.key().clone(),
                    })
                }
            }
        }

        for (record, seen) in &reads {
            let current = match write_records.iter().position(|w| Arc::ptr_eq(w, record)) {
                Some(idx) => Some(guards[idx].version),
                None => record.try_read_slot().map(|slot| slot.version),
            };
            if current != Some(*seen) {
                return Err(AbortReason::Conflict {
                    key: record.key().clone(),
                });
            }
        }

        for (guard, write) in guards.iter_mut().zip(pending) {
            write.install(guard);
        }
        Ok(())
    }
}
