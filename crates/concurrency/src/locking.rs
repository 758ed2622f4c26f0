//! Lock-based cold access
//!
//! Every declared key is locked before the body runs: shared for read-only
//! keys, exclusive for written keys. Locks are taken in key order, so two
//! transactions can never wait on each other in a cycle, and are held until
//! the writes are installed. Conflicts therefore never abort; contention
//! shows up as waiting instead.
//!
//! Keys outside the declared footprint cannot be locked without breaking
//! the ordering rule; touching one aborts the transaction with
//! [`AbortReason::Undeclared`].

use parking_lot::{RwLockReadGuard, RwLockWriteGuard};
use phasekv_core::{AbortReason, ColdMode, Key, Value};
use phasekv_storage::{KeyRecord, KeyStore, Slot};
use smallvec::SmallVec;
use std::sync::Arc;

use crate::strategy::{ColdAccess, ColdView, Footprint, TxnBody, WriteBuffer};

enum SlotGuard<'a> {
    Shared(RwLockReadGuard<'a, Slot>),
    Exclusive(RwLockWriteGuard<'a, Slot>),
}

impl SlotGuard<'_> {
    fn slot(&self) -> &Slot {
        match self {
            SlotGuard::Shared(g) => &**g,
            SlotGuard::Exclusive(g) => &**g,
        }
    }
}

/// Per-key reader/writer locking
#[derive(Debug, Default, Clone, Copy)]
pub struct LockingAccess;

impl LockingAccess {
    /// Create the strategy
    pub fn new() -> Self {
        LockingAccess
    }
}

struct LockedView<'v, 'g> {
    footprint: &'v Footprint,
    guards: &'v [SlotGuard<'g>],
    writes: WriteBuffer,
    undeclared: Option<Key>,
}

impl LockedView<'_, '_> {
    fn locked(&mut self, key: &Key) -> Option<&Slot> {
        match self.footprint.position(key) {
            Some(idx) => Some(self.guards[idx].slot()),
            None => {
                self.undeclared.get_or_insert_with(|| key.clone());
                None
            }
        }
    }

    fn writable(&mut self, key: &Key) -> bool {
        if self.footprint.is_exclusive(key) {
            return true;
        }
        self.undeclared.get_or_insert_with(|| key.clone());
        false
    }
}

impl ColdView for LockedView<'_, '_> {
    fn read(&mut self, key: &Key) -> Option<Value> {
        if let Some(value) = self.writes.get(key) {
            return Some(value.clone());
        }
        self.locked(key).and_then(|slot| slot.value.clone())
    }

    fn write(&mut self, key: &Key, value: Value) {
        if self.writable(key) {
            self.writes.put(key, value);
        }
    }

    fn stamp(&mut self, key: &Key) -> Option<u64> {
        if let Some(stamp) = self.writes.stamp(key) {
            return Some(stamp);
        }
        self.locked(key).and_then(|slot| slot.stamp)
    }

    fn write_ordered(&mut self, key: &Key, value: Value, stamp: u64) {
        if self.writable(key) {
            self.writes.put_ordered(key, value, stamp);
        }
    }
}

impl ColdAccess for LockingAccess {
    fn mode(&self) -> ColdMode {
        ColdMode::Locking
    }

    fn run(
        &self,
        store: &KeyStore,
        footprint: &Footprint,
        body: &mut TxnBody<'_>,
    ) -> Result<(), AbortReason> {
        // Records outlive the guards borrowed from them
        let records: SmallVec<[(Arc<KeyRecord>, bool); 4]> = footprint
            .iter()
            .map(|(key, exclusive)| (store.record_or_insert(key), exclusive))
            .collect();

        let mut guards: SmallVec<[SlotGuard<'_>; 4]> = records
            .iter()
            .map(|(record, exclusive)| {
                if *exclusive {
                    SlotGuard::Exclusive(record.write_slot())
                } else {
                    SlotGuard::Shared(record.read_slot())
                }
            })
            .collect();

        let mut view = LockedView {
            footprint,
            guards: &guards,
            writes: WriteBuffer::new(),
            undeclared: None,
        };
        body(&mut view)?;

        let LockedView {
            writes, undeclared, ..
        } = view;
        if let Some(key) = undeclared {
            tracing::warn!(key = %key, "transaction touched an undeclared key");
            return Err(AbortReason::Undeclared { key });
        }

        for write in writes.into_sorted() {
            // Every buffered key was checked exclusive when written
            if let Some(idx) = footprint.position(&write.key) {
                if let SlotGuard::Exclusive(guard) = &mut guards[idx] {
                    write.install(guard);
                }
            }
        }
        Ok(())
    }
}
