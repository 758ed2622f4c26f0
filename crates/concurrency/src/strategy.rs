//! Cold-access strategy interface
//!
//! A strategy runs a transaction body against cold keys of a [`KeyStore`]
//! and makes the result linearizable per key. The body sees the store
//! through a [`ColdView`]; reads observe the transaction's own buffered
//! writes, and writes are only installed if the body returns `Ok` and the
//! strategy commits.
//!
//! ```text
//! run(store, footprint, body):
//!   acquire / record        <- strategy specific
//!   body(view)              <- reads + buffered writes
//!   validate                <- strategy specific (may abort)
//!   install writes          <- version += 1 per key
//! ```

use phasekv_core::{AbortReason, ColdMode, Key, Value};
use phasekv_storage::{KeyStore, Slot};
use smallvec::SmallVec;
use std::fmt;
use std::sync::Arc;

use crate::locking::LockingAccess;
use crate::optimistic::OptimisticAccess;

/// View of the store handed to a transaction body
pub trait ColdView {
    /// Read a key, observing this transaction's own writes first
    fn read(&mut self, key: &Key) -> Option<Value>;

    /// Buffer a write; installed at commit
    fn write(&mut self, key: &Key, value: Value);

    /// Order stamp of the key's last ordered put, observing this
    /// transaction's own writes first
    fn stamp(&mut self, key: &Key) -> Option<u64>;

    /// Buffer the write of an ordered put together with its stamp
    fn write_ordered(&mut self, key: &Key, value: Value, stamp: u64);
}

/// Transaction body executed by a strategy
pub type TxnBody<'b> = dyn FnMut(&mut dyn ColdView) -> Result<(), AbortReason> + 'b;

/// Synchronization for cold keys
///
/// Implementations must guarantee that an `Err` return leaves every key
/// exactly as it was.
pub trait ColdAccess: Send + Sync + fmt::Debug {
    /// Which variant this is
    fn mode(&self) -> ColdMode;

    /// Run `body` as one transaction over the keys in `footprint`
    fn run(
        &self,
        store: &KeyStore,
        footprint: &Footprint,
        body: &mut TxnBody<'_>,
    ) -> Result<(), AbortReason>;
}

/// Build the strategy selected by configuration
pub fn strategy_for(mode: ColdMode) -> Arc<dyn ColdAccess> {
    match mode {
        ColdMode::Locking => Arc::new(LockingAccess::new()),
        ColdMode::Optimistic => Arc::new(OptimisticAccess::new()),
    }
}

/// Keys a transaction intends to touch
///
/// Kept sorted by key and deduplicated; a key that is both read and written
/// is recorded once as exclusive. The sort order is the lock acquisition
/// order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Footprint {
    entries: SmallVec<[(Key, bool); 4]>,
}

impl Footprint {
    /// Create an empty footprint
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a read of `key`
    pub fn read(&mut self, key: &Key) {
        self.declare(key, false);
    }

    /// Declare a write (or read-modify-write) of `key`
    pub fn write(&mut self, key: &Key) {
        self.declare(key, true);
    }

    fn declare(&mut self, key: &Key, exclusive: bool) {
        match self.entries.binary_search_by(|(k, _)| k.cmp(key)) {
            Ok(idx) => self.entries[idx].1 |= exclusive,
            Err(idx) => self.entries.insert(idx, (key.clone(), exclusive)),
        }
    }

    /// Position of `key` in lock order
    pub fn position(&self, key: &Key) -> Option<usize> {
        self.entries.binary_search_by(|(k, _)| k.cmp(key)).ok()
    }

    /// Check if `key` was declared as written
    pub fn is_exclusive(&self, key: &Key) -> bool {
        self.position(key)
            .map(|idx| self.entries[idx].1)
            .unwrap_or(false)
    }

    /// Declared keys in lock order with their exclusivity
    pub fn iter(&self) -> impl Iterator<Item = (&Key, bool)> {
        self.entries.iter().map(|(k, excl)| (k, *excl))
    }

    /// Number of distinct keys
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if no key was declared
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A write waiting in a [`WriteBuffer`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingWrite {
    /// Written key
    pub key: Key,
    /// Value to install
    pub value: Value,
    /// Order stamp to install with it, if an ordered put wrote the key
    pub stamp: Option<u64>,
}

impl PendingWrite {
    /// Install into a locked slot
    pub fn install(self, slot: &mut Slot) {
        match self.stamp {
            Some(stamp) => slot.install_ordered(self.value, stamp),
            None => slot.install(self.value),
        }
    }
}

/// Writes buffered by a transaction until commit
///
/// Later writes to the same key replace earlier ones; a plain write keeps
/// the stamp of an earlier ordered put to the same key.
#[derive(Debug, Clone, Default)]
pub struct WriteBuffer {
    writes: SmallVec<[PendingWrite; 4]>,
}

impl WriteBuffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    fn find(&self, key: &Key) -> Option<&PendingWrite> {
        self.writes.iter().find(|w| &w.key == key)
    }

    /// Buffered value for `key`, if any
    pub fn get(&self, key: &Key) -> Option<&Value> {
        self.find(key).map(|w| &w.value)
    }

    /// Buffered order stamp for `key`, if an ordered put wrote it
    pub fn stamp(&self, key: &Key) -> Option<u64> {
        self.find(key).and_then(|w| w.stamp)
    }

    /// Buffer a write
    pub fn put(&mut self, key: &Key, value: Value) {
        self.push(key, value, None);
    }

    /// Buffer the write of an ordered put
    pub fn put_ordered(&mut self, key: &Key, value: Value, stamp: u64) {
        self.push(key, value, Some(stamp));
    }

    fn push(&mut self, key: &Key, value: Value, stamp: Option<u64>) {
        match self.writes.iter_mut().find(|w| &w.key == key) {
            Some(pending) => {
                pending.value = value;
                pending.stamp = stamp.or(pending.stamp);
            }
            None => self.writes.push(PendingWrite {
                key: key.clone(),
                value,
                stamp,
            }),
        }
    }

    /// Number of distinct keys written
    pub fn len(&self) -> usize {
        self.writes.len()
    }

    /// Check if nothing was written
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Consume the buffer, sorted by key
    pub fn into_sorted(mut self) -> SmallVec<[PendingWrite; 4]> {
        self.writes.sort_by(|a, b| a.key.cmp(&b.key));
        self.writes
    }
}
