//! Key records
//!
//! A [`KeyRecord`] is the unit of storage. Besides the value it carries the
//! bookkeeping the contention classifier needs:
//!
//! - `mode`: cold or hot, flipped only during reconciliation
//! - access-sample counters (reads, writes, conflicts), reset every epoch
//! - `generation`: the epoch of the last mode flip or hot-key merge
//! - `quiet_epochs`: consecutive epochs a hot key spent under the
//!   contention threshold (demotion hysteresis)

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use phasekv_core::{Epoch, Key, Mode, Value};
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};

/// Versioned value held under a record's lock
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Slot {
    /// Current value, `None` until the key is first written
    pub value: Option<Value>,
    /// Incremented on every installed write
    pub version: u64,
    /// Highest order stamp an ordered put installed; plain writes keep it
    pub stamp: Option<u64>,
}

impl Slot {
    /// Install a new value and bump the version
    pub fn install(&mut self, value: Value) {
        self.value = Some(value);
        self.version += 1;
    }

    /// Check if an ordered put stamped `stamp` wins against the stored one
    ///
    /// Equal stamps go to the later writer.
    pub fn admits(&self, stamp: u64) -> bool {
        self.stamp.map_or(true, |held| stamp >= held)
    }

    /// Install the value of an ordered put and remember its stamp
    pub fn install_ordered(&mut self, value: Value, stamp: u64) {
        self.install(value);
        self.stamp = Some(stamp);
    }
}

/// Access counts collected for one key during one epoch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccessSample {
    /// Read accesses
    pub reads: u64,
    /// Write accesses
    pub writes: u64,
    /// Aborts attributed to this key
    pub conflicts: u64,
}

impl AccessSample {
    /// All accesses
    pub fn total(&self) -> u64 {
        self.reads + self.writes + self.conflicts
    }

    /// Fraction of write-side accesses (writes and conflicts)
    ///
    /// An untouched key has a ratio of zero.
    pub fn write_ratio(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        (self.writes + self.conflicts) as f64 / total as f64
    }

    /// Add another sample into this one
    pub fn absorb(&mut self, other: AccessSample) {
        self.reads += other.reads;
        self.writes += other.writes;
        self.conflicts += other.conflicts;
    }

    /// Multiply every count, undoing 1-in-n sampling
    pub fn scaled(self, factor: u64) -> AccessSample {
        AccessSample {
            reads: self.reads.saturating_mul(factor),
            writes: self.writes.saturating_mul(factor),
            conflicts: self.conflicts.saturating_mul(factor),
        }
    }
}

/// A key and everything the engine tracks about it
#[derive(Debug)]
pub struct KeyRecord {
    key: Key,
    slot: RwLock<Slot>,
    mode: AtomicU8,
    generation: AtomicU64,
    quiet_epochs: AtomicU32,
    reads: AtomicU64,
    writes: AtomicU64,
    conflicts: AtomicU64,
}

impl KeyRecord {
    /// Create an unwritten cold record
    pub fn new(key: Key) -> Self {
        Self {
            key,
            slot: RwLock::new(Slot::default()),
            mode: AtomicU8::new(Mode::Cold.as_u8()),
            generation: AtomicU64::new(0),
            quiet_epochs: AtomicU32::new(0),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            conflicts: AtomicU64::new(0),
        }
    }

    /// Create a cold record holding `value` at version 1
    pub fn with_value(key: Key, value: Value) -> Self {
        let record = Self::new(key);
        record.slot.write().install(value);
        record
    }

    /// Key of this record
    pub fn key(&self) -> &Key {
        &self.key
    }

    // ========================================================================
    // Value access
    // ========================================================================

    /// Clone the current value
    pub fn value(&self) -> Option<Value> {
        self.slot.read().value.clone()
    }

    /// Clone the current value together with its version
    pub fn snapshot(&self) -> Slot {
        self.slot.read().clone()
    }

    /// Current version
    pub fn version(&self) -> u64 {
        self.slot.read().version
    }

    /// Shared lock on the slot
    #[inline]
    pub fn read_slot(&self) -> RwLockReadGuard<'_, Slot> {
        self.slot.read()
    }

    /// Exclusive lock on the slot
    #[inline]
    pub fn write_slot(&self) -> RwLockWriteGuard<'_, Slot> {
        self.slot.write()
    }

    /// Shared lock on the slot without blocking
    #[inline]
    pub fn try_read_slot(&self) -> Option<RwLockReadGuard<'_, Slot>> {
        self.slot.try_read()
    }

    /// Exclusive lock on the slot without blocking
    #[inline]
    pub fn try_write_slot(&self) -> Option<RwLockWriteGuard<'_, Slot>> {
        self.slot.try_write()
    }

    // ========================================================================
    // Mode
    // ========================================================================

    /// Current mode
    #[inline]
    pub fn mode(&self) -> Mode {
        Mode::from_u8(self.mode.load(Ordering::Acquire))
    }

    /// Flip the mode
    ///
    /// Must only be called during reconciliation, while no worker is
    /// executing. Resets the quiet-epoch streak and stamps the generation.
    pub fn set_mode(&self, mode: Mode, epoch: Epoch) {
        self.mode.store(mode.as_u8(), Ordering::Release);
        self.quiet_epochs.store(0, Ordering::Relaxed);
        self.generation.store(epoch.as_u64(), Ordering::Relaxed);
    }

    /// Epoch of the last mode flip or hot-key merge
    pub fn generation(&self) -> Epoch {
        Epoch(self.generation.load(Ordering::Relaxed))
    }

    /// Stamp the generation after a reconciliation merge
    pub fn touch_generation(&self, epoch: Epoch) {
        self.generation.store(epoch.as_u64(), Ordering::Relaxed);
    }

    /// Record one more quiet epoch and return the streak length
    pub fn note_quiet_epoch(&self) -> u32 {
        self.quiet_epochs.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Reset the quiet-epoch streak
    pub fn note_busy_epoch(&self) {
        self.quiet_epochs.store(0, Ordering::Relaxed);
    }

    /// Current quiet-epoch streak
    pub fn quiet_epochs(&self) -> u32 {
        self.quiet_epochs.load(Ordering::Relaxed)
    }

    // ========================================================================
    // Access samples
    // ========================================================================

    /// Add sampled accesses to this epoch's counters
    pub fn record_sample(&self, sample: AccessSample) {
        if sample.reads > 0 {
            self.reads.fetch_add(sample.reads, Ordering::Relaxed);
        }
        if sample.writes > 0 {
            self.writes.fetch_add(sample.writes, Ordering::Relaxed);
        }
        if sample.conflicts > 0 {
            self.conflicts.fetch_add(sample.conflicts, Ordering::Relaxed);
        }
    }

    /// Read and reset this epoch's counters
    pub fn take_sample(&self) -> AccessSample {
        AccessSample {
            reads: self.reads.swap(0, Ordering::Relaxed),
            writes: self.writes.swap(0, Ordering::Relaxed),
            conflicts: self.conflicts.swap(0, Ordering::Relaxed),
        }
    }
}
