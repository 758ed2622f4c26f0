//! Sharded key store
//!
//! DashMap of key records with FxHash keys.
//! Lock-free lookups on the map, per-record locks on values.
//!
//! # Design
//!
//! - DashMap: 16-way sharded by default, shard lock held only for the map
//!   lookup or insert
//! - FxHash: fast non-crypto hash for short string keys
//! - `Arc<KeyRecord>`: callers keep a record alive while holding its slot
//!   lock, without keeping the map shard locked
//!
//! # Mode Discipline
//!
//! The store does not know about epochs. It is up to the caller to respect
//! the rule that hot-key values are only mutated during reconciliation;
//! [`KeyStore::put`] is intended for loading data before a workload starts
//! and for the coordinator itself.

use dashmap::DashMap;
use phasekv_core::{Epoch, Key, Mode, Value};
use rustc_hash::FxHasher;
use std::hash::BuildHasherDefault;
use std::sync::Arc;

use crate::record::KeyRecord;

type FxBuildHasher = BuildHasherDefault<FxHasher>;

/// Sharded table of key records
///
/// # Thread Safety
///
/// All operations are thread-safe:
/// - lookups only take a shard read lock for the duration of the map probe
/// - inserting a new key only locks the target shard
/// - values are protected by each record's own lock
///
/// # Example
///
/// ```
/// use phasekv_core::{Key, Mode, Value};
/// use phasekv_storage::KeyStore;
///
/// let store = KeyStore::with_capacity(16);
/// store.put(Key::new("stock"), Value::Int(10));
/// assert_eq!(store.get(&Key::new("stock")), Some(Value::Int(10)));
/// assert_eq!(store.classify(&Key::new("stock")), Mode::Cold);
/// ```
pub struct KeyStore {
    records: DashMap<Key, Arc<KeyRecord>, FxBuildHasher>,
}

impl KeyStore {
    /// Create new empty store
    pub fn new() -> Self {
        Self {
            records: DashMap::with_hasher(FxBuildHasher::default()),
        }
    }

    /// Create with expected number of keys
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: DashMap::with_capacity_and_hasher(capacity, FxBuildHasher::default()),
        }
    }

    /// Number of keys
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if the store holds no keys
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    // ========================================================================
    // Record access
    // ========================================================================

    /// Look up a record
    #[inline]
    pub fn record(&self, key: &Key) -> Option<Arc<KeyRecord>> {
        self.records.get(key).map(|entry| Arc::clone(entry.value()))
    }

    /// Look up a record, creating an unwritten cold record if absent
    #[inline]
    pub fn record_or_insert(&self, key: &Key) -> Arc<KeyRecord> {
        if let Some(record) = self.record(key) {
            return record;
        }
        Arc::clone(
            self.records
                .entry(key.clone())
                .or_insert_with(|| Arc::new(KeyRecord::new(key.clone())))
                .value(),
        )
    }

    /// Check if a key exists
    #[inline]
    pub fn contains(&self, key: &Key) -> bool {
        self.records.contains_key(key)
    }

    // ========================================================================
    // Get/Put/Classify
    // ========================================================================

    /// Get the current value of a key
    ///
    /// For a hot key this is the canonical value as of the last
    /// reconciliation.
    #[inline]
    pub fn get(&self, key: &Key) -> Option<Value> {
        self.record(key).and_then(|record| record.value())
    }

    /// Set the value of a key, creating it if needed
    ///
    /// Returns the new version.
    pub fn put(&self, key: Key, value: Value) -> u64 {
        let record = self.record_or_insert(&key);
        let mut slot = record.write_slot();
        slot.install(value);
        tracing::trace!(key = %key, version = slot.version, "put");
        slot.version
    }

    /// Current mode of a key
    ///
    /// Keys that do not exist yet are cold.
    #[inline]
    pub fn classify(&self, key: &Key) -> Mode {
        self.record(key)
            .map(|record| record.mode())
            .unwrap_or(Mode::Cold)
    }

    /// Flip the mode of a key, creating it if needed
    ///
    /// Reconciliation-only; see [`KeyRecord::set_mode`].
    pub fn set_mode(&self, key: &Key, mode: Mode, epoch: Epoch) {
        tracing::trace!(key = %key, %mode, %epoch, "mode flip");
        self.record_or_insert(key).set_mode(mode, epoch);
    }

    // ========================================================================
    // Scans
    // ========================================================================

    /// All keys currently in hot mode, sorted
    ///
    /// O(n) scan; not for the transaction path.
    pub fn hot_keys(&self) -> Vec<Key> {
        let mut keys: Vec<Key> = self
            .records
            .iter()
            .filter(|entry| entry.value().mode() == Mode::Hot)
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        keys
    }

    /// Number of keys in hot mode
    pub fn hot_count(&self) -> usize {
        self.records
            .iter()
            .filter(|entry| entry.value().mode() == Mode::Hot)
            .count()
    }

    /// All keys with their current values, sorted by key
    ///
    /// Unwritten records are skipped.
    pub fn entries(&self) -> Vec<(Key, Value)> {
        let mut results: Vec<_> = self
            .records
            .iter()
            .filter_map(|entry| {
                entry
                    .value()
                    .value()
                    .map(|value| (entry.key().clone(), value))
            })
            .collect();
        results.sort_by(|(a, _), (b, _)| a.cmp(b));
        results
    }
}

impl Default for KeyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for KeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyStore")
            .field("keys", &self.len())
            .field("hot_keys", &self.hot_count())
            .finish()
    }
}
