//! Main entry point for phasekv.
//!
//! [`PhaseKv`] bundles a key store with a running epoch coordinator and
//! routes each transaction to the worker that owns its first key.

use crate::error::{Error, Result};
use phasekv_core::{ColdMode, EngineConfig, Epoch, EpochPolicy, Key, Mode, Value};
use phasekv_engine::{collect_counts, Coordinator, Counts, Execution, Outcome, Query, TxnResult};
use phasekv_storage::{new_store, KeyStore};
use std::path::Path;
use std::sync::Arc;

/// Default number of keys the store is sized for.
const DEFAULT_CAPACITY: usize = 1024;

/// An in-memory transactional key-value engine.
///
/// Create one with [`PhaseKv::open`] or [`PhaseKv::builder`].
///
/// # Example
///
/// ```
/// use phasekv::prelude::*;
///
/// let db = PhaseKv::builder()
///     .workers(2)
///     .manual_epochs()
///     .preload(Key::new("stock"), Value::Int(10))
///     .hot_key(Key::new("stock"))
///     .open()
///     .unwrap();
///
/// // Hot-key increments are buffered until the epoch ends
/// let exec = db.submit(Query::new().add(Key::new("stock"), -1)).unwrap();
/// assert!(exec.is_committed());
/// assert_eq!(db.get(&Key::new("stock")), Some(Value::Int(10)));
///
/// db.advance_epoch().unwrap();
/// assert_eq!(db.get(&Key::new("stock")), Some(Value::Int(9)));
/// db.finish().unwrap();
/// ```
pub struct PhaseKv {
    store: Arc<KeyStore>,
    coordinator: Coordinator,
}

impl PhaseKv {
    /// Start an engine with the given configuration.
    pub fn open(config: EngineConfig) -> Result<Self> {
        Self::builder().config(config).open()
    }

    /// Start an engine configured from a TOML file.
    pub fn open_with_config_file(path: impl AsRef<Path>) -> Result<Self> {
        let config = EngineConfig::from_file(path)?;
        Self::open(config)
    }

    /// Create a builder.
    pub fn builder() -> PhaseKvBuilder {
        PhaseKvBuilder::new()
    }

    /// Submit a transaction to the worker owning its first key.
    ///
    /// Returns as soon as the worker has committed, aborted or stashed it.
    pub fn submit(&self, query: Query) -> Result<Execution> {
        let worker = match query.ops().first() {
            Some(op) => self.coordinator.worker_for(op.key()),
            None => &self.coordinator.workers()[0],
        };
        worker.execute(query).map_err(Error::from)
    }

    /// Submit a transaction and wait for its final result.
    ///
    /// A deferred transaction blocks until the epoch it was stashed in is
    /// reconciled; with manual epochs another thread must drive the cycle.
    /// Aborts are returned as [`Error::Aborted`].
    pub fn run(&self, query: Query) -> Result<TxnResult> {
        let result = self.submit(query)?.wait()?;
        match result.outcome {
            Outcome::Aborted(reason) => Err(Error::Aborted(reason)),
            _ => Ok(result),
        }
    }

    /// Current value of a key.
    ///
    /// For a hot key this is the value as of the last reconciliation.
    pub fn get(&self, key: &Key) -> Option<Value> {
        self.store.get(key)
    }

    /// Current mode of a key.
    pub fn mode(&self, key: &Key) -> Mode {
        self.store.classify(key)
    }

    /// Current epoch.
    pub fn epoch(&self) -> Epoch {
        self.coordinator.epoch()
    }

    /// Run one barrier and reconciliation cycle now.
    pub fn advance_epoch(&self) -> Result<Epoch> {
        self.coordinator.run_epoch_cycle().map_err(Error::from)
    }

    /// Global counters.
    pub fn counts(&self) -> Counts {
        collect_counts(&self.coordinator)
    }

    /// The underlying coordinator.
    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    /// The underlying key store.
    pub fn store(&self) -> &Arc<KeyStore> {
        &self.store
    }

    /// Deliver all stashed work and stop the workers.
    ///
    /// After calling `finish()`, submissions fail.
    pub fn finish(&self) -> Result<()> {
        self.coordinator.finish().map_err(Error::from)
    }
}

/// Builder for engine configuration.
///
/// Initial data and initial hot keys are installed before any worker
/// starts, so they never race with transactions.
pub struct PhaseKvBuilder {
    config: EngineConfig,
    capacity: usize,
    preload: Vec<(Key, Value)>,
    hot_keys: Vec<Key>,
}

impl PhaseKvBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            capacity: DEFAULT_CAPACITY,
            preload: Vec::new(),
            hot_keys: Vec::new(),
        }
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Number of worker threads.
    pub fn workers(mut self, workers: usize) -> Self {
        self.config = self.config.workers(workers);
        self
    }

    /// Cold-key synchronization strategy.
    pub fn cold_mode(mut self, mode: ColdMode) -> Self {
        self.config = self.config.cold_mode(mode);
        self
    }

    /// Epoch slice policy.
    pub fn epoch(mut self, policy: EpochPolicy) -> Self {
        self.config = self.config.epoch(policy);
        self
    }

    /// Only advance epochs through [`PhaseKv::advance_epoch`].
    pub fn manual_epochs(mut self) -> Self {
        self.config = self.config.manual_epochs();
        self
    }

    /// Expected number of keys.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Store a value before the engine starts.
    pub fn preload(mut self, key: Key, value: Value) -> Self {
        self.preload.push((key, value));
        self
    }

    /// Start a key in hot mode.
    ///
    /// The classifier may demote it at any later reconciliation.
    pub fn hot_key(mut self, key: Key) -> Self {
        self.hot_keys.push(key);
        self
    }

    /// Start the engine.
    pub fn open(self) -> Result<PhaseKv> {
        self.config.validate()?;
        let store = new_store(self.capacity);
        for (key, value) in self.preload {
            store.put(key, value);
        }
        for key in &self.hot_keys {
            store.set_mode(key, Mode::Hot, Epoch::ZERO);
        }
        tracing::debug!(
            keys = store.len(),
            hot_keys = self.hot_keys.len(),
            "store initialized"
        );
        let coordinator = Coordinator::with_config(self.config, Arc::clone(&store))?;
        Ok(PhaseKv { store, coordinator })
    }
}

impl Default for PhaseKvBuilder {
    fn default() -> Self {
        Self::new()
    }
}
