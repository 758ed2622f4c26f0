//! Engine configuration
//!
//! [`EngineConfig`] collects every recognized option. It can be built in
//! code with the builder-style setters or loaded from TOML:
//!
//! ```toml
//! workers = 4
//! contention_threshold = 200
//! write_ratio_threshold = 0.8
//! cold_mode = "locking"
//! synchronous_results = true
//!
//! [epoch]
//! policy = "interval"
//! millis = 20
//! ```
//!
//! A configuration must pass [`EngineConfig::validate`] before a coordinator
//! is started; the coordinator refuses to start otherwise.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// How long the running phase of an epoch lasts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum EpochPolicy {
    /// End the epoch after a fixed wall-clock slice
    Interval {
        /// Slice length in milliseconds
        millis: u64,
    },
    /// End the epoch once this many transactions were submitted across all
    /// workers
    Transactions {
        /// Transactions per epoch
        count: u64,
    },
    /// Epochs only advance when `run_epoch_cycle` is called explicitly
    Manual,
}

impl Default for EpochPolicy {
    fn default() -> Self {
        EpochPolicy::Interval { millis: 20 }
    }
}

/// Synchronization used for cold keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColdMode {
    /// Per-key reader/writer locks held for the whole transaction
    Locking,
    /// Versioned reads validated at commit (aborts on conflict)
    Optimistic,
}

impl Default for ColdMode {
    fn default() -> Self {
        ColdMode::Optimistic
    }
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of worker threads
    pub workers: usize,

    /// Sampled accesses per epoch at which a key counts as contended
    pub contention_threshold: u64,

    /// Minimum fraction of write-side accesses (writes and conflicts) for a
    /// contended key to be promoted; a hot key below it is demoted
    pub write_ratio_threshold: f64,

    /// Consecutive quiet epochs before a hot key is demoted
    pub demotion_hysteresis: u32,

    /// Cold-key synchronization strategy
    pub cold_mode: ColdMode,

    /// Materialize results and deliver deferred results to waiting callers
    pub synchronous_results: bool,

    /// Verify reconciliation invariants after every epoch
    pub strict_validation: bool,

    /// Record one access sample in every `sample_every` accesses
    pub sample_every: u32,

    /// How long the coordinator waits for a worker at the barrier
    pub quiescence_grace_millis: u64,

    /// Keep exact per-key access counts per worker
    pub track_key_accesses: bool,

    /// Epoch slice policy
    pub epoch: EpochPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            contention_threshold: 100,
            write_ratio_threshold: 0.75,
            demotion_hysteresis: 3,
            cold_mode: ColdMode::default(),
            synchronous_results: true,
            strict_validation: false,
            sample_every: 1,
            quiescence_grace_millis: 5_000,
            track_key_accesses: false,
            epoch: EpochPolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Create a configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of workers
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the epoch slice policy
    pub fn epoch(mut self, policy: EpochPolicy) -> Self {
        self.epoch = policy;
        self
    }

    /// Only advance epochs on explicit `run_epoch_cycle` calls
    pub fn manual_epochs(self) -> Self {
        self.epoch(EpochPolicy::Manual)
    }

    /// Set the contention threshold
    pub fn contention_threshold(mut self, threshold: u64) -> Self {
        self.contention_threshold = threshold;
        self
    }

    /// Set the write-ratio threshold (0.0 - 1.0)
    pub fn write_ratio_threshold(mut self, ratio: f64) -> Self {
        self.write_ratio_threshold = ratio;
        self
    }

    /// Set the demotion hysteresis in epochs
    pub fn demotion_hysteresis(mut self, epochs: u32) -> Self {
        self.demotion_hysteresis = epochs;
        self
    }

    /// Select the cold-key strategy
    pub fn cold_mode(mut self, mode: ColdMode) -> Self {
        self.cold_mode = mode;
        self
    }

    /// Enable or disable result materialization and deferred delivery
    pub fn synchronous_results(mut self, enabled: bool) -> Self {
        self.synchronous_results = enabled;
        self
    }

    /// Enable or disable post-reconciliation invariant checks
    pub fn strict_validation(mut self, enabled: bool) -> Self {
        self.strict_validation = enabled;
        self
    }

    /// Record one sample per `n` accesses
    pub fn sample_every(mut self, n: u32) -> Self {
        self.sample_every = n;
        self
    }

    /// Set the barrier grace period
    pub fn quiescence_grace(mut self, grace: Duration) -> Self {
        self.quiescence_grace_millis = grace.as_millis() as u64;
        self
    }

    /// Enable exact per-key access tracking
    pub fn track_key_accesses(mut self, enabled: bool) -> Self {
        self.track_key_accesses = enabled;
        self
    }

    /// Barrier grace period as a [`Duration`]
    pub fn quiescence_grace_duration(&self) -> Duration {
        Duration::from_millis(self.quiescence_grace_millis)
    }

    /// Check that the options are coherent
    ///
    /// Strict validation needs every deferred result to be observable, so it
    /// requires synchronous result delivery.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::Config("at least one worker is required".into()));
        }
        if !(0.0..=1.0).contains(&self.write_ratio_threshold) {
            return Err(Error::Config(format!(
                "write_ratio_threshold must be within [0, 1], got {}",
                self.write_ratio_threshold
            )));
        }
        if self.strict_validation && !self.synchronous_results {
            return Err(Error::Config(
                "cannot validate results without synchronous result delivery; \
                 enable synchronous_results"
                    .into(),
            ));
        }
        if self.sample_every == 0 {
            return Err(Error::Config("sample_every must be at least 1".into()));
        }
        if self.quiescence_grace_millis == 0 {
            return Err(Error::Config("quiescence grace must be non-zero".into()));
        }
        match self.epoch {
            EpochPolicy::Interval { millis: 0 } => {
                Err(Error::Config("epoch interval must be non-zero".into()))
            }
            EpochPolicy::Transactions { count: 0 } => {
                Err(Error::Config("epoch transaction slice must be non-zero".into()))
            }
            _ => Ok(()),
        }
    }

    /// Parse a configuration from TOML text and validate it
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: EngineConfig =
            toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a TOML file and validate it
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Render the configuration as TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self).map_err(|e| Error::Config(e.to_string()))
    }
}
