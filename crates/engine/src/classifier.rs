//! Contention classifier
//!
//! Workers sample key accesses with an [`AccessSampler`]; at the barrier the
//! samples are scaled back up and folded into the key records, and the
//! [`Classifier`] decides each key's mode for the next epoch.
//!
//! ## Rules
//!
//! ```text
//! busy  = reads + writes + conflicts >= contention_threshold
//! ratio = (writes + conflicts) / total
//!
//! cold: busy && ratio >= write_ratio_threshold          -> promote
//! hot:  busy && ratio <  write_ratio_threshold          -> demote (read-dominated)
//!       !busy for demotion_hysteresis epochs in a row   -> demote (idle)
//! ```
//!
//! Sampling is approximate; a misclassified key only costs performance.

use phasekv_core::{EngineConfig, Key, Mode};
use phasekv_storage::{AccessSample, KeyRecord};
use rustc_hash::FxHashMap;

/// Outcome of classifying one key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Keep the current mode
    Stay,
    /// Cold to hot
    Promote,
    /// Hot to cold
    Demote,
}

/// Promotion and demotion thresholds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classifier {
    contention_threshold: u64,
    write_ratio_threshold: f64,
    demotion_hysteresis: u32,
}

impl Classifier {
    /// Create a classifier
    pub fn new(contention_threshold: u64, write_ratio_threshold: f64, demotion_hysteresis: u32) -> Self {
        Self {
            contention_threshold,
            write_ratio_threshold,
            demotion_hysteresis,
        }
    }

    /// Classifier with the thresholds of `config`
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            config.contention_threshold,
            config.write_ratio_threshold,
            config.demotion_hysteresis,
        )
    }

    /// Check if the sample counts as contended
    pub fn is_busy(&self, sample: &AccessSample) -> bool {
        sample.total() >= self.contention_threshold
    }

    /// Decide from a sample and the quiet streak including this epoch
    pub fn decide(&self, mode: Mode, sample: &AccessSample, quiet_streak: u32) -> Decision {
        let write_heavy = sample.write_ratio() >= self.write_ratio_threshold;
        match mode {
            Mode::Cold if self.is_busy(sample) && write_heavy => Decision::Promote,
            Mode::Cold => Decision::Stay,
            Mode::Hot if self.is_busy(sample) => {
                if write_heavy {
                    Decision::Stay
                } else {
                    Decision::Demote
                }
            }
            Mode::Hot if quiet_streak >= self.demotion_hysteresis => Decision::Demote,
            Mode::Hot => Decision::Stay,
        }
    }

    /// Decide for a record, updating its quiet streak
    ///
    /// Reconciliation-only. The caller applies the mode flip.
    pub fn classify(&self, record: &KeyRecord, sample: &AccessSample) -> Decision {
        let mode = record.mode();
        let streak = match mode {
            Mode::Hot if self.is_busy(sample) => {
                record.note_busy_epoch();
                0
            }
            Mode::Hot => record.note_quiet_epoch(),
            Mode::Cold => 0,
        };
        self.decide(mode, sample, streak)
    }
}

/// Kind of access being sampled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Observed the value
    Read,
    /// Changed (or tried to change) the value
    Write,
    /// Aborted because of this key
    Conflict,
}

/// Worker-local 1-in-N access sampler
#[derive(Debug)]
pub struct AccessSampler {
    every: u64,
    tick: u64,
    taken: u64,
    samples: FxHashMap<Key, AccessSample>,
}

impl AccessSampler {
    /// Sample one in every `every` accesses
    pub fn new(every: u32) -> Self {
        Self {
            every: u64::from(every.max(1)),
            tick: 0,
            taken: 0,
            samples: FxHashMap::default(),
        }
    }

    /// Sampling factor used to scale counts back up
    pub fn every(&self) -> u64 {
        self.every
    }

    /// Note one access
    pub fn note(&mut self, key: &Key, access: Access) {
        self.tick += 1;
        if self.tick % self.every != 0 {
            return;
        }
        self.taken += 1;
        let sample = self.samples.entry(key.clone()).or_default();
        match access {
            Access::Read => sample.reads += 1,
            Access::Write => sample.writes += 1,
            Access::Conflict => sample.conflicts += 1,
        }
    }

    /// Accesses recorded since the last drain
    pub fn taken(&self) -> u64 {
        self.taken
    }

    /// Hand over the raw samples and reset
    pub fn drain(&mut self) -> Vec<(Key, AccessSample)> {
        self.taken = 0;
        self.samples.drain().collect()
    }
}
