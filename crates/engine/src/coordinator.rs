//! Epoch coordinator
//!
//! Owns the worker pool, the global epoch clock and the global counters.
//!
//! ## Epoch Cycle
//!
//! ```text
//! 1. Barrier       - Pause every worker; wait (bounded by the quiescence
//!                    grace) until each reports its deltas, stash, samples
//! 2. Merge         - apply delta buffers to hot keys in worker order
//! 3. Classify      - fold samples into records; promote / demote keys
//! 4. Replay        - run stashed transactions in sequence order against the
//!                    merged state; deliver results
//! 5. Complete      - epoch += 1; Resume every worker
//! ```
//!
//! Steps 2-4 run on the calling thread while every worker is parked, so
//! reconciliation is never concurrent with transaction execution. Cycles are
//! serialized by an internal lock.
//!
//! ## Epoch Slices
//!
//! Unless the policy is [`EpochPolicy::Manual`], a background driver thread
//! runs cycles on its own: after a wall-clock interval, or once enough
//! transactions were executed. A driver that hits a fatal error (a worker
//! missing the barrier) logs diagnostics and aborts the process.
//!
//! ## Failure
//!
//! A cycle that fails (a worker missing the barrier, or strict validation
//! finding an inconsistency) halts the engine: workers are told to stop
//! instead of resuming, and no transaction submitted afterwards is
//! executed. Only `finish` or drop remain useful.

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError};
use parking_lot::{Condvar, Mutex};
use phasekv_concurrency::{strategy_for, LockingAccess};
use phasekv_core::{EngineConfig, Epoch, EpochPolicy, Error, Key, Mode, Result, Value, WorkerId};
use phasekv_storage::KeyStore;
use rustc_hash::{FxHashMap, FxHashSet, FxHasher};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::classifier::{Classifier, Decision};
use crate::delta::Delta;
use crate::exec::run_ops;
use crate::query::TxnResult;
use crate::stats::{Stat, StatCounters, WorkerStats};
use crate::worker::{Control, Quiesced, StashEntry, Worker, WorkerContext};

const RUNNING: u8 = 0;
const FAILED: u8 = 1;
const STOPPED: u8 = 2;

/// Poll interval of the transaction-slice driver
const SLICE_POLL: Duration = Duration::from_millis(10);

/// Create a coordinator with `num_workers` workers and default settings
pub fn new_coordinator(num_workers: usize, store: Arc<KeyStore>) -> Result<Coordinator> {
    Coordinator::with_config(EngineConfig::default().workers(num_workers), store)
}

// ============================================================================
// Shared state
// ============================================================================

/// Signals the end of a transaction slice to the driver
pub(crate) struct SliceClock {
    len: Option<u64>,
    executed: AtomicU64,
    stopping: Mutex<bool>,
    ready: Condvar,
}

impl SliceClock {
    fn new(policy: EpochPolicy) -> Self {
        let len = match policy {
            EpochPolicy::Transactions { count } => Some(count),
            EpochPolicy::Interval { .. } | EpochPolicy::Manual => None,
        };
        Self {
            len,
            executed: AtomicU64::new(0),
            stopping: Mutex::new(false),
            ready: Condvar::new(),
        }
    }

    /// Count one executed transaction
    pub(crate) fn tick(&self) {
        if let Some(len) = self.len {
            if self.executed.fetch_add(1, Ordering::Relaxed) + 1 == len {
                let _guard = self.stopping.lock();
                self.ready.notify_all();
            }
        }
    }

    fn reset(&self) {
        self.executed.store(0, Ordering::Relaxed);
    }

    fn stop(&self) {
        *self.stopping.lock() = true;
        self.ready.notify_all();
    }

    /// Block until the current slice is over; `false` once stopping
    fn wait(&self, policy: EpochPolicy) -> bool {
        let mut stopping = self.stopping.lock();
        match policy {
            EpochPolicy::Interval { millis } => {
                let deadline = Instant::now() + Duration::from_millis(millis);
                while !*stopping {
                    if self.ready.wait_until(&mut stopping, deadline).timed_out() {
                        break;
                    }
                }
            }
            EpochPolicy::Transactions { count } => {
                while !*stopping && self.executed.load(Ordering::Relaxed) < count {
                    self.ready.wait_for(&mut stopping, SLICE_POLL);
                }
            }
            EpochPolicy::Manual => return false,
        }
        !*stopping
    }
}

/// State shared between the coordinator and its workers
pub(crate) struct Shared {
    pub(crate) epoch: AtomicU64,
    pub(crate) sequence: AtomicU64,
    pub(crate) slice: SliceClock,
    /// Set once a cycle failed; workers take no further jobs
    halted: AtomicBool,
}

impl Shared {
    pub(crate) fn is_halted(&self) -> bool {
        self.halted.load(Ordering::Acquire)
    }
}

// ============================================================================
// Coordinator
// ============================================================================

struct Inner {
    config: EngineConfig,
    store: Arc<KeyStore>,
    shared: Arc<Shared>,
    workers: Vec<Worker>,
    reports: Receiver<Quiesced>,
    classifier: Classifier,
    replay: LockingAccess,
    cycle: Mutex<()>,
    counters: StatCounters,
    worker_stats: Mutex<Vec<WorkerStats>>,
    key_accesses: Mutex<FxHashMap<Key, u64>>,
    state: AtomicU8,
}

/// Result of one reconciliation
#[derive(Debug, Default)]
struct Reconciled {
    merged_keys: u64,
    dropped_deltas: u64,
    promotions: u64,
    demotions: u64,
    replayed: u64,
    replay_aborts: u64,
    undelivered: u64,
}

/// Drives epochs over a fixed pool of workers
///
/// # Example
///
/// ```
/// use phasekv_core::{EngineConfig, Key, Value};
/// use phasekv_engine::{Coordinator, Query};
/// use phasekv_storage::new_store;
///
/// let store = new_store(16);
/// store.put(Key::new("visits"), Value::Int(0));
///
/// let config = EngineConfig::new().workers(2).manual_epochs();
/// let coord = Coordinator::with_config(config, store.clone()).unwrap();
///
/// let exec = coord.workers()[0]
///     .execute(Query::new().add(Key::new("visits"), 1))
///     .unwrap();
/// assert!(exec.is_committed());
///
/// coord.finish().unwrap();
/// assert_eq!(store.get(&Key::new("visits")), Some(Value::Int(1)));
/// ```
pub struct Coordinator {
    inner: Arc<Inner>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl Coordinator {
    /// Validate `config`, start the workers and, unless epochs are manual,
    /// the background epoch driver
    pub fn with_config(config: EngineConfig, store: Arc<KeyStore>) -> Result<Self> {
        config.validate()?;

        let shared = Arc::new(Shared {
            epoch: AtomicU64::new(0),
            sequence: AtomicU64::new(0),
            slice: SliceClock::new(config.epoch),
            halted: AtomicBool::new(false),
        });
        let access = strategy_for(config.cold_mode);
        let (report_tx, reports) = unbounded();

        let workers = (0..config.workers)
            .map(|id| {
                let ctx = WorkerContext {
                    store: Arc::clone(&store),
                    access: Arc::clone(&access),
                    shared: Arc::clone(&shared),
                    workers: config.workers,
                    synchronous_results: config.synchronous_results,
                    sample_every: config.sample_every,
                    track_key_accesses: config.track_key_accesses,
                };
                Worker::spawn(id, ctx, report_tx.clone())
            })
            .collect::<Result<Vec<_>>>()?;

        let inner = Arc::new(Inner {
            classifier: Classifier::from_config(&config),
            replay: LockingAccess::new(),
            cycle: Mutex::new(()),
            counters: StatCounters::default(),
            worker_stats: Mutex::new(vec![WorkerStats::default(); workers.len()]),
            key_accesses: Mutex::new(FxHashMap::default()),
            state: AtomicU8::new(RUNNING),
            config,
            store,
            shared,
            workers,
            reports,
        });

        let driver = match inner.config.epoch {
            EpochPolicy::Manual => None,
            policy => {
                let driven = Arc::clone(&inner);
                let handle = thread::Builder::new()
                    .name("phasekv-epoch".into())
                    .spawn(move || drive(driven, policy));
                match handle {
                    Ok(handle) => Some(handle),
                    Err(e) => {
                        inner.stop_workers();
                        return Err(Error::Io(e));
                    }
                }
            }
        };

        tracing::info!(
            workers = inner.workers.len(),
            cold_mode = ?inner.config.cold_mode,
            epoch_policy = ?inner.config.epoch,
            "coordinator started"
        );

        Ok(Coordinator {
            inner,
            driver: Mutex::new(driver),
        })
    }

    /// Run one barrier and reconciliation; returns the new epoch
    pub fn run_epoch_cycle(&self) -> Result<Epoch> {
        self.inner.run_cycle()
    }

    /// Run a final cycle so stashed work is delivered, then stop the workers
    ///
    /// Calling `finish` again is a no-op.
    pub fn finish(&self) -> Result<()> {
        if self.inner.state.load(Ordering::Acquire) == STOPPED {
            return Ok(());
        }
        self.stop_driver();
        let result = self.inner.run_cycle().map(|_| ());
        self.inner.stop_workers();

        let counts = self.inner.counters.snapshot();
        tracing::info!(
            epoch = %self.epoch(),
            iterations = counts.iterations,
            aborts = counts[Stat::Aborts],
            replayed = counts[Stat::Replayed],
            "coordinator finished"
        );
        result
    }

    /// Current epoch
    pub fn epoch(&self) -> Epoch {
        Epoch(self.inner.shared.epoch.load(Ordering::Acquire))
    }

    /// The worker pool, indexed by [`WorkerId`]
    pub fn workers(&self) -> &[Worker] {
        &self.inner.workers
    }

    /// Worker that owns `key`'s logical shard
    pub fn worker_for(&self, key: &Key) -> &Worker {
        let mut hasher = FxHasher::default();
        key.hash(&mut hasher);
        let idx = (hasher.finish() % self.inner.workers.len() as u64) as usize;
        &self.inner.workers[idx]
    }

    /// Key store the workers operate on
    pub fn store(&self) -> &Arc<KeyStore> {
        &self.inner.store
    }

    /// Active configuration
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Per-worker counters accumulated over completed barriers
    pub fn worker_stats(&self) -> Vec<WorkerStats> {
        self.inner.worker_stats.lock().clone()
    }

    /// Exact per-key access counts, most accessed first
    ///
    /// Empty unless `track_key_accesses` is enabled. Counts cover completed
    /// barriers only.
    pub fn key_accesses(&self) -> Vec<(Key, u64)> {
        let mut counts: Vec<_> = self
            .inner
            .key_accesses
            .lock()
            .iter()
            .map(|(k, n)| (k.clone(), *n))
            .collect();
        counts.sort_by(|(ka, a), (kb, b)| b.cmp(a).then_with(|| ka.cmp(kb)));
        counts
    }

    pub(crate) fn counters(&self) -> &StatCounters {
        &self.inner.counters
    }

    fn stop_driver(&self) {
        self.inner.shared.slice.stop();
        if let Some(handle) = self.driver.lock().take() {
            if handle.join().is_err() {
                tracing::error!("epoch driver panicked");
            }
        }
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        if self.inner.state.load(Ordering::Acquire) != STOPPED {
            tracing::debug!("coordinator dropped without finish; stashed work is discarded");
            self.stop_driver();
            self.inner.stop_workers();
        }
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("workers", &self.inner.workers.len())
            .field("epoch", &self.epoch())
            .finish()
    }
}

fn drive(inner: Arc<Inner>, policy: EpochPolicy) {
    while inner.shared.slice.wait(policy) {
        match inner.run_cycle() {
            Ok(_) => {}
            Err(Error::Stopped) => break,
            Err(err) => {
                tracing::error!(
                    error = %err,
                    epoch = inner.shared.epoch.load(Ordering::Acquire),
                    hot_keys = inner.store.hot_count(),
                    keys = inner.store.len(),
                    workers = inner.workers.len(),
                    "epoch driver cannot continue; aborting"
                );
                std::process::abort();
            }
        }
    }
}

// ============================================================================
// Epoch cycle
// ============================================================================

impl Inner {
    fn check_running(&self) -> Result<()> {
        match self.state.load(Ordering::Acquire) {
            RUNNING => Ok(()),
            STOPPED => Err(Error::Stopped),
            _ => Err(Error::Internal("an earlier epoch cycle failed".into())),
        }
    }

    fn run_cycle(&self) -> Result<Epoch> {
        let _cycle = self.cycle.lock();
        self.check_running()?;
        let epoch = Epoch(self.shared.epoch.load(Ordering::Acquire));

        let started = Instant::now();
        let reports = self.form_barrier(epoch)?;
        let barrier_wait = started.elapsed();
        self.counters.add_barrier_wait(barrier_wait);

        let started = Instant::now();
        let reconciled = self.reconcile(epoch, reports);
        let reconciliation = started.elapsed();
        self.counters.add_reconciliation(reconciliation);

        let verdict = if self.config.strict_validation {
            self.verify(epoch, &reconciled)
        } else {
            Ok(())
        };

        let next = epoch.next();
        self.shared.epoch.store(next.as_u64(), Ordering::Release);
        self.shared.slice.reset();
        self.counters.add(Stat::Epochs, 1);
        if let Err(err) = verdict {
            tracing::error!(epoch = %epoch, error = %err, "reconciliation failed validation");
            self.halt_workers();
            return Err(err);
        }
        self.release_workers()?;

        tracing::debug!(
            epoch = %epoch,
            merged_keys = reconciled.merged_keys,
            promotions = reconciled.promotions,
            demotions = reconciled.demotions,
            replayed = reconciled.replayed,
            replay_aborts = reconciled.replay_aborts,
            barrier_us = u64::try_from(barrier_wait.as_micros()).unwrap_or(u64::MAX),
            reconcile_us = u64::try_from(reconciliation.as_micros()).unwrap_or(u64::MAX),
            "epoch cycle complete"
        );
        Ok(next)
    }

    /// Pause every worker and collect the reports, in worker order
    fn form_barrier(&self, epoch: Epoch) -> Result<Vec<Quiesced>> {
        for worker in &self.workers {
            if let Err(err) = worker.signal(Control::Pause) {
                self.halt_workers();
                return Err(err);
            }
        }

        let grace = self.config.quiescence_grace_duration();
        let deadline = Instant::now() + grace;
        let mut reports: Vec<Option<Quiesced>> = self.workers.iter().map(|_| None).collect();
        let mut pending = reports.len();

        while pending > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.reports.recv_timeout(remaining) {
                Ok(report) => {
                    let slot = &mut reports[report.worker];
                    if slot.is_none() {
                        pending -= 1;
                    }
                    *slot = Some(report);
                }
                Err(RecvTimeoutError::Timeout) => {
                    let missing: Vec<WorkerId> = reports
                        .iter()
                        .enumerate()
                        .filter(|(_, r)| r.is_none())
                        .map(|(id, _)| id)
                        .collect();
                    let worker = missing.first().copied().unwrap_or_default();
                    tracing::error!(
                        epoch = %epoch,
                        ?missing,
                        waited_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX),
                        "workers did not reach the epoch barrier"
                    );
                    self.halt_workers();
                    return Err(Error::QuiescenceTimeout {
                        worker,
                        epoch: epoch.as_u64(),
                        waited: grace,
                    });
                }
                Err(RecvTimeoutError::Disconnected) => {
                    self.halt_workers();
                    return Err(Error::Internal("worker report channel closed".into()));
                }
            }
        }
        Ok(reports.into_iter().flatten().collect())
    }

    fn reconcile(&self, epoch: Epoch, reports: Vec<Quiesced>) -> Reconciled {
        let mut reconciled = Reconciled::default();
        let mut stash: Vec<StashEntry> = Vec::new();
        let mut sampled: Vec<Key> = Vec::new();

        // 1. Merge deltas in worker order; ordered puts go by stamp instead
        let mut merged: FxHashSet<Key> = FxHashSet::default();
        let mut stamped: FxHashMap<Key, (u64, Value)> = FxHashMap::default();
        let mut samples = Vec::with_capacity(reports.len());
        {
            let mut worker_stats = self.worker_stats.lock();
            let mut key_accesses = self.key_accesses.lock();
            for report in reports {
                self.counters.absorb_worker(&report.stats);
                worker_stats[report.worker].absorb(&report.stats);
                for (key, n) in report.key_accesses {
                    *key_accesses.entry(key).or_default() += n;
                }
                for (key, delta) in report.deltas {
                    match delta {
                        Delta::Ordered { stamp, value } => match stamped.get_mut(&key) {
                            Some(held) if held.0 > stamp => {}
                            Some(held) => *held = (stamp, value),
                            None => {
                                stamped.insert(key, (stamp, value));
                            }
                        },
                        delta => {
                            if !self.merge(&key, delta, epoch) {
                                reconciled.dropped_deltas += 1;
                            }
                            merged.insert(key);
                        }
                    }
                }
                samples.push((report.samples, report.sample_every));
                stash.extend(report.stash);
            }
        }
        for (key, (stamp, value)) in stamped {
            if !self.merge(&key, Delta::Ordered { stamp, value }, epoch) {
                reconciled.dropped_deltas += 1;
            }
            merged.insert(key);
        }
        reconciled.merged_keys = merged.len() as u64;
        self.counters.add(Stat::MergedKeys, reconciled.merged_keys);

        // 2. Fold samples and reclassify
        for (raw, every) in samples {
            for (key, sample) in raw {
                self.store.record_or_insert(&key).record_sample(sample.scaled(every));
                sampled.push(key);
            }
        }
        self.reclassify(epoch, sampled, &mut reconciled);

        // 3. Replay the stash in submission order
        stash.sort_by_key(|entry| entry.seq);
        for entry in stash {
            self.replay(entry, &mut reconciled);
        }
        self.counters.add(Stat::Replayed, reconciled.replayed);
        self.counters.add(Stat::ReplayAborts, reconciled.replay_aborts);

        reconciled
    }

    /// Apply one delta to a hot key; `false` if it had to be dropped
    fn merge(&self, key: &Key, delta: Delta, epoch: Epoch) -> bool {
        let record = self.store.record_or_insert(key);
        if record.mode() != Mode::Hot {
            tracing::warn!(key = %key, epoch = %epoch, "merging delta into a cold key");
        }
        let applied = {
            let mut slot = record.write_slot();
            match delta.merge_into(key, &mut slot) {
                Ok(()) => true,
                Err(reason) => {
                    tracing::warn!(
                        key = %key,
                        epoch = %epoch,
                        %reason,
                        "dropping hot-key delta that cannot be merged"
                    );
                    false
                }
            }
        };
        record.touch_generation(epoch);
        applied
    }

    fn reclassify(&self, epoch: Epoch, mut candidates: Vec<Key>, reconciled: &mut Reconciled) {
        candidates.extend(self.store.hot_keys());
        candidates.sort();
        candidates.dedup();

        for key in candidates {
            let Some(record) = self.store.record(&key) else {
                continue;
            };
            let sample = record.take_sample();
            match self.classifier.classify(&record, &sample) {
                Decision::Stay => {}
                Decision::Promote => {
                    record.set_mode(Mode::Hot, epoch);
                    reconciled.promotions += 1;
                    tracing::trace!(key = %key, epoch = %epoch, total = sample.total(), "promoted");
                }
                Decision::Demote => {
                    record.set_mode(Mode::Cold, epoch);
                    reconciled.demotions += 1;
                    tracing::trace!(key = %key, epoch = %epoch, total = sample.total(), "demoted");
                }
            }
        }
        self.counters.add(Stat::Promotions, reconciled.promotions);
        self.counters.add(Stat::Demotions, reconciled.demotions);
    }

    fn replay(&self, entry: StashEntry, reconciled: &mut Reconciled) {
        let result = match run_ops(&self.replay, &self.store, &entry.ops, &[]) {
            Ok(values) => TxnResult::committed(values),
            Err(reason) => {
                reconciled.replay_aborts += 1;
                tracing::trace!(seq = entry.seq, %reason, "replayed transaction aborted");
                TxnResult::aborted(reason)
            }
        };
        reconciled.replayed += 1;
        match entry.completion {
            Some(completion) => {
                completion.complete(result);
            }
            None => reconciled.undelivered += 1,
        }
    }

    fn verify(&self, epoch: Epoch, reconciled: &Reconciled) -> Result<()> {
        if reconciled.undelivered > 0 {
            return Err(Error::Internal(format!(
                "{} stashed results of {} were not delivered",
                reconciled.undelivered, epoch
            )));
        }
        if reconciled.dropped_deltas > 0 {
            return Err(Error::Internal(format!(
                "{} hot-key deltas of {} could not be merged",
                reconciled.dropped_deltas, epoch
            )));
        }
        Ok(())
    }

    fn release_workers(&self) -> Result<()> {
        let mut first_err = None;
        for worker in &self.workers {
            if let Err(err) = worker.signal(Control::Resume) {
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Mark the coordinator failed and stop the workers without waiting
    ///
    /// A worker stuck in a transaction finishes it, then sees `Stop`; the
    /// threads are joined by [`Inner::stop_workers`].
    fn halt_workers(&self) {
        self.state.store(FAILED, Ordering::Release);
        self.shared.halted.store(true, Ordering::Release);
        for worker in &self.workers {
            let _ = worker.signal(Control::Stop);
        }
    }

    fn stop_workers(&self) {
        let _cycle = self.cycle.lock();
        self.state.store(STOPPED, Ordering::Release);
        self.shared.halted.store(true, Ordering::Release);
        for worker in &self.workers {
            let _ = worker.signal(Control::Stop);
        }
        for worker in &self.workers {
            worker.join();
        }
    }
}
