//! Engine statistics
//!
//! Workers keep plain local counters ([`WorkerStats`]) and hand them over at
//! every barrier. The coordinator folds them into its global counters, which
//! are only exposed through [`collect_counts`]. Numbers therefore lag the
//! running epoch until the next reconciliation (or [`Coordinator::finish`]).
//!
//! [`Coordinator::finish`]: crate::Coordinator::finish

use std::fmt;
use std::ops::Index;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::coordinator::Coordinator;

/// Global counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum Stat {
    /// Transactions committed directly by a worker (cold or split)
    Committed,
    /// Transactions aborted by a worker
    Aborts,
    /// Transactions stashed for reconciliation
    Deferred,
    /// Transactions whose hot operations were folded into a delta buffer
    Buffered,
    /// Cold to hot transitions (write-driven)
    Promotions,
    /// Hot to cold transitions (read- or idle-driven)
    Demotions,
    /// Raw access samples recorded by workers
    Samples,
    /// Completed epoch cycles
    Epochs,
    /// Stashed transactions replayed
    Replayed,
    /// Replayed transactions that aborted
    ReplayAborts,
    /// Hot keys that received merged deltas
    MergedKeys,
}

impl Stat {
    /// Number of counters
    pub const COUNT: usize = 11;

    /// Every counter, in index order
    pub const ALL: [Stat; Stat::COUNT] = [
        Stat::Committed,
        Stat::Aborts,
        Stat::Deferred,
        Stat::Buffered,
        Stat::Promotions,
        Stat::Demotions,
        Stat::Samples,
        Stat::Epochs,
        Stat::Replayed,
        Stat::ReplayAborts,
        Stat::MergedKeys,
    ];

    /// Index into [`Counts::stats`]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Snake-case name
    pub fn name(self) -> &'static str {
        match self {
            Stat::Committed => "committed",
            Stat::Aborts => "aborts",
            Stat::Deferred => "deferred",
            Stat::Buffered => "buffered",
            Stat::Promotions => "promotions",
            Stat::Demotions => "demotions",
            Stat::Samples => "samples",
            Stat::Epochs => "epochs",
            Stat::Replayed => "replayed",
            Stat::ReplayAborts => "replay_aborts",
            Stat::MergedKeys => "merged_keys",
        }
    }
}

impl fmt::Display for Stat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-worker counters, reported at each barrier
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    /// Committed directly
    pub committed: u64,
    /// Aborted
    pub aborts: u64,
    /// Stashed
    pub deferred: u64,
    /// Folded into the delta buffer
    pub buffered: u64,
    /// Access samples taken
    pub samples: u64,
    /// Time spent parked at barriers
    pub paused: Duration,
}

impl WorkerStats {
    /// Add another report into this one
    pub fn absorb(&mut self, other: &WorkerStats) {
        self.committed += other.committed;
        self.aborts += other.aborts;
        self.deferred += other.deferred;
        self.buffered += other.buffered;
        self.samples += other.samples;
        self.paused += other.paused;
    }
}

/// Coordinator-owned global counters
#[derive(Debug, Default)]
pub(crate) struct StatCounters {
    stats: [AtomicU64; Stat::COUNT],
    barrier_wait_nanos: AtomicU64,
    reconciliation_nanos: AtomicU64,
}

impl StatCounters {
    pub(crate) fn add(&self, stat: Stat, n: u64) {
        if n > 0 {
            self.stats[stat.index()].fetch_add(n, Ordering::Relaxed);
        }
    }

    pub(crate) fn get(&self, stat: Stat) -> u64 {
        self.stats[stat.index()].load(Ordering::Relaxed)
    }

    pub(crate) fn absorb_worker(&self, report: &WorkerStats) {
        self.add(Stat::Committed, report.committed);
        self.add(Stat::Aborts, report.aborts);
        self.add(Stat::Deferred, report.deferred);
        self.add(Stat::Buffered, report.buffered);
        self.add(Stat::Samples, report.samples);
    }

    pub(crate) fn add_barrier_wait(&self, elapsed: Duration) {
        add_nanos(&self.barrier_wait_nanos, elapsed);
    }

    pub(crate) fn add_reconciliation(&self, elapsed: Duration) {
        add_nanos(&self.reconciliation_nanos, elapsed);
    }

    pub(crate) fn snapshot(&self) -> Counts {
        let mut stats = [0u64; Stat::COUNT];
        for stat in Stat::ALL {
            stats[stat.index()] = self.get(stat);
        }
        let replay_commits = stats[Stat::Replayed.index()]
            .saturating_sub(stats[Stat::ReplayAborts.index()]);
        Counts {
            iterations: stats[Stat::Committed.index()] + replay_commits,
            barrier_wait: Duration::from_nanos(self.barrier_wait_nanos.load(Ordering::Relaxed)),
            reconciliation_time: Duration::from_nanos(
                self.reconciliation_nanos.load(Ordering::Relaxed),
            ),
            stats,
        }
    }
}

/// Snapshot of the global counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counts {
    /// Transactions that took effect: direct commits plus successful replays
    pub iterations: u64,
    /// Total time spent forming barriers
    pub barrier_wait: Duration,
    /// Total time spent reconciling
    pub reconciliation_time: Duration,
    /// Counter values indexed by [`Stat::index`]
    pub stats: [u64; Stat::COUNT],
}

impl Counts {
    /// Value of one counter
    pub fn get(&self, stat: Stat) -> u64 {
        self.stats[stat.index()]
    }
}

impl Index<Stat> for Counts {
    type Output = u64;

    fn index(&self, stat: Stat) -> &u64 {
        &self.stats[stat.index()]
    }
}

/// Read the coordinator's global counters
pub fn collect_counts(coordinator: &Coordinator) -> Counts {
    coordinator.counters().snapshot()
}

/// Saturating add of a duration to a nanosecond total
fn add_nanos(total: &AtomicU64, elapsed: Duration) {
    let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
    let _ = total.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |t| {
        Some(t.saturating_add(nanos))
    });
}
