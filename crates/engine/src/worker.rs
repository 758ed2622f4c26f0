//! Workers
//!
//! A worker is a single-threaded executor. Callers hand it transactions
//! through [`Worker::execute`]; the worker thread runs them one at a time:
//!
//! - **Cold**: executed through the cold-access strategy
//! - **Split**: cold part executed through the strategy; if it commits, the
//!   hot operations are folded into the worker's [`DeltaBuffer`]
//! - **Stash**: queued with a global sequence number until reconciliation
//!
//! An increment is only buffered while its net fits the canonical value's
//! headroom shared among all workers; anything that could overflow at the
//! merge is stashed, so replay decides it against the merged value.
//!
//! Between transactions the worker checks its control channel. On `Pause`
//! it hands its delta buffer, stash, access samples and counters to the
//! coordinator and blocks until `Resume` or `Stop`. Because control is only
//! looked at between transactions, a paused worker never has a transaction
//! in flight.

use crossbeam_channel::{bounded, select, unbounded, Receiver, Sender, TryRecvError};
use parking_lot::Mutex;
use phasekv_concurrency::ColdAccess;
use phasekv_core::{AbortReason, Error, Key, Result, Value, WorkerId};
use phasekv_storage::{AccessSample, KeyStore};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::mem;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crate::classifier::{Access, AccessSampler};
use crate::completion::{completion_pair, Completion};
use crate::coordinator::Shared;
use crate::delta::{Delta, DeltaBuffer, DeltaError};
use crate::exec::{run_ops, Observed};
use crate::query::{Execution, Op, Outcome, Query, Route, TxnResult};
use crate::stats::WorkerStats;

/// Messages from the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Control {
    Pause,
    Resume,
    Stop,
}

/// A stashed transaction awaiting replay
#[derive(Debug)]
pub(crate) struct StashEntry {
    pub(crate) seq: u64,
    pub(crate) ops: SmallVec<[Op; 4]>,
    pub(crate) completion: Option<Completion>,
}

/// Everything a worker hands over at the barrier
#[derive(Debug)]
pub(crate) struct Quiesced {
    pub(crate) worker: WorkerId,
    pub(crate) deltas: Vec<(Key, Delta)>,
    pub(crate) stash: Vec<StashEntry>,
    pub(crate) samples: Vec<(Key, AccessSample)>,
    pub(crate) sample_every: u64,
    pub(crate) stats: WorkerStats,
    pub(crate) key_accesses: Vec<(Key, u64)>,
}

/// What a worker needs from its coordinator
pub(crate) struct WorkerContext {
    pub(crate) store: Arc<KeyStore>,
    pub(crate) access: Arc<dyn ColdAccess>,
    pub(crate) shared: Arc<Shared>,
    pub(crate) workers: usize,
    pub(crate) synchronous_results: bool,
    pub(crate) sample_every: u32,
    pub(crate) track_key_accesses: bool,
}

struct Job {
    query: Query,
    reply: Sender<Execution>,
}

/// Handle to a worker thread
pub struct Worker {
    id: WorkerId,
    shared: Arc<Shared>,
    jobs: Sender<Job>,
    control: Sender<Control>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Worker {
    pub(crate) fn spawn(id: WorkerId, ctx: WorkerContext, reports: Sender<Quiesced>) -> Result<Worker> {
        let (jobs, job_rx) = unbounded();
        let (control, control_rx) = unbounded();
        let shared = Arc::clone(&ctx.shared);
        let state = WorkerLoop {
            id,
            sampler: AccessSampler::new(ctx.sample_every),
            key_accesses: ctx.track_key_accesses.then(FxHashMap::default),
            ctx,
            deltas: DeltaBuffer::new(),
            stash: Vec::new(),
            stats: WorkerStats::default(),
            reports,
        };
        let handle = thread::Builder::new()
            .name(format!("phasekv-worker-{}", id))
            .spawn(move || state.run(job_rx, control_rx))?;

        Ok(Worker {
            id,
            shared,
            jobs,
            control,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Index of this worker
    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// Submit a transaction and wait for the worker's answer
    ///
    /// Blocks while the worker is parked at an epoch barrier. A
    /// [`Outcome::Deferred`] answer carries a ticket when result delivery is
    /// on and the query had no completion slot of its own.
    ///
    /// Fails with [`Error::WorkerDisconnected`] once the worker stopped,
    /// including after an epoch barrier failed.
    pub fn execute(&self, query: Query) -> Result<Execution> {
        if self.shared.is_halted() {
            return Err(Error::WorkerDisconnected(self.id));
        }
        let (reply, answer) = bounded(1);
        self.jobs
            .send(Job { query, reply })
            .map_err(|_| Error::WorkerDisconnected(self.id))?;
        answer.recv().map_err(|_| Error::WorkerDisconnected(self.id))
    }

    pub(crate) fn signal(&self, msg: Control) -> Result<()> {
        self.control
            .send(msg)
            .map_err(|_| Error::WorkerDisconnected(self.id))
    }

    pub(crate) fn join(&self) {
        if let Some(handle) = self.handle.lock().take() {
            if handle.join().is_err() {
                tracing::error!(worker = self.id, "worker thread panicked");
            }
        }
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker").field("id", &self.id).finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

enum Staging {
    /// Cannot be buffered this epoch; stash instead
    Stash,
    Abort(AbortReason),
}

impl From<DeltaError> for Staging {
    fn from(_: DeltaError) -> Staging {
        // Kind clash or a net past i64; replay gives the serial answer
        Staging::Stash
    }
}

struct WorkerLoop {
    id: WorkerId,
    ctx: WorkerContext,
    deltas: DeltaBuffer,
    stash: Vec<StashEntry>,
    sampler: AccessSampler,
    stats: WorkerStats,
    key_accesses: Option<FxHashMap<Key, u64>>,
    reports: Sender<Quiesced>,
}

impl WorkerLoop {
    fn run(mut self, jobs: Receiver<Job>, control: Receiver<Control>) {
        tracing::debug!(worker = self.id, "worker started");
        loop {
            // Pending control wins over queued jobs
            match control.try_recv() {
                Ok(msg) => {
                    if self.on_control(msg, &control) == Flow::Stop {
                        break;
                    }
                    continue;
                }
                Err(TryRecvError::Disconnected) => break,
                Err(TryRecvError::Empty) => {}
            }

            select! {
                recv(control) -> msg => match msg {
                    Ok(msg) => {
                        if self.on_control(msg, &control) == Flow::Stop {
                            break;
                        }
                    }
                    Err(_) => break,
                },
                recv(jobs) -> job => match job {
                    Ok(job) => self.run_job(job),
                    Err(_) => break,
                },
            }
        }
        tracing::debug!(worker = self.id, "worker stopped");
    }

    fn on_control(&mut self, msg: Control, control: &Receiver<Control>) -> Flow {
        match msg {
            Control::Stop => Flow::Stop,
            Control::Resume => Flow::Continue,
            Control::Pause => {
                let parked = Instant::now();
                let report = self.quiesce();
                if self.reports.send(report).is_err() {
                    return Flow::Stop;
                }
                let flow = loop {
                    match control.recv() {
                        Ok(Control::Resume) => break Flow::Continue,
                        Ok(Control::Pause) => continue,
                        Ok(Control::Stop) | Err(_) => break Flow::Stop,
                    }
                };
                self.stats.paused += parked.elapsed();
                flow
            }
        }
    }

    fn quiesce(&mut self) -> Quiesced {
        let mut stats = mem::take(&mut self.stats);
        stats.samples = self.sampler.taken();
        Quiesced {
            worker: self.id,
            deltas: self.deltas.drain(),
            stash: mem::take(&mut self.stash),
            samples: self.sampler.drain(),
            sample_every: self.sampler.every(),
            stats,
            key_accesses: self
                .key_accesses
                .as_mut()
                .map(|counts| counts.drain().collect())
                .unwrap_or_default(),
        }
    }

    fn run_job(&mut self, job: Job) {
        // Dropping the reply fails the caller with a disconnect
        if self.ctx.shared.is_halted() {
            return;
        }
        let execution = self.process(job.query);
        // The caller may have given up waiting
        let _ = job.reply.send(execution);
        self.ctx.shared.slice.tick();
    }

    fn process(&mut self, query: Query) -> Execution {
        let (ops, completion) = query.into_parts();
        self.note_accesses(&ops);

        let route = Route::compute(&ops, &self.ctx.store);
        tracing::trace!(
            worker = self.id,
            route = route.name(),
            ops = ops.len(),
            "routed transaction"
        );

        match route {
            Route::Cold => {
                let result = run_ops(&*self.ctx.access, &self.ctx.store, &ops, &[]);
                self.conclude(result, completion)
            }
            Route::Split(hot) => match self.stage(&ops, &hot) {
                Ok(staged) => {
                    let result = if hot.len() == ops.len() {
                        Ok(Observed::new())
                    } else {
                        run_ops(&*self.ctx.access, &self.ctx.store, &ops, &hot)
                    };
                    if result.is_ok() {
                        for (key, delta) in staged {
                            self.deltas.set(key, delta);
                        }
                        self.stats.buffered += 1;
                    }
                    self.conclude(result, completion)
                }
                Err(Staging::Stash) => self.defer(ops, completion),
                Err(Staging::Abort(reason)) => self.conclude(Err(reason), completion),
            },
            Route::Stash => self.defer(ops, completion),
        }
    }

    /// Combine the hot operations with this epoch's buffer without storing
    /// anything
    fn stage(
        &self,
        ops: &[Op],
        hot: &[usize],
    ) -> std::result::Result<SmallVec<[(Key, Delta); 4]>, Staging> {
        let mut staged: SmallVec<[(Key, Delta, Option<Value>); 4]> = SmallVec::new();
        for &idx in hot {
            let op = &ops[idx];
            let key = op.key();
            let delta = Delta::from_op(op).ok_or(Staging::Stash)?;

            match staged.iter_mut().find(|(k, ..)| k == key) {
                Some((_, held, _)) => held.absorb(delta)?,
                None => {
                    // Hot values only change at reconciliation, so checks
                    // against it hold for the rest of the epoch
                    let canonical = self.ctx.store.get(key);
                    delta
                        .check_target(key, canonical.as_ref())
                        .map_err(Staging::Abort)?;
                    staged.push((key.clone(), delta, canonical));
                }
            }
        }

        staged
            .into_iter()
            .map(|(key, delta, canonical)| -> std::result::Result<_, Staging> {
                let merged = self.deltas.preview(&key, delta)?;
                if !merged.within_headroom(canonical.as_ref(), self.ctx.workers) {
                    tracing::trace!(
                        worker = self.id,
                        key = %key,
                        "increment could overflow at merge; stashing"
                    );
                    return Err(Staging::Stash);
                }
                Ok((key, merged))
            })
            .collect()
    }

    fn conclude(
        &mut self,
        result: std::result::Result<Observed, AbortReason>,
        completion: Option<Completion>,
    ) -> Execution {
        let result = match result {
            Ok(values) => {
                self.stats.committed += 1;
                TxnResult::committed(values)
            }
            Err(reason) => {
                self.stats.aborts += 1;
                if reason.is_retryable() {
                    self.sampler.note(reason.key(), Access::Conflict);
                }
                tracing::trace!(worker = self.id, %reason, "transaction aborted");
                TxnResult::aborted(reason)
            }
        };
        let outcome = result.outcome.clone();

        if !self.ctx.synchronous_results {
            return Execution {
                outcome,
                result: None,
                ticket: None,
            };
        }
        if let Some(completion) = completion {
            completion.complete(result.clone());
        }
        Execution {
            outcome,
            result: Some(result),
            ticket: None,
        }
    }

    fn defer(&mut self, ops: SmallVec<[Op; 4]>, completion: Option<Completion>) -> Execution {
        let seq = self.ctx.shared.sequence.fetch_add(1, Ordering::Relaxed);
        let (completion, ticket) = match (self.ctx.synchronous_results, completion) {
            (false, _) => (None, None),
            (true, Some(completion)) => (Some(completion), None),
            (true, None) => {
                let (completion, ticket) = completion_pair();
                (Some(completion), Some(ticket))
            }
        };
        self.stash.push(StashEntry {
            seq,
            ops,
            completion,
        });
        self.stats.deferred += 1;
        tracing::trace!(worker = self.id, seq, "transaction stashed");

        Execution {
            outcome: Outcome::Deferred,
            result: None,
            ticket,
        }
    }

    fn note_accesses(&mut self, ops: &[Op]) {
        for op in ops {
            let access = if op.is_read() {
                Access::Read
            } else {
                Access::Write
            };
            self.sampler.note(op.key(), access);
            if let Some(counts) = self.key_accesses.as_mut() {
                *counts.entry(op.key().clone()).or_default() += 1;
            }
        }
    }
}
