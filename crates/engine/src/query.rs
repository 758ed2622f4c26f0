//! Transactions, routing and results
//!
//! A [`Query`] is an ordered list of [`Op`]s over a bounded set of keys. It
//! is consumed exactly once by a worker, which computes its [`Route`] once
//! from the current key modes and answers with an [`Execution`].
//!
//! ## Operations
//!
//! | Op           | Reads state | Splittable | Absent key acts as |
//! |--------------|-------------|------------|--------------------|
//! | `Read`       | yes         | no         | `None`             |
//! | `Write`      | no          | no         | -                  |
//! | `Add`        | no          | yes        | `Int(0)`           |
//! | `AddChecked` | yes         | no         | `Int(0)`           |
//! | `Max`        | no          | yes        | `Int(0)`           |
//! | `OrderedPut` | no          | yes        | -                  |
//! | `Append`     | no          | yes        | empty list         |
//!
//! Splittable operations commute, so a hot key can absorb them into
//! per-worker buffers and merge later. `Write` is a blind overwrite whose
//! effect depends on ordering against every other writer, and `AddChecked`
//! needs the merged value to test its floor; both force a stash on hot keys.

use phasekv_core::{AbortReason, Error, Key, Result, Value};
use phasekv_storage::KeyStore;
use smallvec::SmallVec;
use std::fmt;

use crate::completion::{completion_pair, Completion, Ticket};

/// A single operation on one key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    /// Observe the current value
    Read(Key),
    /// Blind overwrite
    Write(Key, Value),
    /// Commutative increment
    Add(Key, i64),
    /// Increment that aborts if the result would fall below `floor`
    AddChecked {
        /// Target key
        key: Key,
        /// Signed change
        delta: i64,
        /// Lowest permitted result
        floor: i64,
    },
    /// Commutative maximum
    Max(Key, i64),
    /// Last-writer-wins by an explicit order stamp
    OrderedPut {
        /// Target key
        key: Key,
        /// Higher stamps win; equal stamps resolve to the later write
        stamp: u64,
        /// Value to store
        value: Value,
    },
    /// Append to a list
    Append(Key, Value),
}

impl Op {
    /// Key this operation touches
    pub fn key(&self) -> &Key {
        match self {
            Op::Read(key)
            | Op::Write(key, _)
            | Op::Add(key, _)
            | Op::AddChecked { key, .. }
            | Op::Max(key, _)
            | Op::OrderedPut { key, .. }
            | Op::Append(key, _) => key,
        }
    }

    /// Check if the operation may be buffered on a hot key
    pub fn is_splittable(&self) -> bool {
        matches!(
            self,
            Op::Add(..) | Op::Max(..) | Op::OrderedPut { .. } | Op::Append(..)
        )
    }

    /// Check if the operation only observes state
    pub fn is_read(&self) -> bool {
        matches!(self, Op::Read(_))
    }

    /// Check if the operation produces a value in the result
    pub fn is_observed(&self) -> bool {
        matches!(self, Op::Read(_) | Op::AddChecked { .. })
    }
}

/// Workload shape of a transaction
///
/// Informational; routing depends only on the operations and key modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxnKind {
    /// Mostly or only reads
    ReadDominant,
    /// Mostly or only writes
    WriteDominant,
    /// Both
    Mixed,
}

impl TxnKind {
    /// Infer the kind from an operation list
    pub fn infer(ops: &[Op]) -> TxnKind {
        let reads = ops.iter().filter(|op| op.is_read()).count();
        if reads == ops.len() {
            TxnKind::ReadDominant
        } else if reads == 0 {
            TxnKind::WriteDominant
        } else {
            TxnKind::Mixed
        }
    }
}

/// A transaction submitted to a worker
///
/// # Example
///
/// ```
/// use phasekv_core::Key;
/// use phasekv_engine::{Query, TxnKind};
///
/// let buy = Query::new()
///     .add_checked(Key::new("stock"), -1, 0)
///     .append(Key::new("orders"), "alice".into());
/// assert_eq!(buy.kind(), TxnKind::WriteDominant);
/// assert_eq!(buy.ops().len(), 2);
/// ```
#[derive(Debug, Default)]
pub struct Query {
    ops: SmallVec<[Op; 4]>,
    kind: Option<TxnKind>,
    completion: Option<Completion>,
}

impl Query {
    /// Create an empty transaction
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an operation
    pub fn op(mut self, op: Op) -> Self {
        self.ops.push(op);
        self
    }

    /// Append a read
    pub fn read(self, key: Key) -> Self {
        self.op(Op::Read(key))
    }

    /// Append a blind write
    pub fn write(self, key: Key, value: Value) -> Self {
        self.op(Op::Write(key, value))
    }

    /// Append a commutative increment
    pub fn add(self, key: Key, delta: i64) -> Self {
        self.op(Op::Add(key, delta))
    }

    /// Append an increment with a floor
    pub fn add_checked(self, key: Key, delta: i64, floor: i64) -> Self {
        self.op(Op::AddChecked { key, delta, floor })
    }

    /// Append a commutative maximum
    pub fn max(self, key: Key, value: i64) -> Self {
        self.op(Op::Max(key, value))
    }

    /// Append an ordered last-writer-wins put
    pub fn ordered_put(self, key: Key, stamp: u64, value: Value) -> Self {
        self.op(Op::OrderedPut { key, stamp, value })
    }

    /// Append a list append
    pub fn append(self, key: Key, value: Value) -> Self {
        self.op(Op::Append(key, value))
    }

    /// Override the inferred kind
    pub fn with_kind(mut self, kind: TxnKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Attach a completion slot that receives the result
    pub fn with_completion(mut self, completion: Completion) -> Self {
        self.completion = Some(completion);
        self
    }

    /// Attach a fresh completion slot and return its ticket
    pub fn awaitable(self) -> (Query, Ticket) {
        let (completion, ticket) = completion_pair();
        (self.with_completion(completion), ticket)
    }

    /// Operations in submission order
    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    /// Explicit kind, or the one inferred from the operations
    pub fn kind(&self) -> TxnKind {
        self.kind.unwrap_or_else(|| TxnKind::infer(&self.ops))
    }

    pub(crate) fn into_parts(self) -> (SmallVec<[Op; 4]>, Option<Completion>) {
        (self.ops, self.completion)
    }
}

/// How a worker handles a transaction this epoch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// No hot key touched: run through the cold-access strategy
    Cold,
    /// Hot keys touched only by splittable operations; holds the indices of
    /// those operations
    Split(SmallVec<[usize; 4]>),
    /// Needs merged hot-key state: defer to reconciliation
    Stash,
}

impl Route {
    /// Route `ops` against the current key modes
    ///
    /// Modes only change while workers are parked, so the route stays
    /// valid for as long as the transaction executes.
    pub fn compute(ops: &[Op], store: &KeyStore) -> Route {
        let mut hot = SmallVec::new();
        for (idx, op) in ops.iter().enumerate() {
            if store.classify(op.key()).is_hot() {
                if !op.is_splittable() {
                    return Route::Stash;
                }
                hot.push(idx);
            }
        }
        if hot.is_empty() {
            Route::Cold
        } else {
            Route::Split(hot)
        }
    }

    /// Short name for logging
    pub fn name(&self) -> &'static str {
        match self {
            Route::Cold => "cold",
            Route::Split(_) => "split",
            Route::Stash => "stash",
        }
    }
}

/// What happened to a submitted transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Applied
    Committed,
    /// Not applied; no key was changed
    Aborted(AbortReason),
    /// Stashed until the end of the epoch
    Deferred,
}

impl Outcome {
    /// Check for [`Outcome::Committed`]
    pub fn is_committed(&self) -> bool {
        matches!(self, Outcome::Committed)
    }

    /// Check for [`Outcome::Aborted`]
    pub fn is_aborted(&self) -> bool {
        matches!(self, Outcome::Aborted(_))
    }

    /// Check for [`Outcome::Deferred`]
    pub fn is_deferred(&self) -> bool {
        matches!(self, Outcome::Deferred)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Committed => f.write_str("committed"),
            Outcome::Aborted(reason) => write!(f, "aborted: {}", reason),
            Outcome::Deferred => f.write_str("deferred"),
        }
    }
}

/// Values produced by a finished transaction
///
/// Holds the value observed by every `Read` and the post-state of every
/// `AddChecked`, in operation order. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxnResult {
    /// Final outcome (never `Deferred`)
    pub outcome: Outcome,
    /// Observed values in operation order
    pub values: Vec<(Key, Option<Value>)>,
}

impl TxnResult {
    /// A committed result
    pub fn committed(values: Vec<(Key, Option<Value>)>) -> Self {
        Self {
            outcome: Outcome::Committed,
            values,
        }
    }

    /// An aborted result
    pub fn aborted(reason: AbortReason) -> Self {
        Self {
            outcome: Outcome::Aborted(reason),
            values: Vec::new(),
        }
    }

    /// Last value observed for `key`
    pub fn value_of(&self, key: &Key) -> Option<&Value> {
        self.values
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .and_then(|(_, v)| v.as_ref())
    }
}

/// Answer to [`Worker::execute`](crate::Worker::execute)
#[derive(Debug)]
pub struct Execution {
    /// What happened
    pub outcome: Outcome,
    /// Materialized result of an immediate outcome, if result delivery is on
    pub result: Option<TxnResult>,
    /// Ticket for a deferred result, when the worker allocated the slot
    pub ticket: Option<Ticket>,
}

impl Execution {
    /// Check for an immediate commit
    pub fn is_committed(&self) -> bool {
        self.outcome.is_committed()
    }

    /// Check for an immediate abort
    pub fn is_aborted(&self) -> bool {
        self.outcome.is_aborted()
    }

    /// Check for a stashed transaction
    pub fn is_deferred(&self) -> bool {
        self.outcome.is_deferred()
    }

    /// Obtain the final result, blocking on the ticket if deferred
    ///
    /// Fails with [`Error::ResultDropped`] when no result was kept: result
    /// delivery is off, or the query carried its own completion slot.
    pub fn wait(self) -> Result<TxnResult> {
        if let Some(result) = self.result {
            return Ok(result);
        }
        match self.ticket {
            Some(ticket) => ticket.wait(),
            None => Err(Error::ResultDropped),
        }
    }
}
