//! Epoch-based execution engine for phasekv
//!
//! This crate provides:
//! - Query: operation lists, routing, results
//! - Worker: single-threaded executor with per-epoch hot-key buffers
//! - Coordinator: epoch clock, barrier, reconciliation
//! - Classifier: access sampling and hot/cold decisions
//! - Stats: global counters exposed through [`collect_counts`]
//!
//! # Epoch Cycle
//!
//! ```text
//! Running ──pause──▶ Barrier ──all quiescent──▶ Reconciling ──▶ Complete
//!    ▲                                                             │
//!    └──────────────────────────── resume ─────────────────────────┘
//! ```
//!
//! While running, workers execute cold transactions directly, fold
//! splittable updates on hot keys into local delta buffers, and stash
//! everything else. Reconciliation merges the buffers, reclassifies keys and
//! replays the stash against the merged state.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod classifier;
pub mod completion;
pub mod coordinator;
pub mod delta;
mod exec;
pub mod query;
pub mod stats;
pub mod worker;

pub use classifier::{Access, AccessSampler, Classifier, Decision};
pub use completion::{completion_pair, Completion, Ticket};
pub use coordinator::{new_coordinator, Coordinator};
pub use delta::{Delta, DeltaBuffer, DeltaError, DeltaKind};
pub use query::{Execution, Op, Outcome, Query, Route, TxnKind, TxnResult};
pub use stats::{collect_counts, Counts, Stat, WorkerStats};
pub use worker::Worker;
