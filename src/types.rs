//! Public types for the phasekv API.
//!
//! This module re-exports types from internal crates with a clean public interface.

// Identifiers and values
pub use phasekv_core::{Epoch, Key, Mode, Value, ValueKind, WorkerId};

// Abort reasons
pub use phasekv_core::AbortReason;

// Configuration
pub use phasekv_core::{ColdMode, EngineConfig, EpochPolicy};

// Transactions and results
pub use phasekv_engine::{Execution, Op, Outcome, Query, Route, TxnKind, TxnResult};

// Completion slots
pub use phasekv_engine::{completion_pair, Completion, Ticket};

// Statistics
pub use phasekv_engine::{collect_counts, Counts, Stat, WorkerStats};

// Engine components
pub use phasekv_engine::{new_coordinator, Coordinator, Worker};
pub use phasekv_storage::{new_store, KeyStore};

// Cold-key strategies
pub use phasekv_concurrency::{strategy_for, ColdAccess, LockingAccess, OptimisticAccess};
