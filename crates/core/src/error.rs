//! Error types for the engine
//!
//! Two separate vocabularies live here:
//!
//! - [`Error`]: failures that stop the engine (bad configuration, a worker
//!   that never reaches the epoch barrier, a torn-down worker pool).
//! - [`AbortReason`]: why a single transaction did not commit. Aborts are
//!   ordinary return values; the caller may resubmit.

use crate::types::{Key, WorkerId};
use crate::value::ValueKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Fatal engine errors
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration rejected at startup
    #[error("configuration error: {0}")]
    Config(String),

    /// Configuration file could not be read
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A worker did not reach a quiescent point within the grace period
    #[error("worker {worker} did not reach the epoch barrier within {waited:?} (epoch {epoch})")]
    QuiescenceTimeout {
        /// Worker that failed to report
        worker: WorkerId,
        /// Epoch whose barrier was being formed
        epoch: u64,
        /// How long the coordinator waited
        waited: Duration,
    },

    /// A worker thread is gone (panicked or already stopped)
    #[error("worker {0} is no longer running")]
    WorkerDisconnected(WorkerId),

    /// A completion slot was dropped before a result was written
    #[error("result slot dropped before delivery")]
    ResultDropped,

    /// The coordinator has already been finished
    #[error("coordinator is stopped")]
    Stopped,

    /// Invariant violation (bug)
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Check whether this error must terminate the process
    ///
    /// Configuration and quiescence failures indicate programming errors and
    /// are never retried.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Config(_) | Error::QuiescenceTimeout { .. } | Error::Internal(_)
        )
    }
}

/// Why a transaction aborted
///
/// Aborts never leave an observable effect on any key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AbortReason {
    /// Optimistic validation failed or a write lock was contended
    Conflict {
        /// First key that failed validation
        key: Key,
    },

    /// Operation applied to a value of the wrong type
    TypeMismatch {
        /// Key holding the value
        key: Key,
        /// Type the operation requires
        expected: ValueKind,
        /// Type found
        actual: ValueKind,
    },

    /// A checked update would have taken the value below its floor
    BelowFloor {
        /// Key holding the value
        key: Key,
        /// Value before the update
        current: i64,
        /// Requested change
        delta: i64,
        /// Lowest permitted result
        floor: i64,
    },

    /// Integer arithmetic overflowed
    Overflow {
        /// Key holding the value
        key: Key,
    },

    /// The transaction touched a key it did not declare up front
    Undeclared {
        /// Key accessed without a declaration
        key: Key,
    },
}

impl AbortReason {
    /// Check if resubmitting the same transaction may succeed
    ///
    /// Conflicts are transient; type errors and floor violations depend on
    /// state and usually repeat.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AbortReason::Conflict { .. })
    }

    /// Key the abort is attributed to
    pub fn key(&self) -> &Key {
        match self {
            AbortReason::Conflict { key }
            | AbortReason::TypeMismatch { key, .. }
            | AbortReason::BelowFloor { key, .. }
            | AbortReason::Overflow { key }
            | AbortReason::Undeclared { key } => key,
        }
    }
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::Conflict { key } => write!(f, "conflict on {}", key),
            AbortReason::TypeMismatch {
                key,
                expected,
                actual,
            } => write!(f, "type mismatch on {}: expected {}, got {}", key, expected, actual),
            AbortReason::BelowFloor {
                key,
                current,
                delta,
                floor,
            } => write!(
                f,
                "{} would fall below {}: {} + {}",
                key, floor, current, delta
            ),
            AbortReason::Overflow { key } => write!(f, "integer overflow on {}", key),
            AbortReason::Undeclared { key } => write!(f, "undeclared access to {}", key),
        }
    }
}
