//! Unified error types for phasekv.
//!
//! This module provides a single error type for the facade. Engine failures
//! are wrapped, and a transaction abort becomes an error only when the
//! caller asks for a final result through [`PhaseKv::run`].
//!
//! [`PhaseKv::run`]: crate::PhaseKv::run

use phasekv_core::{AbortReason, WorkerId};
use std::time::Duration;
use thiserror::Error;

/// All phasekv errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration rejected at startup
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error (configuration files, thread spawning)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A worker missed the epoch barrier
    #[error("worker {worker} did not reach the epoch barrier within {waited:?} (epoch {epoch})")]
    QuiescenceTimeout {
        /// Worker that failed to report
        worker: WorkerId,
        /// Epoch whose barrier was being formed
        epoch: u64,
        /// Grace period that elapsed
        waited: Duration,
    },

    /// A worker thread is gone
    #[error("worker {0} is no longer running")]
    WorkerDisconnected(WorkerId),

    /// A deferred result was never delivered
    #[error("result dropped before delivery")]
    ResultDropped,

    /// The engine was already finished
    #[error("engine is stopped")]
    Stopped,

    /// The transaction did not commit
    #[error("transaction aborted: {0}")]
    Aborted(AbortReason),

    /// Internal error (bug or invariant violation)
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for phasekv operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Check if this error is retryable.
    ///
    /// Only conflict aborts may succeed when the same transaction is
    /// resubmitted.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Aborted(reason) if reason.is_retryable())
    }

    /// Check if the engine cannot continue after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Config(_) | Error::QuiescenceTimeout { .. } | Error::Internal(_)
        )
    }

    /// Abort reason, if this is an abort.
    pub fn abort_reason(&self) -> Option<&AbortReason> {
        match self {
            Error::Aborted(reason) => Some(reason),
            _ => None,
        }
    }
}

// Convert from internal engine errors
impl From<phasekv_core::Error> for Error {
    fn from(e: phasekv_core::Error) -> Self {
        use phasekv_core::Error as CoreError;
        match e {
            CoreError::Config(msg) => Error::Config(msg),
            CoreError::Io(io_err) => Error::Io(io_err),
            CoreError::QuiescenceTimeout {
                worker,
                epoch,
                waited,
            } => Error::QuiescenceTimeout {
                worker,
                epoch,
                waited,
            },
            CoreError::WorkerDisconnected(worker) => Error::WorkerDisconnected(worker),
            CoreError::ResultDropped => Error::ResultDropped,
            CoreError::Stopped => Error::Stopped,
            CoreError::Internal(msg) => Error::Internal(msg),
        }
    }
}

impl From<AbortReason> for Error {
    fn from(reason: AbortReason) -> Self {
        Error::Aborted(reason)
    }
}
