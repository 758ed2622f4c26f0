//! One-shot result slots
//!
//! A [`Completion`] is the write side of a single-use slot and a [`Ticket`]
//! the read side. Completing consumes the slot, so a result is written at
//! most once. Dropping a completion without writing wakes the ticket holder
//! with [`Error::ResultDropped`].
//!
//! Backed by a crossbeam channel with capacity 1, so completing never
//! blocks, even when the ticket holder is not waiting yet.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use phasekv_core::{Error, Result};
use std::time::Duration;

use crate::query::TxnResult;

/// Create a connected completion/ticket pair
pub fn completion_pair() -> (Completion, Ticket) {
    let (tx, rx) = bounded(1);
    (Completion { tx }, Ticket { rx })
}

/// Write side of a result slot
#[derive(Debug)]
pub struct Completion {
    tx: Sender<TxnResult>,
}

impl Completion {
    /// Write the result
    ///
    /// Returns `false` if the ticket was already dropped (fire-and-forget
    /// callers); the result is discarded in that case.
    pub fn complete(self, result: TxnResult) -> bool {
        self.tx.send(result).is_ok()
    }
}

/// Read side of a result slot
#[derive(Debug)]
pub struct Ticket {
    rx: Receiver<TxnResult>,
}

impl Ticket {
    /// Block until the result is delivered
    pub fn wait(self) -> Result<TxnResult> {
        self.rx.recv().map_err(|_| Error::ResultDropped)
    }

    /// Block for at most `timeout`
    ///
    /// Returns `Ok(None)` if nothing arrived in time; the ticket stays
    /// usable.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<Option<TxnResult>> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => Ok(Some(result)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(Error::ResultDropped),
        }
    }

    /// Take the result if it is already there
    pub fn try_take(&self) -> Result<Option<TxnResult>> {
        match self.rx.try_recv() {
            Ok(result) => Ok(Some(result)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(Error::ResultDropped),
        }
    }
}
