//! Concurrency layer for phasekv
//!
//! This crate implements the synchronization used for cold keys, behind one
//! interface with two variants:
//! - [`LockingAccess`]: per-key reader/writer locks held for the whole
//!   transaction, acquired in key order
//! - [`OptimisticAccess`]: versioned reads, buffered writes, validation and
//!   try-lock at commit (first-committer-wins)
//!
//! Both variants buffer writes and install them only once the transaction
//! body succeeds, so an aborted transaction has no observable effect.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod locking;
pub mod optimistic;
pub mod strategy;

pub use locking::LockingAccess;
pub use optimistic::OptimisticAccess;
pub use strategy::{
    strategy_for, ColdAccess, ColdView, Footprint, PendingWrite, TxnBody, WriteBuffer,
};
