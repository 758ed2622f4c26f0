//! Core types for phasekv
//!
//! This crate defines the vocabulary shared by every layer of the engine:
//! - [`Key`] and [`Value`]: what the store holds
//! - [`Mode`]: whether a key is handled on the cold or the hot path
//! - [`Epoch`]: the global reconciliation clock
//! - [`EngineConfig`]: recognized configuration options
//! - [`Error`]: fatal engine errors (aborts and deferrals are not errors)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod types;
pub mod value;

pub use config::{ColdMode, EngineConfig, EpochPolicy};
pub use error::{AbortReason, Error, Result};
pub use types::{Epoch, Key, Mode, WorkerId};
pub use value::{Value, ValueKind};
