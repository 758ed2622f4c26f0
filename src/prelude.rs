//! Convenient imports for phasekv.
//!
//! This module re-exports the most commonly used types so you can get started
//! with a single import:
//!
//! ```
//! use phasekv::prelude::*;
//!
//! let db = PhaseKv::builder().workers(1).manual_epochs().open().unwrap();
//! db.run(Query::new().write(Key::new("greeting"), Value::from("hello"))).unwrap();
//! db.finish().unwrap();
//! ```

// Main entry point
pub use crate::database::{PhaseKv, PhaseKvBuilder};

// Error handling
pub use crate::error::{Error, Result};

// Core types
pub use crate::types::{AbortReason, Epoch, Key, Mode, Value};

// Configuration
pub use crate::types::{ColdMode, EngineConfig, EpochPolicy};

// Transactions
pub use crate::types::{Execution, Outcome, Query, Ticket, TxnResult};

// Statistics
pub use crate::types::{Counts, Stat};
