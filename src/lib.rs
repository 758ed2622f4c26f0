//! # phasekv
//!
//! In-memory transactional key-value engine with adaptive, epoch-based
//! contention handling.
//!
//! Keys are either cold or hot. Transactions on cold keys execute directly
//! under per-key synchronization. Commutative updates to hot keys are
//! buffered per worker and merged once per epoch; any other access to a hot
//! key is stashed and replayed against the merged state. A classifier moves
//! keys between modes at every epoch boundary based on sampled contention.
//!
//! ## Quick Start
//!
//! ```
//! use phasekv::prelude::*;
//!
//! let db = PhaseKv::builder()
//!     .workers(2)
//!     .manual_epochs()
//!     .preload(Key::new("stock"), Value::Int(3))
//!     .open()
//!     .unwrap();
//!
//! let result = db
//!     .run(Query::new().add_checked(Key::new("stock"), -1, 0))
//!     .unwrap();
//! assert_eq!(result.value_of(&Key::new("stock")), Some(&Value::Int(2)));
//!
//! db.finish().unwrap();
//! ```
//!
//! ## Layers
//!
//! - [`KeyStore`] - sharded key records with per-key locks and samples
//! - [`Coordinator`] - worker pool, epoch barrier and reconciliation
//! - [`PhaseKv`] - store + coordinator with key-based routing

#![warn(missing_docs)]

mod database;
mod error;
mod types;

pub mod prelude;

// Re-export main entry points
pub use database::{PhaseKv, PhaseKvBuilder};
pub use error::{Error, Result};

// Re-export types
pub use types::*;
