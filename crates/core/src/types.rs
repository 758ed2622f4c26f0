//! Core identifiers for the engine
//!
//! - [`Key`]: identifier of a record in the key store
//! - [`Mode`]: cold (direct) or hot (buffered/stashed) handling of a key
//! - [`Epoch`]: reconciliation generation counter
//! - [`WorkerId`]: index of a worker in the coordinator's pool

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Identifier of a record in the key store
///
/// Keys are cheap to clone (shared string) and totally ordered. The order is
/// used by the cold-access strategies to acquire per-key locks without
/// deadlocking.
///
/// # Examples
///
/// ```
/// use phasekv_core::Key;
///
/// let stock = Key::new("stock");
/// let product = Key::numbered("product", 7);
/// assert_eq!(product.as_str(), "product:7");
/// assert!(product < stock);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Key(Arc<str>);

impl Key {
    /// Create a key from any string-like identifier
    pub fn new(name: impl AsRef<str>) -> Self {
        Key(Arc::from(name.as_ref()))
    }

    /// Create a key of the form `prefix:n`
    ///
    /// Workload generators use this to lay out numbered tables
    /// (`product:0`, `product:1`, ...).
    pub fn numbered(prefix: &str, n: u64) -> Self {
        Key(Arc::from(format!("{}:{}", prefix, n)))
    }

    /// Borrow the key as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::new(s)
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key(Arc::from(s))
    }
}

/// How a key is handled during an epoch
///
/// A key is in exactly one mode at any instant. Mode transitions happen
/// only during reconciliation, while every worker is parked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Mode {
    /// Uncontended: transactions access the key directly under per-key
    /// synchronization.
    Cold = 0,
    /// Contended: splittable updates are buffered per worker and merged at
    /// reconciliation; everything else is stashed.
    Hot = 1,
}

impl Mode {
    /// Decode from the compact representation stored in key records
    pub fn from_u8(raw: u8) -> Mode {
        match raw {
            1 => Mode::Hot,
            _ => Mode::Cold,
        }
    }

    /// Compact representation stored in key records
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// True for [`Mode::Hot`]
    pub fn is_hot(self) -> bool {
        matches!(self, Mode::Hot)
    }
}

impl Default for Mode {
    fn default() -> Self {
        Mode::Cold
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Cold => f.write_str("cold"),
            Mode::Hot => f.write_str("hot"),
        }
    }
}

/// Reconciliation generation
///
/// Incremented by the coordinator exactly once per completed
/// barrier + reconciliation cycle. Never decremented, never skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Epoch(pub u64);

impl Epoch {
    /// The epoch the engine starts in
    pub const ZERO: Epoch = Epoch(0);

    /// The epoch following this one
    pub fn next(self) -> Epoch {
        Epoch(self.0 + 1)
    }

    /// Raw counter value
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "epoch#{}", self.0)
    }
}

/// Index of a worker in the coordinator's pool
///
/// Delta buffers are merged in ascending `WorkerId` order.
pub type WorkerId = usize;
