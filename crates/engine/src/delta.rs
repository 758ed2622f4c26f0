//! Hot-key delta buffers
//!
//! A [`Delta`] is the pending effect of one epoch's splittable operations on
//! one hot key. Deltas of the same kind absorb each other; merging them into
//! the canonical value happens once per epoch during reconciliation.
//!
//! | Kind      | Absorb                            | Merge into canonical value    |
//! |-----------|-----------------------------------|-------------------------------|
//! | `Add`     | sum                               | `current + net`               |
//! | `Max`     | maximum                           | `max(current, m)`             |
//! | `Ordered` | higher stamp wins, ties go later  | overwrite unless stored stamp |
//! |           |                                   | is higher                     |
//! | `Append`  | concatenate in submission order   | extend list                   |
//!
//! A worker buffers at most one kind per key per epoch. An operation of a
//! different kind on an already-buffered key is a [`DeltaError::KindClash`];
//! the worker stashes that transaction instead. So is an increment whose net
//! could overflow the canonical value once every worker's buffer is merged
//! (see [`Delta::within_headroom`]).

use phasekv_core::{AbortReason, Key, Value, ValueKind};
use phasekv_storage::Slot;
use rustc_hash::FxHashMap;
use std::fmt;

use crate::query::Op;

/// Pending effect on one hot key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delta {
    /// Net increment
    Add(i64),
    /// Running maximum
    Max(i64),
    /// Winning ordered write
    Ordered {
        /// Order stamp of the winning write
        stamp: u64,
        /// Value of the winning write
        value: Value,
    },
    /// Items to append, in order
    Append(Vec<Value>),
}

/// Discriminant of a [`Delta`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeltaKind {
    /// [`Delta::Add`]
    Add,
    /// [`Delta::Max`]
    Max,
    /// [`Delta::Ordered`]
    Ordered,
    /// [`Delta::Append`]
    Append,
}

impl fmt::Display for DeltaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeltaKind::Add => "add",
            DeltaKind::Max => "max",
            DeltaKind::Ordered => "ordered",
            DeltaKind::Append => "append",
        };
        f.write_str(name)
    }
}

/// Why two deltas could not be combined
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaError {
    /// The key already holds a delta of another kind this epoch
    KindClash {
        /// Kind already buffered
        held: DeltaKind,
        /// Kind of the incoming operation
        incoming: DeltaKind,
    },
    /// The net increment overflowed
    Overflow,
}

impl Delta {
    /// Delta for a splittable operation; `None` for everything else
    pub fn from_op(op: &Op) -> Option<Delta> {
        match op {
            Op::Add(_, delta) => Some(Delta::Add(*delta)),
            Op::Max(_, value) => Some(Delta::Max(*value)),
            Op::OrderedPut { stamp, value, .. } => Some(Delta::Ordered {
                stamp: *stamp,
                value: value.clone(),
            }),
            Op::Append(_, value) => Some(Delta::Append(vec![value.clone()])),
            Op::Read(_) | Op::Write(..) | Op::AddChecked { .. } => None,
        }
    }

    /// Discriminant
    pub fn kind(&self) -> DeltaKind {
        match self {
            Delta::Add(_) => DeltaKind::Add,
            Delta::Max(_) => DeltaKind::Max,
            Delta::Ordered { .. } => DeltaKind::Ordered,
            Delta::Append(_) => DeltaKind::Append,
        }
    }

    /// Fold a later delta into this one
    ///
    /// On error `self` is left unchanged.
    pub fn absorb(&mut self, later: Delta) -> Result<(), DeltaError> {
        match (self, later) {
            (Delta::Add(net), Delta::Add(d)) => {
                *net = net.checked_add(d).ok_or(DeltaError::Overflow)?;
            }
            (Delta::Max(m), Delta::Max(v)) => *m = (*m).max(v),
            (Delta::Ordered { stamp, value }, Delta::Ordered { stamp: s, value: v }) => {
                if s >= *stamp {
                    *stamp = s;
                    *value = v;
                }
            }
            (Delta::Append(items), Delta::Append(more)) => items.extend(more),
            (held, incoming) => {
                return Err(DeltaError::KindClash {
                    held: held.kind(),
                    incoming: incoming.kind(),
                })
            }
        }
        Ok(())
    }

    /// Check that this delta can be applied to `current`
    pub fn check_target(&self, key: &Key, current: Option<&Value>) -> Result<(), AbortReason> {
        let expected = match self {
            Delta::Add(_) | Delta::Max(_) => ValueKind::Int,
            Delta::Append(_) => ValueKind::List,
            Delta::Ordered { .. } => return Ok(()),
        };
        match current {
            None => Ok(()),
            Some(value) if value.kind() == expected => Ok(()),
            Some(value) => Err(AbortReason::TypeMismatch {
                key: key.clone(),
                expected,
                actual: value.kind(),
            }),
        }
    }

    /// Check that merging this delta into `current` cannot overflow, even
    /// if each of `workers` buffers hands over a net of the same size
    ///
    /// Only increments can overflow; every other kind always fits.
    pub fn within_headroom(&self, current: Option<&Value>, workers: usize) -> bool {
        let Delta::Add(net) = self else {
            return true;
        };
        let base = i128::from(current.and_then(Value::as_int).unwrap_or(0));
        let share = workers.max(1) as i128;
        let upper = (i128::from(i64::MAX) - base) / share;
        let lower = (i128::from(i64::MIN) - base) / share;
        (lower..=upper).contains(&i128::from(*net))
    }

    /// Compute the new canonical value of `key`
    pub fn apply(self, key: &Key, current: Option<&Value>) -> Result<Value, AbortReason> {
        self.check_target(key, current)?;
        match self {
            Delta::Add(net) => {
                let base = current.and_then(Value::as_int).unwrap_or(0);
                base.checked_add(net)
                    .map(Value::Int)
                    .ok_or_else(|| AbortReason::Overflow { key: key.clone() })
            }
            Delta::Max(m) => {
                let base = current.and_then(Value::as_int).unwrap_or(0);
                Ok(Value::Int(base.max(m)))
            }
            Delta::Ordered { value, .. } => Ok(value),
            Delta::Append(more) => {
                let mut items = current
                    .and_then(Value::as_list)
                    .map(<[Value]>::to_vec)
                    .unwrap_or_default();
                items.extend(more);
                Ok(Value::List(items))
            }
        }
    }

    /// Merge into the canonical slot of `key`
    ///
    /// An ordered put whose stamp is below the one already stored is
    /// superseded and leaves the slot untouched. On error nothing changes.
    pub fn merge_into(self, key: &Key, slot: &mut Slot) -> Result<(), AbortReason> {
        match self {
            Delta::Ordered { stamp, value } => {
                if slot.admits(stamp) {
                    slot.install_ordered(value, stamp);
                }
            }
            delta => {
                let value = delta.apply(key, slot.value.as_ref())?;
                slot.install(value);
            }
        }
        Ok(())
    }
}

/// Per-worker hot-key buffer for one epoch
///
/// Owned by a single worker; handed to the coordinator at the barrier.
#[derive(Debug, Default)]
pub struct DeltaBuffer {
    deltas: FxHashMap<Key, Delta>,
}

impl DeltaBuffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Pending delta for `key`
    pub fn get(&self, key: &Key) -> Option<&Delta> {
        self.deltas.get(key)
    }

    /// Combine the pending delta for `key` with `incoming` without storing
    /// the result
    pub fn preview(&self, key: &Key, incoming: Delta) -> Result<Delta, DeltaError> {
        match self.deltas.get(key) {
            Some(held) => {
                let mut merged = held.clone();
                merged.absorb(incoming)?;
                Ok(merged)
            }
            None => Ok(incoming),
        }
    }

    /// Replace the pending delta for `key`
    pub fn set(&mut self, key: Key, delta: Delta) {
        self.deltas.insert(key, delta);
    }

    /// Number of buffered keys
    pub fn len(&self) -> usize {
        self.deltas.len()
    }

    /// Check if nothing is buffered
    pub fn is_empty(&self) -> bool {
        self.deltas.is_empty()
    }

    /// Empty the buffer, returning its deltas sorted by key
    pub fn drain(&mut self) -> Vec<(Key, Delta)> {
        let mut drained: Vec<_> = self.deltas.drain().collect();
        drained.sort_by(|(a, _), (b, _)| a.cmp(b));
        drained
    }
}
