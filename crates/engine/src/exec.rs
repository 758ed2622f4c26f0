//! Applying operations through a cold-access strategy
//!
//! Shared by workers (cold path and the cold part of split transactions)
//! and by the coordinator when it replays the stash.

use phasekv_concurrency::{ColdAccess, ColdView, Footprint};
use phasekv_core::{AbortReason, Key, Value, ValueKind};
use phasekv_storage::KeyStore;

use crate::query::Op;

pub(crate) type Observed = Vec<(Key, Option<Value>)>;

/// Keys touched by `ops`; anything but a read is declared as a write
pub(crate) fn footprint_of<'a>(ops: impl Iterator<Item = &'a Op>) -> Footprint {
    let mut footprint = Footprint::new();
    for op in ops {
        if op.is_read() {
            footprint.read(op.key());
        } else {
            footprint.write(op.key());
        }
    }
    footprint
}

/// Run the operations of `ops` whose index is not in `skip` as one
/// transaction
pub(crate) fn run_ops(
    access: &dyn ColdAccess,
    store: &KeyStore,
    ops: &[Op],
    skip: &[usize],
) -> Result<Observed, AbortReason> {
    let selected = || {
        ops.iter()
            .enumerate()
            .filter(move |(idx, _)| !skip.contains(idx))
            .map(|(_, op)| op)
    };
    let footprint = footprint_of(selected());
    let mut observed = Observed::new();

    access.run(store, &footprint, &mut |view: &mut dyn ColdView| {
        observed.clear();
        for op in selected() {
            apply_op(view, op, &mut observed)?;
        }
        Ok(())
    })?;
    Ok(observed)
}

fn int_of(key: &Key, value: Option<Value>) -> Result<i64, AbortReason> {
    Value::int_or_zero(value.as_ref()).map_err(|actual| AbortReason::TypeMismatch {
        key: key.clone(),
        expected: ValueKind::Int,
        actual,
    })
}

fn apply_op(view: &mut dyn ColdView, op: &Op, observed: &mut Observed) -> Result<(), AbortReason> {
    match op {
        Op::Read(key) => {
            let value = view.read(key);
            observed.push((key.clone(), value));
        }
        Op::Write(key, value) => view.write(key, value.clone()),
        Op::Add(key, delta) => {
            let current = int_of(key, view.read(key))?;
            let next = current
                .checked_add(*delta)
                .ok_or_else(|| AbortReason::Overflow { key: key.clone() })?;
            view.write(key, Value::Int(next));
        }
        Op::AddChecked { key, delta, floor } => {
            let current = int_of(key, view.read(key))?;
            let next = current
                .checked_add(*delta)
                .ok_or_else(|| AbortReason::Overflow { key: key.clone() })?;
            if next < *floor {
                return Err(AbortReason::BelowFloor {
                    key: key.clone(),
                    current,
                    delta: *delta,
                    floor: *floor,
                });
            }
            view.write(key, Value::Int(next));
            observed.push((key.clone(), Some(Value::Int(next))));
        }
        Op::Max(key, value) => {
            let current = int_of(key, view.read(key))?;
            view.write(key, Value::Int(current.max(*value)));
        }
        // Older than the stored winner: no effect
        Op::OrderedPut { key, stamp, value } => {
            if view.stamp(key).map_or(true, |held| *stamp >= held) {
                view.write_ordered(key, value.clone(), *stamp);
            }
        }
        Op::Append(key, item) => {
            let mut items = match view.read(key) {
                None => Vec::new(),
                Some(Value::List(items)) => items,
                Some(other) => {
                    return Err(AbortReason::TypeMismatch {
                        key: key.clone(),
                        expected: ValueKind::List,
                        actual: other.kind(),
                    })
                }
            };
            items.push(item.clone());
            view.write(key, Value::List(items));
        }
    }
    Ok(())
}
