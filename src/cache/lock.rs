//! Poison-tolerant lock accessors.
//!
//! Cache tables only hold derived state; a guard poisoned by a panic is
//! recovered and the table keeps serving.

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::warn;

pub(crate) fn rw_read<'a, T>(
    lock: &'a RwLock<T>,
    table: &'static str,
    op: &'static str,
) -> RwLockReadGuard<'a, T> {
    lock.read()
        .unwrap_or_else(|poisoned| recover(poisoned, table, op, "rwlock.read"))
}

pub(crate) fn rw_write<'a, T>(
    lock: &'a RwLock<T>,
    table: &'static str,
    op: &'static str,
) -> RwLockWriteGuard<'a, T> {
    lock.write()
        .unwrap_or_else(|poisoned| recover(poisoned, table, op, "rwlock.write"))
}

fn recover<G>(
    poisoned: PoisonError<G>,
    table: &'static str,
    op: &'static str,
    lock_kind: &'static str,
) -> G {
    warn!(
        table,
        op,
        lock_kind,
        result = "poisoned_recovered",
        "Recovered from poisoned cache lock"
    );
    poisoned.into_inner()
}
