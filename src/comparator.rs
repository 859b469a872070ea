//! Custom key ordering.
//!
//! The engine calls its comparison hook with two `MDB_val` pointers and no
//! user context, at arbitrary points inside tree operations. A [`KeyComparator`]
//! is therefore a type, not a value: [`ComparatorPin::of`] monomorphizes an
//! `extern "C"` trampoline for it, whose address is fixed for the life of the
//! program. The owning [`Database`](crate::Database) keeps the pin until its
//! handle is closed.

use std::any;
use std::cmp::Ordering;
use std::fmt;
use std::os::raw::c_int;

use crate::error::{IntoResult, Result};
use crate::ffi;
use crate::value::from_val;

/// A three-way ordering over raw keys.
///
/// The ordering must be total and must agree with how keys were stored; every
/// program opening the database has to install the same comparator. An
/// inconsistent comparator corrupts the tree silently.
///
/// A panic inside `compare` aborts the process, since it would otherwise
/// unwind through the engine.
pub trait KeyComparator: 'static {
    fn compare(a: &[u8], b: &[u8]) -> Ordering;
}

type CmpFn = unsafe extern "C" fn(*const ffi::MDB_val, *const ffi::MDB_val) -> c_int;

unsafe extern "C" fn trampoline<C: KeyComparator>(
    a: *const ffi::MDB_val,
    b: *const ffi::MDB_val,
) -> c_int {
    let (a, b) = (from_val(&*a), from_val(&*b));
    match C::compare(a, b) {
        Ordering::Less => -1,
        Ordering::Equal => 0,
        Ordering::Greater => 1,
    }
}

/// The registered trampoline for one comparator type.
#[derive(Clone, Copy)]
pub struct ComparatorPin {
    func: CmpFn,
    name: &'static str,
}

impl ComparatorPin {
    pub fn of<C: KeyComparator>() -> Self {
        ComparatorPin {
            func: trampoline::<C>,
            name: any::type_name::<C>(),
        }
    }

    /// Type name of the comparator, for diagnostics.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Register the trampoline for `dbi`. Must happen before any data access
    /// on that database.
    pub(crate) unsafe fn install(&self, txn: *mut ffi::MDB_txn, dbi: ffi::MDB_dbi) -> Result<()> {
        ffi::mdb_set_compare(txn, dbi, Some(self.func)).into_result()
    }

    #[cfg(test)]
    fn call(&self, a: &[u8], b: &[u8]) -> c_int {
        let (a, b) = (crate::value::to_val(a), crate::value::to_val(b));
        unsafe { (self.func)(&a, &b) }
    }
}

impl fmt::Debug for ComparatorPin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ComparatorPin").field(&self.name).finish()
    }
}
