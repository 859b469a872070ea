//! Conversions between Rust slices and the engine's `MDB_val`.
//!
//! Slices produced here alias engine-owned memory. Callers attach them to a
//! borrow of the transaction or cursor that produced them, which is what keeps
//! a view from being read after the engine may have reused its pages.

use std::os::raw::c_void;
use std::{ptr, slice};

use crate::ffi;

/// Borrow `data` as an `MDB_val` for an input argument.
///
/// The engine never writes through input keys or values, so casting away
/// constness is sound.
pub(crate) fn to_val(data: &[u8]) -> ffi::MDB_val {
    ffi::MDB_val {
        mv_size: data.len(),
        mv_data: data.as_ptr() as *mut c_void,
    }
}

/// An empty output slot for the engine to fill.
pub(crate) fn empty_val() -> ffi::MDB_val {
    ffi::MDB_val {
        mv_size: 0,
        mv_data: ptr::null_mut(),
    }
}

/// A placeholder carrying only a length, for `MDB_RESERVE` puts.
pub(crate) fn reserve_val(len: usize) -> ffi::MDB_val {
    ffi::MDB_val {
        mv_size: len,
        mv_data: ptr::null_mut(),
    }
}

/// View an engine-filled `MDB_val` as a slice.
///
/// # Safety
///
/// `val` must have been filled by the engine (or by [`to_val`]) and `'a` must
/// not extend past the point where the engine may reuse the memory.
pub(crate) unsafe fn from_val<'a>(val: &ffi::MDB_val) -> &'a [u8] {
    if val.mv_data.is_null() || val.mv_size == 0 {
        return &[];
    }
    slice::from_raw_parts(val.mv_data as *const u8, val.mv_size)
}

/// Mutable counterpart of [`from_val`] for reserved space.
///
/// # Safety
///
/// As for [`from_val`]; in addition nothing else may alias the region for `'a`.
pub(crate) unsafe fn from_val_mut<'a>(val: &ffi::MDB_val) -> &'a mut [u8] {
    if val.mv_data.is_null() || val.mv_size == 0 {
        return &mut [];
    }
    slice::from_raw_parts_mut(val.mv_data as *mut u8, val.mv_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_values_alias_the_slice() {
        let data = b"hello";
        let val = to_val(data);
        assert_eq!(val.mv_size, 5);
        assert_eq!(unsafe { from_val(&val) }, b"hello");
    }

    #[test]
    fn empty_slots_read_as_empty() {
        assert!(unsafe { from_val(&empty_val()) }.is_empty());
        assert!(unsafe { from_val_mut(&reserve_val(16)) }.is_empty());
    }
}
