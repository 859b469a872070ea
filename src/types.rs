use std::ffi::CStr;
use std::os::raw::c_int;

use once_cell::sync::Lazy;

use crate::ffi;

/// Cursor positioning operations, with the engine's `MDB_cursor_op` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub(crate) enum CursorOp {
    First = 0,
    GetCurrent = 4,
    Last = 6,
    Next = 8,
    Prev = 12,
    Set = 15,
    SetKey = 16,
    SetRange = 17,
}

/// Lifecycle of a [`Transaction`](crate::Transaction).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    /// Read-only transaction whose snapshot was released by `reset`.
    Reset,
    Committed,
    Aborted,
}

/// B-tree statistics for a database or the whole environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    pub psize: u32,
    pub depth: u32,
    pub branch_pages: usize,
    pub leaf_pages: usize,
    pub overflow_pages: usize,
    pub entries: usize,
}

impl From<ffi::MDB_stat> for Stat {
    fn from(stat: ffi::MDB_stat) -> Self {
        Stat {
            psize: stat.ms_psize as u32,
            depth: stat.ms_depth as u32,
            branch_pages: stat.ms_branch_pages as usize,
            leaf_pages: stat.ms_leaf_pages as usize,
            overflow_pages: stat.ms_overflow_pages as usize,
            entries: stat.ms_entries as usize,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvInfo {
    pub mapsize: usize,
    pub last_pgno: usize,
    pub last_txnid: usize,
    pub max_readers: u32,
    pub num_readers: u32,
}

impl From<ffi::MDB_envinfo> for EnvInfo {
    fn from(info: ffi::MDB_envinfo) -> Self {
        EnvInfo {
            mapsize: info.me_mapsize as usize,
            last_pgno: info.me_last_pgno as usize,
            last_txnid: info.me_last_txnid as usize,
            max_readers: info.me_maxreaders as u32,
            num_readers: info.me_numreaders as u32,
        }
    }
}

/// Version of the linked engine library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionInfo {
    pub major: i32,
    pub minor: i32,
    pub patch: i32,
    pub version: String,
}

static VERSION: Lazy<VersionInfo> = Lazy::new(|| {
    let (mut major, mut minor, mut patch): (c_int, c_int, c_int) = (0, 0, 0);
    let ptr = unsafe { ffi::mdb_version(&mut major, &mut minor, &mut patch) };
    let version = if ptr.is_null() {
        String::new()
    } else {
        unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
    };
    VersionInfo {
        major,
        minor,
        patch,
        version,
    }
});

/// Version of the linked engine, queried once.
pub fn version() -> &'static VersionInfo {
    &VERSION
}
