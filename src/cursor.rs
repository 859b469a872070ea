use std::iter::FusedIterator;
use std::os::raw::c_uint;
use std::ptr;
use std::sync::Arc;

use log::{trace, warn};

use crate::constants::WriteFlags;
use crate::database::Database;
use crate::env::EnvInner;
use crate::error::{Error, IntoResult, OptionalResult, Result};
use crate::ffi;
use crate::transaction::{check_key, Transaction};
use crate::types::{CursorOp, TransactionState};
use crate::value::{empty_val, from_val, to_val};

/// A key/value pair borrowed from the engine.
pub type Item<'a> = (&'a [u8], &'a [u8]);

/// Database cursor
///
/// Bound to one transaction and one database for `'txn`. Positioning methods
/// borrow the cursor mutably, so the pair they return stays valid until the
/// cursor is used again. Cursors are not `Send`.
#[derive(Debug)]
pub struct Cursor<'txn> {
    ptr: *mut ffi::MDB_cursor,
    txn: &'txn Transaction,
    db: &'txn Database,
    writable: bool,
}

impl<'txn> Cursor<'txn> {
    pub(crate) fn open(txn: &'txn Transaction, db: &'txn Database, writable: bool) -> Result<Self> {
        db.check(txn)?;
        let mut ptr: *mut ffi::MDB_cursor = ptr::null_mut();
        txn.with_active(|raw| unsafe { ffi::mdb_cursor_open(raw, db.dbi(), &mut ptr) }.into_result())?;
        trace!("opened cursor on dbi {}", db.dbi());
        Ok(Cursor {
            ptr,
            txn,
            db,
            writable,
        })
    }

    /// The owning transaction, borrowed through the cursor.
    ///
    /// Values read through it borrow the cursor as well, so they must be
    /// released before the cursor writes:
    ///
    /// ```compile_fail
    /// # use lumodb::{DatabaseConfig, Environment, WriteFlags};
    /// # fn demo(env: &Environment) -> lumodb::Result<()> {
    /// let mut txn = env.begin_txn()?;
    /// let db = txn.open_database(None, DatabaseConfig::default(), true)?;
    /// let mut cursor = txn.create_write_cursor(&db)?;
    /// let view = cursor.transaction().get(&db, b"k1")?;
    /// cursor.put(b"k1", b"bbbb", WriteFlags::CURRENT)?;
    /// assert_eq!(view, b"aaaa");
    /// # Ok(())
    /// # }
    /// ```
    pub fn transaction(&self) -> &Transaction {
        self.txn
    }

    pub fn database(&self) -> &'txn Database {
        self.db
    }

    fn get(&self, op: CursorOp, key: Option<&[u8]>) -> Result<(ffi::MDB_val, ffi::MDB_val)> {
        let mut k = key.map_or_else(empty_val, to_val);
        let mut v = empty_val();
        self.txn.with_active(|_| {
            unsafe { ffi::mdb_cursor_get(self.ptr, &mut k, &mut v, op as ffi::MDB_cursor_op) }
                .into_result()
        })?;
        Ok((k, v))
    }

    fn move_to(&mut self, op: CursorOp, key: Option<&[u8]>) -> Result<Option<Item<'_>>> {
        let found = self.get(op, key).optional()?;
        Ok(found.map(|(k, v)| unsafe { (from_val(&k), from_val(&v)) }))
    }

    /// Position at first key/data item
    pub fn first(&mut self) -> Result<Option<Item<'_>>> {
        self.move_to(CursorOp::First, None)
    }

    /// Position at last key/data item
    pub fn last(&mut self) -> Result<Option<Item<'_>>> {
        self.move_to(CursorOp::Last, None)
    }

    /// Position at next data item; on a fresh cursor, the first one.
    pub fn next(&mut self) -> Result<Option<Item<'_>>> {
        self.move_to(CursorOp::Next, None)
    }

    /// Position at previous data item; on a fresh cursor, the last one.
    pub fn previous(&mut self) -> Result<Option<Item<'_>>> {
        self.move_to(CursorOp::Prev, None)
    }

    /// Position exactly at `key`.
    ///
    /// Returns `false` when the key is absent. A cursor that was already
    /// positioned is then left on the next greater key, which
    /// [`get_current`](Self::get_current) reports.
    pub fn set(&mut self, key: &[u8]) -> Result<bool> {
        check_key(key)?;
        Ok(self.get(CursorOp::Set, Some(key)).optional()?.is_some())
    }

    /// Position exactly at `key` and return the stored pair.
    pub fn set_key(&mut self, key: &[u8]) -> Result<Option<Item<'_>>> {
        check_key(key)?;
        self.move_to(CursorOp::SetKey, Some(key))
    }

    /// Position at the first key greater than or equal to `key`.
    pub fn set_range(&mut self, key: &[u8]) -> Result<Option<Item<'_>>> {
        check_key(key)?;
        self.move_to(CursorOp::SetRange, Some(key))
    }

    /// Pair at the current position, without moving.
    pub fn get_current(&self) -> Result<Option<Item<'_>>> {
        let found = self.get(CursorOp::GetCurrent, None).optional()?;
        Ok(found.map(|(k, v)| unsafe { (from_val(&k), from_val(&v)) }))
    }

    fn ensure_writable(&self) -> Result<()> {
        if !self.writable {
            return Err(Error::InvalidState("cursor was not created for writing"));
        }
        Ok(())
    }

    /// Store by cursor.
    ///
    /// On success the cursor is positioned at the written item; on failure its
    /// position is unchanged. `CURRENT` overwrites the item under the cursor.
    pub fn put(&mut self, key: &[u8], value: &[u8], flags: WriteFlags) -> Result<()> {
        self.ensure_writable()?;
        check_key(key)?;
        let mut k = to_val(key);
        let mut v = to_val(value);
        self.txn.with_active(|_| {
            unsafe { ffi::mdb_cursor_put(self.ptr, &mut k, &mut v, flags.bits() as c_uint) }
                .into_result()
        })
    }

    /// Delete the item at the current position.
    pub fn delete(&mut self) -> Result<()> {
        self.ensure_writable()?;
        self.txn
            .with_active(|_| unsafe { ffi::mdb_cursor_del(self.ptr, 0) }.into_result())
    }

    /// Forward iteration from the position after the current one.
    ///
    /// The sequence is lazy and cannot be restarted; it ends at the last key
    /// or at the first error.
    pub fn iter(&mut self) -> Iter<'_, 'txn> {
        Iter {
            cursor: self,
            done: false,
        }
    }

    /// Rebind to `txn`, which must be an active read-only transaction on the
    /// same environment. The cursor itself must belong to a read-only
    /// transaction; it keeps its database.
    pub fn renew<'new>(mut self, txn: &'new Transaction) -> Result<Cursor<'new>>
    where
        'txn: 'new,
    {
        if !self.txn.is_read_only() {
            return Err(Error::InvalidState("can't renew a cursor of a read-write transaction"));
        }
        let ptr = renew_cursor(self.ptr, txn, self.db)?;
        self.ptr = ptr::null_mut();
        Ok(Cursor {
            ptr,
            txn,
            db: self.db,
            writable: false,
        })
    }

    /// Detach from the transaction so that it can be reset and renewed while
    /// the native cursor is kept for reuse. Read-only transactions only.
    pub fn into_unbound(mut self) -> Result<UnboundCursor> {
        if !self.txn.is_read_only() {
            return Err(Error::InvalidState("only read-only cursors can be unbound"));
        }
        let ptr = self.ptr;
        self.ptr = ptr::null_mut();
        Ok(UnboundCursor {
            ptr,
            dbi: self.db.dbi(),
            env: Arc::clone(self.txn.env()),
        })
    }
}

impl Drop for Cursor<'_> {
    fn drop(&mut self) {
        if self.ptr.is_null() {
            return;
        }
        // The engine frees write cursors itself when their transaction ends.
        if !self.txn.is_read_only() && self.txn.state() != TransactionState::Active {
            return;
        }
        unsafe { ffi::mdb_cursor_close(self.ptr) };
        trace!("closed cursor on dbi {}", self.db.dbi());
    }
}

fn renew_cursor(
    cursor: *mut ffi::MDB_cursor,
    txn: &Transaction,
    db: &Database,
) -> Result<*mut ffi::MDB_cursor> {
    if !txn.is_read_only() {
        return Err(Error::InvalidState("cursors can only be renewed in read-only transactions"));
    }
    db.check(txn)?;
    txn.with_active(|raw| unsafe { ffi::mdb_cursor_renew(raw, cursor) }.into_result())?;
    Ok(cursor)
}

/// A read-only cursor detached from any transaction.
///
/// Holds the native cursor between a transaction's `reset` and `renew` (or
/// until another read-only transaction comes along).
#[derive(Debug)]
pub struct UnboundCursor {
    ptr: *mut ffi::MDB_cursor,
    dbi: ffi::MDB_dbi,
    env: Arc<EnvInner>,
}

impl UnboundCursor {
    /// Bind to an active read-only transaction. `db` must be the database the
    /// cursor was opened on.
    pub fn renew<'t>(mut self, txn: &'t Transaction, db: &'t Database) -> Result<Cursor<'t>> {
        if db.dbi() != self.dbi || !Arc::ptr_eq(&self.env, txn.env()) {
            return Err(Error::InvalidArgument("cursor was opened on a different database"));
        }
        let ptr = renew_cursor(self.ptr, txn, db)?;
        self.ptr = ptr::null_mut();
        Ok(Cursor {
            ptr,
            txn,
            db,
            writable: false,
        })
    }
}

impl Drop for UnboundCursor {
    fn drop(&mut self) {
        if self.ptr.is_null() {
            return;
        }
        if self.env.is_closed() {
            warn!("read-only cursor on dbi {} outlived its environment", self.dbi);
        }
        // Read-only cursors are owned by the caller, not by any transaction.
        unsafe { ffi::mdb_cursor_close(self.ptr) };
    }
}

/// Iterator over the items after the cursor's position.
#[derive(Debug)]
pub struct Iter<'c, 'txn> {
    cursor: &'c mut Cursor<'txn>,
    done: bool,
}

impl<'c, 'txn> Iterator for Iter<'c, 'txn> {
    type Item = Result<Item<'c>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.cursor.get(CursorOp::Next, None) {
            // Read-only moves do not invalidate earlier pairs, and the cursor
            // stays exclusively borrowed for 'c.
            Ok((k, v)) => Some(Ok(unsafe { (from_val(&k), from_val(&v)) })),
            Err(Error::NotFound) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

impl FusedIterator for Iter<'_, '_> {}

impl<'c, 'txn> IntoIterator for &'c mut Cursor<'txn> {
    type Item = Result<Item<'c>>;
    type IntoIter = Iter<'c, 'txn>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
