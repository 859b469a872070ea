use std::marker::PhantomData;
use std::mem::MaybeUninit;
use std::os::raw::c_uint;
use std::ptr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, trace};

use crate::constants::{TransactionFlags, WriteFlags, RESERVE};
use crate::cursor::Cursor;
use crate::database::{Database, DatabaseConfig};
use crate::env::EnvInner;
use crate::error::{Error, IntoResult, OptionalResult, Result};
use crate::ffi;
use crate::types::{Stat, TransactionState};
use crate::value::{empty_val, from_val, from_val_mut, reserve_val, to_val};

#[derive(Debug)]
struct TxnSlot {
    ptr: *mut ffi::MDB_txn,
    state: TransactionState,
}

/// Native transaction plus its state, shared with the environment's registry
/// so that closing the environment can abort it.
#[derive(Debug)]
pub(crate) struct TxnCore {
    slot: Mutex<TxnSlot>,
}

// Only the owning `Transaction` (which is !Send) issues engine calls on the
// handle; the registry merely aborts it, under the same lock.
unsafe impl Send for TxnCore {}
unsafe impl Sync for TxnCore {}

impl TxnCore {
    fn lock(&self) -> MutexGuard<'_, TxnSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn state(&self) -> TransactionState {
        self.lock().state
    }

    /// Mark the transaction `Aborted` on behalf of a closing environment.
    /// Returns whether it was still live.
    ///
    /// The native handle stays allocated: views borrowed from the transaction
    /// may still point into its dirty pages. The owning `Transaction` releases
    /// it when dropped.
    pub(crate) fn abort_for_env_close(&self) -> bool {
        let mut slot = self.lock();
        match slot.state {
            TransactionState::Active | TransactionState::Reset => {
                slot.state = TransactionState::Aborted;
                true
            }
            TransactionState::Committed | TransactionState::Aborted => false,
        }
    }
}

/// A unit of work in an [`Environment`](crate::Environment).
///
/// States: `Active -> {Committed, Aborted}`; read-only transactions can also
/// go `Active -> Reset -> Active` through [`reset`](Self::reset) and
/// [`renew`](Self::renew). Dropping a transaction that is still `Active` or
/// `Reset` aborts it.
///
/// Values returned by reads borrow the transaction, and every call that can
/// change or end the snapshot takes `&mut self`, so a value can never be read
/// after the engine is free to reuse its pages. A transaction must stay on the
/// thread that began it.
#[derive(Debug)]
pub struct Transaction {
    core: Arc<TxnCore>,
    env: Arc<EnvInner>,
    read_only: bool,
    _not_send: PhantomData<*const ()>,
}

impl Transaction {
    pub(crate) fn begin(env: Arc<EnvInner>, flags: TransactionFlags) -> Result<Self> {
        let mut ptr: *mut ffi::MDB_txn = ptr::null_mut();
        unsafe {
            ffi::mdb_txn_begin(env.ptr(), ptr::null_mut(), flags.bits() as c_uint, &mut ptr)
        }
        .into_result()?;

        let core = Arc::new(TxnCore {
            slot: Mutex::new(TxnSlot {
                ptr,
                state: TransactionState::Active,
            }),
        });
        if let Err(err) = env.register(&core) {
            unsafe { ffi::mdb_txn_abort(ptr) };
            return Err(err);
        }

        let read_only = flags.contains(TransactionFlags::RDONLY);
        trace!("began {} transaction", if read_only { "read-only" } else { "read-write" });
        Ok(Transaction {
            core,
            env,
            read_only,
            _not_send: PhantomData,
        })
    }

    pub(crate) fn env(&self) -> &Arc<EnvInner> {
        &self.env
    }

    pub(crate) fn core(&self) -> &Arc<TxnCore> {
        &self.core
    }

    /// Run `f` with the native handle, provided the transaction is `Active`.
    pub(crate) fn with_active<R>(
        &self,
        f: impl FnOnce(*mut ffi::MDB_txn) -> Result<R>,
    ) -> Result<R> {
        let slot = self.core.lock();
        if slot.state != TransactionState::Active {
            return Err(Error::InvalidState("transaction is not active"));
        }
        f(slot.ptr)
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.read_only {
            return Err(Error::InvalidState("transaction is read-only"));
        }
        Ok(())
    }

    pub fn state(&self) -> TransactionState {
        self.core.state()
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Engine transaction id; for read-only transactions, the snapshot id.
    pub fn id(&self) -> Result<usize> {
        self.with_active(|txn| Ok(unsafe { ffi::mdb_txn_id(txn) } as usize))
    }

    /// Open (or with `DbFlags::CREATE`, create) a database.
    ///
    /// `name = None` selects the default keyspace. When `close_on_drop` is
    /// false the handle does not close the engine's slot when dropped, leaving
    /// it to whoever else holds it.
    pub fn open_database(
        &mut self,
        name: Option<&str>,
        config: DatabaseConfig,
        close_on_drop: bool,
    ) -> Result<Database> {
        Database::open(self, name, config, close_on_drop)
    }

    /// Delete the database and release its handle.
    pub fn drop_database(&mut self, db: &Database) -> Result<()> {
        db.drop_in(self)
    }

    /// Remove every entry; the handle stays usable.
    pub fn truncate_database(&mut self, db: &Database) -> Result<()> {
        db.truncate(self)
    }

    /// A cursor for positioned reads. Cursors may not span threads.
    pub fn create_cursor<'t>(&'t self, db: &'t Database) -> Result<Cursor<'t>> {
        Cursor::open(self, db, false)
    }

    /// A cursor that can also write. It holds the transaction exclusively.
    pub fn create_write_cursor<'t>(&'t mut self, db: &'t Database) -> Result<Cursor<'t>> {
        self.ensure_writable()?;
        Cursor::open(self, db, true)
    }

    /// Value stored under `key`; [`Error::NotFound`] if absent.
    pub fn get(&self, db: &Database, key: &[u8]) -> Result<&[u8]> {
        db.check(self)?;
        check_key(key)?;
        let mut k = to_val(key);
        let mut v = empty_val();
        self.with_active(|txn| unsafe { ffi::mdb_get(txn, db.dbi(), &mut k, &mut v) }.into_result())?;
        Ok(unsafe { from_val(&v) })
    }

    /// Like [`get`](Self::get), with absence as `None`.
    pub fn try_get(&self, db: &Database, key: &[u8]) -> Result<Option<&[u8]>> {
        self.get(db, key).optional()
    }

    pub fn contains_key(&self, db: &Database, key: &[u8]) -> Result<bool> {
        Ok(self.try_get(db, key)?.is_some())
    }

    /// Store `value` under `key`.
    ///
    /// With `NOOVERWRITE` an existing key fails with [`Error::KeyExist`]. With
    /// `APPEND` the caller promises keys arrive in ascending order; the order
    /// is not checked here.
    pub fn put(&mut self, db: &Database, key: &[u8], value: &[u8], flags: WriteFlags) -> Result<()> {
        self.ensure_writable()?;
        db.check(self)?;
        check_key(key)?;
        let mut k = to_val(key);
        let mut v = to_val(value);
        self.with_active(|txn| {
            unsafe { ffi::mdb_put(txn, db.dbi(), &mut k, &mut v, flags.bits() as c_uint) }
                .into_result()
        })
    }

    /// Reserve `len` bytes under `key` and hand back the space to fill.
    ///
    /// The slice must be fully written before the next call on this
    /// transaction, which the exclusive borrow enforces.
    pub fn reserve_put(
        &mut self,
        db: &Database,
        key: &[u8],
        len: usize,
        flags: WriteFlags,
    ) -> Result<&mut [u8]> {
        self.ensure_writable()?;
        db.check(self)?;
        check_key(key)?;
        let mut k = to_val(key);
        let mut v = reserve_val(len);
        self.with_active(|txn| {
            unsafe { ffi::mdb_put(txn, db.dbi(), &mut k, &mut v, flags.bits() | RESERVE) }
                .into_result()
        })?;
        Ok(unsafe { from_val_mut(&v) })
    }

    /// Remove `key`, or with `value` only that exact pair (`DUPSORT`
    /// databases). Absence is reported as [`Error::NotFound`].
    pub fn delete(&mut self, db: &Database, key: &[u8], value: Option<&[u8]>) -> Result<()> {
        self.ensure_writable()?;
        db.check(self)?;
        check_key(key)?;
        let mut k = to_val(key);
        let mut v = value.map(to_val);
        let data = v.as_mut().map_or(ptr::null_mut(), |v| v as *mut ffi::MDB_val);
        self.with_active(|txn| unsafe { ffi::mdb_del(txn, db.dbi(), &mut k, data) }.into_result())
    }

    pub(crate) fn stat(&self, db: &Database) -> Result<Stat> {
        db.check(self)?;
        let mut stat = MaybeUninit::<ffi::MDB_stat>::uninit();
        self.with_active(|txn| unsafe {
            ffi::mdb_stat(txn, db.dbi(), stat.as_mut_ptr()).into_result()
        })?;
        Ok(Stat::from(unsafe { stat.assume_init() }))
    }

    /// Number of entries in `db` as seen by this transaction.
    pub fn entry_count(&self, db: &Database) -> Result<usize> {
        Ok(self.stat(db)?.entries)
    }

    /// Commit all changes.
    ///
    /// The engine releases the native transaction whether or not the commit
    /// succeeds, so a failed commit leaves the transaction `Aborted`.
    pub fn commit(&mut self) -> Result<()> {
        let mut slot = self.core.lock();
        if slot.state != TransactionState::Active {
            return Err(Error::InvalidState("transaction is not active"));
        }
        let rc = unsafe { ffi::mdb_txn_commit(slot.ptr) };
        slot.ptr = ptr::null_mut();
        match rc.into_result() {
            Ok(()) => {
                slot.state = TransactionState::Committed;
                trace!("committed transaction");
                Ok(())
            }
            Err(err) => {
                slot.state = TransactionState::Aborted;
                debug!("commit failed, transaction aborted: {}", err);
                Err(err)
            }
        }
    }

    /// Discard all changes. Valid from `Active` or `Reset`.
    pub fn abort(&mut self) -> Result<()> {
        let mut slot = self.core.lock();
        match slot.state {
            TransactionState::Active | TransactionState::Reset => {
                unsafe { ffi::mdb_txn_abort(slot.ptr) };
                slot.ptr = ptr::null_mut();
                slot.state = TransactionState::Aborted;
                trace!("aborted transaction");
                Ok(())
            }
            _ => Err(Error::InvalidState("transaction is not active")),
        }
    }

    /// Release the snapshot of an active read-only transaction, keeping the
    /// object for a later [`renew`](Self::renew).
    pub fn reset(&mut self) -> Result<()> {
        if !self.read_only {
            return Err(Error::InvalidState("can't reset a read-write transaction"));
        }
        let mut slot = self.core.lock();
        if slot.state != TransactionState::Active {
            return Err(Error::InvalidState("transaction is not active"));
        }
        unsafe { ffi::mdb_txn_reset(slot.ptr) };
        slot.state = TransactionState::Reset;
        trace!("reset read-only transaction");
        Ok(())
    }

    /// Take a fresh snapshot after [`reset`](Self::reset).
    ///
    /// On failure the transaction stays `Reset`.
    pub fn renew(&mut self) -> Result<()> {
        if !self.read_only {
            return Err(Error::InvalidState("can't renew a read-write transaction"));
        }
        let mut slot = self.core.lock();
        if slot.state != TransactionState::Reset {
            return Err(Error::InvalidState("transaction must be reset before renew"));
        }
        unsafe { ffi::mdb_txn_renew(slot.ptr) }.into_result()?;
        slot.state = TransactionState::Active;
        trace!("renewed read-only transaction");
        Ok(())
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        // A transaction aborted by a closing environment still owns its
        // native handle; it is released here, once no view can outlive it.
        let mut slot = self.core.lock();
        if slot.ptr.is_null() {
            return;
        }
        unsafe { ffi::mdb_txn_abort(slot.ptr) };
        slot.ptr = ptr::null_mut();
        if matches!(slot.state, TransactionState::Active | TransactionState::Reset) {
            slot.state = TransactionState::Aborted;
            trace!("aborted transaction on drop");
        }
    }
}

pub(crate) fn check_key(key: &[u8]) -> Result<()> {
    if key.is_empty() {
        return Err(Error::InvalidArgument("key must not be empty"));
    }
    Ok(())
}
