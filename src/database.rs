use std::ffi::CString;
use std::os::raw::c_uint;
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::debug;

use crate::comparator::{ComparatorPin, KeyComparator};
use crate::constants::{DbFlags, CORE_DBS};
use crate::env::EnvInner;
use crate::error::{Error, IntoResult, Result};
use crate::ffi;
use crate::transaction::{Transaction, TxnCore};
use crate::types::{Stat, TransactionState};

/// Options for opening a database.
#[derive(Debug, Clone, Copy)]
pub struct DatabaseConfig {
    pub flags: DbFlags,
    comparator: Option<ComparatorPin>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            flags: DbFlags::empty(),
            comparator: None,
        }
    }
}

impl DatabaseConfig {
    pub fn new(flags: DbFlags) -> Self {
        DatabaseConfig {
            flags,
            comparator: None,
        }
    }

    /// Order keys with `C` instead of the engine's byte-wise comparison.
    pub fn compare_with<C: KeyComparator>(mut self) -> Self {
        self.comparator = Some(ComparatorPin::of::<C>());
        self
    }
}

/// Database handle
///
/// A named or default keyspace. The handle belongs to the environment, not to
/// the transaction that opened it: once that transaction commits, later
/// transactions can use it until it is closed, dropped with
/// [`Database::drop_in`], or the environment goes away. If the opening
/// transaction aborts instead, the engine forgets the slot and the handle must
/// not be used again.
#[derive(Debug)]
pub struct Database {
    /// Database identifier
    dbi: ffi::MDB_dbi,
    name: Option<String>,
    flags: DbFlags,
    /// Keeps the custom comparison hook registered while the handle is open
    comparator: Option<ComparatorPin>,
    close_on_drop: bool,
    released: AtomicBool,
    env: Arc<EnvInner>,
    /// The transaction that opened the slot; the engine only keeps the slot
    /// once it has committed.
    opener: Arc<TxnCore>,
}

impl Database {
    /// Open a database in the environment
    pub(crate) fn open(
        txn: &Transaction,
        name: Option<&str>,
        config: DatabaseConfig,
        close_on_drop: bool,
    ) -> Result<Self> {
        let name_cstr = match name {
            Some(n) => Some(
                CString::new(n)
                    .map_err(|_| Error::InvalidArgument("database name contains a NUL byte"))?,
            ),
            None => None,
        };
        let name_ptr = name_cstr.as_ref().map_or(ptr::null(), |n| n.as_ptr());

        let mut dbi: ffi::MDB_dbi = 0;
        txn.with_active(|raw| unsafe {
            ffi::mdb_dbi_open(raw, name_ptr, config.flags.bits() as c_uint, &mut dbi).into_result()?;
            // The hook has to be in place before anything reads or writes keys.
            if let Some(pin) = &config.comparator {
                pin.install(raw, dbi)?;
            }
            Ok(())
        })?;

        debug!(
            "opened database {:?} as dbi {} (flags {:?}, comparator {:?})",
            name,
            dbi,
            config.flags,
            config.comparator.map(|pin| pin.name())
        );
        Ok(Database {
            dbi,
            name: name.map(str::to_owned),
            flags: config.flags,
            comparator: config.comparator,
            close_on_drop,
            released: AtomicBool::new(false),
            env: Arc::clone(txn.env()),
            opener: Arc::clone(txn.core()),
        })
    }

    /// Native database identifier.
    pub fn dbi(&self) -> ffi::MDB_dbi {
        self.dbi
    }

    /// `None` for the default keyspace.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn flags(&self) -> DbFlags {
        self.flags
    }

    /// Type name of the installed comparator, if any.
    pub fn comparator(&self) -> Option<&'static str> {
        self.comparator.map(|pin| pin.name())
    }

    /// Whether the handle was released by `close` or `drop_in`.
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    pub fn is_opened(&self) -> bool {
        !self.is_released()
    }

    /// Usable with `txn`: still open and from the same environment.
    pub(crate) fn check(&self, txn: &Transaction) -> Result<()> {
        if self.is_released() {
            return Err(Error::InvalidState("database handle has been released"));
        }
        if !Arc::ptr_eq(&self.env, txn.env()) {
            return Err(Error::InvalidArgument("database belongs to another environment"));
        }
        // The engine forgets a new slot when its opening transaction aborts.
        if self.dbi >= CORE_DBS && self.opener.state() == TransactionState::Aborted {
            return Err(Error::InvalidState("database was opened by an aborted transaction"));
        }
        Ok(())
    }

    /// Get database statistics
    pub fn stats(&self, txn: &Transaction) -> Result<Stat> {
        txn.stat(self)
    }

    /// Drop the database in `txn`
    ///
    /// Deletes the keyspace and releases this handle; further use fails with
    /// [`Error::InvalidState`].
    pub fn drop_in(&self, txn: &mut Transaction) -> Result<()> {
        self.check(txn)?;
        txn.with_active(|raw| unsafe { ffi::mdb_drop(raw, self.dbi, 1) }.into_result())?;
        // The engine closes the slot itself when deleting.
        self.released.store(true, Ordering::Release);
        debug!("dropped database {:?}", self.name);
        Ok(())
    }

    /// Remove all entries, keeping the database.
    pub fn truncate(&self, txn: &mut Transaction) -> Result<()> {
        self.check(txn)?;
        txn.with_active(|raw| unsafe { ffi::mdb_drop(raw, self.dbi, 0) }.into_result())?;
        debug!("truncated database {:?}", self.name);
        Ok(())
    }

    /// Close the engine slot now, regardless of `close_on_drop`.
    ///
    /// Must not be called while a transaction that modified this database is
    /// still open. A slot whose opening transaction has not committed is left
    /// to the engine, which keeps it on commit and forgets it on abort.
    pub fn close(self) {
        self.release(true);
    }

    fn release(&self, close_native: bool) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        // The main database slot is never closed, and a closed environment
        // has already let go of every slot.
        if close_native
            && self.dbi >= CORE_DBS
            && self.opener.state() == TransactionState::Committed
            && !self.env.is_closed()
        {
            unsafe { ffi::mdb_dbi_close(self.env.ptr(), self.dbi) };
        }
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        self.release(self.close_on_drop);
    }
}
