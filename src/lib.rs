//! Safe bindings over the LMDB memory-mapped key-value store.
//!
//! An [`Environment`] owns the map. Inside it, [`Transaction`]s come in two
//! kinds: at most one read-write transaction at a time (the engine makes a
//! second writer wait), and any number of read-only transactions, each pinned
//! to the snapshot that was current when it began. [`Database`] handles name
//! keyspaces within the environment, and [`Cursor`]s walk one database inside
//! one transaction.
//!
//! Reads are zero-copy: values come back as slices into the mapped file,
//! borrowed from the transaction or cursor that produced them. Anything that
//! could move those pages (a write, commit, abort, reset) needs `&mut`, so the
//! borrow checker ends every view before the engine may reuse its memory.
//!
//! ```no_run
//! use lumodb::{DatabaseConfig, DbFlags, EnvFlags, Environment, EnvironmentConfig, WriteFlags};
//!
//! # fn main() -> lumodb::Result<()> {
//! let mut env = Environment::with_config(EnvironmentConfig::new().max_databases(2))?;
//! env.open("/tmp/lumodb-demo", EnvFlags::empty(), 0o644)?;
//!
//! let mut txn = env.begin_txn()?;
//! let db = txn.open_database(Some("test"), DatabaseConfig::new(DbFlags::CREATE), true)?;
//! txn.put(&db, b"key1", b"value", WriteFlags::empty())?;
//! txn.commit()?;
//!
//! let txn = env.begin_ro_txn()?;
//! assert_eq!(txn.get(&db, b"key1")?, b"value");
//! # Ok(())
//! # }
//! ```

pub use lmdb_master_sys as ffi;

mod comparator;
mod constants;
mod cursor;
mod database;
mod env;
mod error;
mod transaction;
mod types;
mod value;

pub use comparator::{ComparatorPin, KeyComparator};
pub use constants::{
    CopyFlags, DbFlags, EnvFlags, TransactionFlags, WriteFlags, DEFAULT_FILE_MODE,
};
pub use cursor::{Cursor, Item, Iter, UnboundCursor};
pub use database::{Database, DatabaseConfig};
pub use env::{Environment, EnvironmentConfig, DEFAULT_MAP_SIZE};
pub use error::{Error, Result};
pub use transaction::Transaction;
pub use types::{version, EnvInfo, Stat, TransactionState, VersionInfo};
