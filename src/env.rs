use std::ffi::CString;
use std::fs;
use std::mem::{self, MaybeUninit};
use std::os::raw::c_uint;
use std::path::{Path, PathBuf};
use std::ptr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use log::{debug, warn};

use crate::constants::{CopyFlags, EnvFlags, TransactionFlags};
use crate::error::{Error, IntoResult, Result};
use crate::ffi;
use crate::transaction::{Transaction, TxnCore};
use crate::types::{EnvInfo, Stat};

/// Map size the engine uses when none is configured.
pub const DEFAULT_MAP_SIZE: usize = 1 << 20;

/// Settings applied to an environment before it is opened.
///
/// Unset values keep the engine defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvironmentConfig {
    pub map_size: Option<usize>,
    pub max_readers: Option<u32>,
    pub max_databases: Option<u32>,
    /// Only meaningful for Windows builds of the engine, which can grow the
    /// data file on demand. Recorded and reported elsewhere.
    pub auto_resize_windows: bool,
    /// Clamp the map size to `i32::MAX` when running as a 32-bit process.
    pub auto_reduce_map_size_in_32bit_process: bool,
}

impl EnvironmentConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn map_size(mut self, size: usize) -> Self {
        self.map_size = Some(size);
        self
    }

    pub fn max_readers(mut self, readers: u32) -> Self {
        self.max_readers = Some(readers);
        self
    }

    pub fn max_databases(mut self, dbs: u32) -> Self {
        self.max_databases = Some(dbs);
        self
    }

    pub fn auto_resize_windows(mut self, enabled: bool) -> Self {
        self.auto_resize_windows = enabled;
        self
    }

    pub fn auto_reduce_map_size_in_32bit_process(mut self, enabled: bool) -> Self {
        self.auto_reduce_map_size_in_32bit_process = enabled;
        self
    }

    fn effective_map_size(&self, size: usize) -> usize {
        if cfg!(target_pointer_width = "32") && self.auto_reduce_map_size_in_32bit_process {
            size.min(i32::MAX as usize)
        } else {
            size
        }
    }

    /// Create a native handle and apply every configured limit to it.
    fn create_handle(&self) -> Result<*mut ffi::MDB_env> {
        let mut env: *mut ffi::MDB_env = ptr::null_mut();
        unsafe { ffi::mdb_env_create(&mut env) }.into_result()?;

        let applied = (|| -> Result<()> {
            if let Some(size) = self.map_size {
                unsafe { ffi::mdb_env_set_mapsize(env, self.effective_map_size(size) as _) }
                    .into_result()?;
            }
            if let Some(readers) = self.max_readers {
                unsafe { ffi::mdb_env_set_maxreaders(env, readers as c_uint) }.into_result()?;
            }
            if let Some(dbs) = self.max_databases {
                unsafe { ffi::mdb_env_set_maxdbs(env, dbs as ffi::MDB_dbi) }.into_result()?;
            }
            Ok(())
        })();

        if let Err(err) = applied {
            unsafe { ffi::mdb_env_close(env) };
            return Err(err);
        }
        Ok(env)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EnvStatus {
    Created,
    Opened,
    Closed,
}

#[derive(Debug)]
struct EnvShared {
    status: EnvStatus,
    path: Option<PathBuf>,
    /// Every transaction begun in this environment; dead entries are pruned on begin.
    txns: Vec<Weak<TxnCore>>,
}

/// Native environment shared by the [`Environment`] and every handle opened
/// from it. The engine handle is closed when the last of them goes away.
#[derive(Debug)]
pub(crate) struct EnvInner {
    ptr: *mut ffi::MDB_env,
    shared: Mutex<EnvShared>,
}

// The engine environment is safe to use from any thread; per-transaction
// thread affinity is enforced on `Transaction` instead.
unsafe impl Send for EnvInner {}
unsafe impl Sync for EnvInner {}

impl EnvInner {
    fn shared(&self) -> MutexGuard<'_, EnvShared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn ptr(&self) -> *mut ffi::MDB_env {
        self.ptr
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        match self.shared().status {
            EnvStatus::Opened => Ok(()),
            EnvStatus::Created => Err(Error::InvalidState("environment is not open")),
            EnvStatus::Closed => Err(Error::InvalidState("environment is closed")),
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.shared().status == EnvStatus::Closed
    }

    /// Track a freshly begun transaction so `close` can abort it.
    ///
    /// Fails if the environment was closed while the native begin was in flight.
    pub(crate) fn register(&self, txn: &Arc<TxnCore>) -> Result<()> {
        let mut shared = self.shared();
        if shared.status != EnvStatus::Opened {
            return Err(Error::InvalidState("environment is closed"));
        }
        shared.txns.retain(|t| t.strong_count() > 0);
        shared.txns.push(Arc::downgrade(txn));
        Ok(())
    }

    fn release(&mut self) {
        if !self.ptr.is_null() {
            unsafe { ffi::mdb_env_close(self.ptr) };
            self.ptr = ptr::null_mut();
        }
    }
}

impl Drop for EnvInner {
    fn drop(&mut self) {
        self.release();
    }
}

/// LMDB environment: the memory-mapped store and its table of databases.
///
/// Configure, then [`open`](Environment::open) exactly once. Closing (or
/// dropping) the environment aborts every transaction still active in it.
#[derive(Debug)]
pub struct Environment {
    inner: Arc<EnvInner>,
    config: EnvironmentConfig,
}

impl Environment {
    /// Create an environment with engine defaults.
    pub fn new() -> Result<Self> {
        Self::with_config(EnvironmentConfig::default())
    }

    pub fn with_config(config: EnvironmentConfig) -> Result<Self> {
        let ptr = config.create_handle()?;
        Ok(Environment {
            inner: Arc::new(EnvInner {
                ptr,
                shared: Mutex::new(EnvShared {
                    status: EnvStatus::Created,
                    path: None,
                    txns: Vec::new(),
                }),
            }),
            config,
        })
    }

    pub fn config(&self) -> &EnvironmentConfig {
        &self.config
    }

    fn status(&self) -> EnvStatus {
        self.inner.shared().status
    }

    pub fn is_opened(&self) -> bool {
        self.status() == EnvStatus::Opened
    }

    /// Directory (or file, with `NOSUBDIR`) the environment was opened at.
    pub fn path(&self) -> Option<PathBuf> {
        self.inner.shared().path.clone()
    }

    /// Size of the memory map. Allowed before open, and after open while no
    /// transaction of this process is active.
    pub fn set_map_size(&mut self, size: usize) -> Result<()> {
        if self.status() == EnvStatus::Closed {
            return Err(Error::InvalidState("environment is closed"));
        }
        let size = self.config.effective_map_size(size);
        unsafe { ffi::mdb_env_set_mapsize(self.inner.ptr(), size as _) }.into_result()?;
        self.config.map_size = Some(size);
        Ok(())
    }

    pub fn set_max_readers(&mut self, readers: u32) -> Result<()> {
        if self.status() != EnvStatus::Created {
            return Err(Error::InvalidState("max readers can only be set before open"));
        }
        unsafe { ffi::mdb_env_set_maxreaders(self.inner.ptr(), readers as c_uint) }
            .into_result()?;
        self.config.max_readers = Some(readers);
        Ok(())
    }

    pub fn set_max_databases(&mut self, dbs: u32) -> Result<()> {
        if self.status() != EnvStatus::Created {
            return Err(Error::InvalidState("max databases can only be set before open"));
        }
        unsafe { ffi::mdb_env_set_maxdbs(self.inner.ptr(), dbs as ffi::MDB_dbi) }.into_result()?;
        self.config.max_databases = Some(dbs);
        Ok(())
    }

    pub fn map_size(&self) -> usize {
        match self.info() {
            Ok(info) => info.mapsize,
            Err(_) => self
                .config
                .map_size
                .map(|size| self.config.effective_map_size(size))
                .unwrap_or(DEFAULT_MAP_SIZE),
        }
    }

    pub fn max_readers(&self) -> Result<u32> {
        if self.status() == EnvStatus::Closed {
            return Err(Error::InvalidState("environment is closed"));
        }
        let mut readers: c_uint = 0;
        unsafe { ffi::mdb_env_get_maxreaders(self.inner.ptr(), &mut readers) }.into_result()?;
        Ok(readers as u32)
    }

    pub fn max_databases(&self) -> u32 {
        self.config.max_databases.unwrap_or(0)
    }

    /// Largest key (and `DUPSORT` value) the engine accepts.
    pub fn max_key_size(&self) -> usize {
        unsafe { ffi::mdb_env_get_maxkeysize(self.inner.ptr()) as usize }
    }

    /// Open the environment at `path`.
    ///
    /// The directory is created unless `NOSUBDIR` is set. An environment can be
    /// opened once; after a failed attempt the native handle is rebuilt from the
    /// stored configuration and `open` may be retried.
    pub fn open<P: AsRef<Path>>(&mut self, path: P, flags: EnvFlags, mode: u32) -> Result<()> {
        let path = path.as_ref();
        match self.status() {
            EnvStatus::Created => {}
            EnvStatus::Opened => return Err(Error::InvalidState("environment is already open")),
            EnvStatus::Closed => return Err(Error::InvalidState("environment is closed")),
        }

        if !flags.contains(EnvFlags::NOSUBDIR) {
            fs::create_dir_all(path)?;
        }
        let c_path = path_to_cstring(path)?;

        let rc = unsafe {
            ffi::mdb_env_open(self.inner.ptr(), c_path.as_ptr(), flags.bits() as c_uint, mode as _)
        };
        if let Err(err) = rc.into_result() {
            debug!("opening environment at {} failed: {}", path.display(), err);
            // The engine requires a handle to be discarded after a failed open.
            let fresh = self.config.create_handle()?;
            let inner = Arc::get_mut(&mut self.inner)
                .ok_or(Error::InvalidState("environment is shared before open"))?;
            let old = mem::replace(&mut inner.ptr, fresh);
            unsafe { ffi::mdb_env_close(old) };
            return Err(err);
        }

        let mut shared = self.inner.shared();
        shared.status = EnvStatus::Opened;
        shared.path = Some(path.to_path_buf());
        debug!(
            "opened environment at {} (flags {:?}, auto resize {})",
            path.display(),
            flags,
            self.config.auto_resize_windows
        );
        Ok(())
    }

    /// Begin a read-write transaction. Blocks while another writer is active.
    pub fn begin_txn(&self) -> Result<Transaction> {
        self.begin_txn_with(TransactionFlags::empty())
    }

    /// Begin a read-only transaction pinned to the latest committed snapshot.
    pub fn begin_ro_txn(&self) -> Result<Transaction> {
        self.begin_txn_with(TransactionFlags::RDONLY)
    }

    pub fn begin_txn_with(&self, flags: TransactionFlags) -> Result<Transaction> {
        self.inner.ensure_open()?;
        Transaction::begin(Arc::clone(&self.inner), flags)
    }

    /// Last page number, last transaction id and map size.
    pub fn info(&self) -> Result<EnvInfo> {
        self.inner.ensure_open()?;
        let mut info = MaybeUninit::<ffi::MDB_envinfo>::uninit();
        unsafe {
            ffi::mdb_env_info(self.inner.ptr(), info.as_mut_ptr()).into_result()?;
            Ok(EnvInfo::from(info.assume_init()))
        }
    }

    /// Statistics of the main database.
    pub fn stat(&self) -> Result<Stat> {
        self.inner.ensure_open()?;
        let mut stat = MaybeUninit::<ffi::MDB_stat>::uninit();
        unsafe {
            ffi::mdb_env_stat(self.inner.ptr(), stat.as_mut_ptr()).into_result()?;
            Ok(Stat::from(stat.assume_init()))
        }
    }

    /// Flush buffers to disk. `force` syncs even with `NOSYNC`/`MAPASYNC`.
    pub fn sync(&self, force: bool) -> Result<()> {
        self.inner.ensure_open()?;
        unsafe { ffi::mdb_env_sync(self.inner.ptr(), force as _) }.into_result()
    }

    /// Hot backup into the directory `dest`, which is created if missing.
    ///
    /// Runs inside a read-only snapshot, so writers may proceed meanwhile.
    /// With `compact` free pages are omitted and pages renumbered.
    pub fn copy_to<P: AsRef<Path>>(&self, dest: P, compact: bool) -> Result<()> {
        self.inner.ensure_open()?;
        let dest = dest.as_ref();
        fs::create_dir_all(dest)?;
        let c_path = path_to_cstring(dest)?;
        let flags = if compact {
            CopyFlags::COMPACT
        } else {
            CopyFlags::empty()
        };
        unsafe { ffi::mdb_env_copy2(self.inner.ptr(), c_path.as_ptr(), flags.bits() as c_uint) }
            .into_result()?;
        debug!("copied environment to {} (compact: {})", dest.display(), compact);
        Ok(())
    }

    /// Close the environment.
    ///
    /// Transactions still active move to `Aborted` and refuse further work;
    /// their native handles are released when each `Transaction` is dropped,
    /// so values already read from them stay valid until then. The native
    /// environment is released now if nothing else references it, otherwise
    /// when the last database handle or transaction is dropped. Closing twice
    /// is a no-op.
    pub fn close(&mut self) {
        let live = {
            let mut shared = self.inner.shared();
            if shared.status == EnvStatus::Closed {
                return;
            }
            shared.status = EnvStatus::Closed;
            mem::take(&mut shared.txns)
        };

        let aborted = live
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|txn| txn.abort_for_env_close())
            .count();
        if aborted > 0 {
            warn!("environment closed with {} active transaction(s); aborted them", aborted);
        }

        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.release();
        }
        debug!("closed environment");
    }
}

impl Drop for Environment {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(unix)]
fn path_to_cstring(path: &Path) -> Result<CString> {
    use std::os::unix::ffi::OsStrExt;
    CString::new(path.as_os_str().as_bytes())
        .map_err(|_| Error::InvalidArgument("path contains an interior NUL byte"))
}

#[cfg(not(unix))]
fn path_to_cstring(path: &Path) -> Result<CString> {
    let path = path
        .to_str()
        .ok_or(Error::InvalidArgument("path is not valid UTF-8"))?;
    CString::new(path).map_err(|_| Error::InvalidArgument("path contains an interior NUL byte"))
}
