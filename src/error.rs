use std::ffi::CStr;
use std::io;
use std::os::raw::c_int;
use std::result;

use crate::ffi;

/// Custom result type for LMDB operations
pub type Result<T> = result::Result<T, Error>;

/// Errors surfaced by the binding.
///
/// Every variant except [`Error::InvalidState`] and [`Error::InvalidArgument`]
/// carries an engine status code, available through [`Error::code`]. Their
/// `Display` text is the engine's own message (`mdb_strerror`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Key/data pair already exists
    #[error("{}", self.message())]
    KeyExist,
    /// No matching key/data pair found
    #[error("{}", self.message())]
    NotFound,
    /// Requested page not found
    #[error("{}", self.message())]
    PageNotFound,
    /// Database file is corrupted
    #[error("{}", self.message())]
    Corrupted,
    /// Update of meta page failed or environment had fatal error
    #[error("{}", self.message())]
    Panic,
    /// Database version mismatch
    #[error("{}", self.message())]
    VersionMismatch,
    /// File is not a valid LMDB file
    #[error("{}", self.message())]
    Invalid,
    /// Environment mapsize limit reached
    #[error("{}", self.message())]
    MapFull,
    /// Environment maxdbs limit reached
    #[error("{}", self.message())]
    DbsFull,
    /// Environment maxreaders limit reached
    #[error("{}", self.message())]
    ReadersFull,
    /// Thread-local storage keys full
    #[error("{}", self.message())]
    TlsFull,
    /// Transaction has too many dirty pages
    #[error("{}", self.message())]
    TxnFull,
    /// Too many open cursors
    #[error("{}", self.message())]
    CursorFull,
    /// Page has not enough space
    #[error("{}", self.message())]
    PageFull,
    /// Database contents grew beyond environment mapsize
    #[error("{}", self.message())]
    MapResized,
    /// Operation and DB incompatible
    #[error("{}", self.message())]
    Incompatible,
    /// Invalid reuse of reader locktable slot
    #[error("{}", self.message())]
    BadRslot,
    /// Transaction must abort, has a child, or is invalid
    #[error("{}", self.message())]
    BadTxn,
    /// Unsupported size of key/DB name/data, or wrong DUPFIXED size
    #[error("{}", self.message())]
    BadValSize,
    /// The specified DBI was changed unexpectedly
    #[error("{}", self.message())]
    BadDbi,
    /// Unexpected problem, the transaction should abort
    #[error("{}", self.message())]
    Problem,
    /// Any other engine or system error code
    #[error("{}", self.message())]
    Other(c_int),
    /// The handle is not in a state that allows the operation
    #[error("invalid state: {0}")]
    InvalidState(&'static str),
    /// The arguments were rejected before reaching the engine
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
}

impl Error {
    /// Numeric engine status code, `None` for errors raised by the binding itself.
    pub fn code(&self) -> Option<c_int> {
        let code = match self {
            Error::KeyExist => -30799,
            Error::NotFound => -30798,
            Error::PageNotFound => -30797,
            Error::Corrupted => -30796,
            Error::Panic => -30795,
            Error::VersionMismatch => -30794,
            Error::Invalid => -30793,
            Error::MapFull => -30792,
            Error::DbsFull => -30791,
            Error::ReadersFull => -30790,
            Error::TlsFull => -30789,
            Error::TxnFull => -30788,
            Error::CursorFull => -30787,
            Error::PageFull => -30786,
            Error::MapResized => -30785,
            Error::Incompatible => -30784,
            Error::BadRslot => -30783,
            Error::BadTxn => -30782,
            Error::BadValSize => -30781,
            Error::BadDbi => -30780,
            Error::Problem => -30779,
            Error::Other(code) => *code,
            Error::InvalidState(_) | Error::InvalidArgument(_) => return None,
        };
        Some(code)
    }

    /// Message text, resolved through the engine for engine codes.
    pub fn message(&self) -> String {
        match self {
            Error::InvalidState(msg) | Error::InvalidArgument(msg) => (*msg).to_owned(),
            other => match other.code() {
                Some(code) => strerror(code),
                None => String::new(),
            },
        }
    }

    /// True for the engine's NotFound outcome.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound)
    }

    /// True if the error came from the engine rather than the binding.
    pub fn is_engine(&self) -> bool {
        self.code().is_some()
    }
}

fn strerror(code: c_int) -> String {
    // mdb_strerror falls back to strerror(3) for system codes.
    let ptr = unsafe { ffi::mdb_strerror(code) };
    if ptr.is_null() {
        return format!("Unknown error code: {}", code);
    }
    unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
}

impl From<c_int> for Error {
    fn from(err: c_int) -> Error {
        match err {
            -30799 => Error::KeyExist,
            -30798 => Error::NotFound,
            -30797 => Error::PageNotFound,
            -30796 => Error::Corrupted,
            -30795 => Error::Panic,
            -30794 => Error::VersionMismatch,
            -30793 => Error::Invalid,
            -30792 => Error::MapFull,
            -30791 => Error::DbsFull,
            -30790 => Error::ReadersFull,
            -30789 => Error::TlsFull,
            -30788 => Error::TxnFull,
            -30787 => Error::CursorFull,
            -30786 => Error::PageFull,
            -30785 => Error::MapResized,
            -30784 => Error::Incompatible,
            -30783 => Error::BadRslot,
            -30782 => Error::BadTxn,
            -30781 => Error::BadValSize,
            -30780 => Error::BadDbi,
            -30779 => Error::Problem,
            err => Error::Other(err),
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        match err.raw_os_error() {
            Some(code) => Error::from(code),
            None => Error::Other(-1),
        }
    }
}

/// Helper trait for converting C error codes to Results
pub(crate) trait IntoResult {
    fn into_result(self) -> Result<()>;
}

impl IntoResult for c_int {
    fn into_result(self) -> Result<()> {
        if self == 0 {
            Ok(())
        } else {
            Err(Error::from(self))
        }
    }
}

/// Maps NotFound to `None`, for read paths where absence is a valid answer.
pub(crate) trait OptionalResult<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalResult<T> for Result<T> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(value) => Ok(Some(value)),
            Err(Error::NotFound) => Ok(None),
            Err(err) => Err(err),
        }
    }
}
