use bitflags::bitflags;

// Environment flags
bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EnvFlags: u32 {
        const FIXEDMAP = 0x01;
        const NOSUBDIR = 0x4000;
        const NOSYNC = 0x10000;
        const RDONLY = 0x20000;
        const NOMETASYNC = 0x40000;
        const WRITEMAP = 0x80000;
        const MAPASYNC = 0x100000;
        const NOTLS = 0x200000;
        const NOLOCK = 0x400000;
        const NORDAHEAD = 0x800000;
        const NOMEMINIT = 0x1000000;
    }
}

// Database flags
bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DbFlags: u32 {
        const REVERSEKEY = 0x02;
        const DUPSORT = 0x04;
        const INTEGERKEY = 0x08;
        const CREATE = 0x40000;
    }
}

// Write operation flags
bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct WriteFlags: u32 {
        const NOOVERWRITE = 0x10;
        const NODUPDATA = 0x20;
        /// Cursor puts only: overwrite the item under the cursor.
        const CURRENT = 0x40;
        /// Caller asserts keys arrive in ascending order. Not verified.
        const APPEND = 0x20000;
        const APPENDDUP = 0x40000;
    }
}

// Transaction flags
bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TransactionFlags: u32 {
        // Reuse environment flags
        const RDONLY = EnvFlags::RDONLY.bits();
        const NOSYNC = EnvFlags::NOSYNC.bits();
        const NOMETASYNC = EnvFlags::NOMETASYNC.bits();
    }
}

// Copy operation flags
bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CopyFlags: u32 {
        const COMPACT = 0x01;
    }
}

/// `MDB_RESERVE`, only ever set by `Transaction::reserve_put`.
pub(crate) const RESERVE: u32 = 0x10000;

/// Default unix permissions for the data and lock files.
pub const DEFAULT_FILE_MODE: u32 = 0o644;

/// Core databases reserved by the engine (free list and main).
pub(crate) const CORE_DBS: u32 = 2;
