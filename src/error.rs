use std::fmt;
use std::io;

use thiserror::Error;
use tracing::error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, DbError>;

/// Status code reported by the storage engine for the last call.
///
/// Values follow the classic indexed-sequential engine numbering so they can
/// be handed verbatim to open-failure handlers and compared across backends.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default)]
pub struct EngineStatus(pub i32);

impl EngineStatus {
    /// Call completed.
    pub const OK: Self = Self(0);
    /// Operation on a file that is not open.
    pub const FILE_NOT_OPEN: Self = Self(3);
    /// No record matches the supplied key.
    pub const KEY_NOT_FOUND: Self = Self(4);
    /// Insert or update would duplicate a unique key.
    pub const DUPLICATE_KEY: Self = Self(5);
    /// Index number outside the file's key list.
    pub const INVALID_KEY_NUMBER: Self = Self(6);
    /// Operation requires a current record and there is none.
    pub const INVALID_POSITIONING: Self = Self(8);
    /// Scan moved past the first or last record.
    pub const END_OF_FILE: Self = Self(9);
    /// File does not exist.
    pub const FILE_NOT_FOUND: Self = Self(12);
    /// Caller buffer shorter than the fixed record.
    pub const BUFFER_TOO_SHORT: Self = Self(22);
    /// Row address does not reference a live record.
    pub const INVALID_RECORD_ADDRESS: Self = Self(43);
    /// Write attempted through a read-only open.
    pub const ACCESS_DENIED: Self = Self(46);
    /// Owner bytes presented on open do not match the file's owner.
    pub const INVALID_OWNER: Self = Self(51);
    /// File already exists.
    pub const FILE_EXISTS: Self = Self(59);
    /// Record is locked by another owner.
    pub const RECORD_LOCKED: Self = Self(84);
    /// File is held exclusively by another open.
    pub const FILE_IN_USE: Self = Self(85);

    /// Returns true when the status denotes success.
    pub fn is_ok(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for EngineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Crate-wide error type.
#[derive(Debug, Error)]
pub enum DbError {
    /// Underlying I/O failure (log or config files).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// Storage engine or backend rejected a call.
    #[error("engine error {code} during {op}")]
    Engine {
        /// Engine status code.
        code: EngineStatus,
        /// Name of the failing operation.
        op: &'static str,
    },
    /// Precondition or argument violation.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    /// Malformed serialized data or schema.
    #[error("corruption detected: {0}")]
    Corruption(&'static str),
    /// Heap allocation could not be satisfied.
    #[error("allocation of {size} bytes failed")]
    Alloc {
        /// Requested size in bytes.
        size: usize,
    },
    /// Operation needs an open table.
    #[error("table is not open")]
    NotOpen,
    /// Configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(String),
}

impl DbError {
    pub(crate) fn engine(code: EngineStatus, op: &'static str) -> Self {
        DbError::Engine { code, op }
    }

    /// Returns the engine status carried by this error, if any.
    pub fn status(&self) -> Option<EngineStatus> {
        match self {
            DbError::Engine { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Returns true for "no matching record" style outcomes.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self.status(),
            Some(EngineStatus::KEY_NOT_FOUND) | Some(EngineStatus::END_OF_FILE)
        )
    }
}

/// Attempts a fallible allocation of `size` zeroed bytes.
pub(crate) fn try_alloc_zeroed(size: usize) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(size).map_err(|_| {
        error!(size, "alloc.failed");
        DbError::Alloc { size }
    })?;
    buf.resize(size, 0);
    Ok(buf)
}
