//! Pluggable storage backends.
//!
//! A [`RecordTable`](crate::table::RecordTable) talks to exactly one
//! [`StorageBackend`], chosen when the table is constructed. Two
//! implementations ship with the crate:
//!
//! * [`DirectBackend`] forwards every call to the raw `btr_*` entry points of
//!   an [`IsamEngine`]; the table schema is the one embedded in the file.
//! * [`DictProvider`] resolves table names through a schema dictionary and
//!   delegates record traffic to its own engine.
//!
//! Identical call sequences produce identical records, row addresses and
//! statuses on both.

use serde::Serialize;

use crate::error::Result;
use crate::schema::TableSpec;
use crate::types::RowId;

mod direct;
mod isam;
mod provider;

pub use direct::DirectBackend;
pub use isam::{IsamEngine, StepMode};
pub use provider::{DictProvider, Dictionary};

/// Access mode requested by `open`.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OpenMode {
    /// Shared read/write access.
    #[default]
    Normal,
    /// Shared access; writes fail with status 46.
    ReadOnly,
    /// Sole opener; other opens fail with status 85.
    Exclusive,
}

/// Key positioning performed by a search.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SearchMode {
    /// First record whose key equals the search key.
    Equal,
    /// First record whose key is greater than the search key.
    Greater,
    /// First record whose key is greater than or equal to the search key.
    GreaterOrEqual,
    /// Last record whose key is less than the search key.
    Less,
    /// Last record whose key is less than or equal to the search key.
    LessOrEqual,
    /// Lowest key.
    First,
    /// Highest key.
    Last,
    /// Key order successor of the current record.
    Next,
    /// Key order predecessor of the current record.
    Prev,
}

/// Options carried by a search or direct fetch.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct SearchFlags {
    /// Take a row lock on the record found.
    pub lock: bool,
    /// Position and return the key only; the record buffer is untouched.
    pub key_only: bool,
    /// Extra lock attempts before giving up with status 84.
    pub wait_tries: i32,
}

impl SearchFlags {
    /// Flags for a locking read.
    pub fn for_update(wait_tries: i32) -> Self {
        Self {
            lock: true,
            key_only: false,
            wait_tries,
        }
    }
}

/// Token for one open of a physical file.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct FileId(pub u32);

/// Physical open request.
#[derive(Clone, Debug)]
pub struct OpenRequest<'a> {
    /// Logical table name (diagnostics only).
    pub table_name: &'a str,
    /// Physical file name.
    pub file_name: &'a str,
    /// Access mode.
    pub mode: OpenMode,
    /// Access-guard bytes of the calling session.
    pub guard: &'a [u8],
}

/// Bit set selecting the members of [`TableStat`] to fill.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct StatItems(pub u32);

impl StatItems {
    /// Record count.
    pub const RECORDS: Self = Self(1);
    /// Fixed record size.
    pub const REC_SIZE: Self = Self(2);
    /// Page size.
    pub const PAGE_SIZE: Self = Self(4);
    /// Number of keys.
    pub const KEYS: Self = Self(8);
    /// File flags.
    pub const FLAGS: Self = Self(16);
    /// Every item.
    pub const ALL: Self = Self(31);

    /// Returns true when `other` is selected.
    pub fn contains(self, other: StatItems) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for StatItems {
    type Output = StatItems;

    fn bitor(self, rhs: Self) -> Self {
        StatItems(self.0 | rhs.0)
    }
}

/// File flag: the file is a temporary table.
pub const FILE_FLAG_TEMPORARY: u32 = 0x01;
/// File flag: some index allows duplicates.
pub const FILE_FLAG_DUP_KEYS: u32 = 0x02;

/// File statistics; members not selected by [`StatItems`] stay zero.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct TableStat {
    /// Live records.
    pub records: u64,
    /// Fixed record size in bytes.
    pub rec_size: u32,
    /// Engine page size.
    pub page_size: u32,
    /// Number of indexes.
    pub keys: u32,
    /// `FILE_FLAG_*` bits.
    pub flags: u32,
}

/// Storage provider interface bound to a table at construction.
///
/// Failures carry the engine status in [`DbError::Engine`](crate::DbError);
/// nothing here retries except the bounded lock wait requested through
/// [`SearchFlags::wait_tries`].
pub trait StorageBackend: Send + Sync {
    /// Short name for diagnostics.
    fn kind(&self) -> &'static str;

    /// Resolves the schema of `table`; `file` overrides the physical file
    /// name when given.
    fn load_table_spec(&self, table: &str, file: Option<&str>) -> Result<TableSpec>;

    /// Materializes a fresh temporary file shaped by `spec` and returns its
    /// name.
    fn create_temp_file(&self, name_hint: &str, spec: &TableSpec) -> Result<String>;

    /// Drops a physical file, typically a temporary one after close.
    fn remove_file(&self, file_name: &str) -> Result<()>;

    /// Opens a physical file.
    fn open(&self, req: &OpenRequest<'_>) -> Result<FileId>;

    /// Closes an open file and releases its locks.
    fn close(&self, file: FileId) -> Result<()>;

    /// Inserts `rec`; auto-increment values assigned by the engine are
    /// written back into `rec`.
    fn insert_rec(&self, file: FileId, rec: &mut [u8]) -> Result<RowId>;

    /// Rewrites the current record. With `keep_currency` the key position
    /// used by `Next`/`Prev` stays where it was before the update.
    fn update_rec(&self, file: FileId, rec: &[u8], keep_currency: bool) -> Result<()>;

    /// Deletes the current record.
    fn delete_rec(&self, file: FileId) -> Result<()>;

    /// Positions on index `idx`. The found key is written back into `key`
    /// and, unless `flags.key_only`, the record into `rec`.
    fn search(
        &self,
        file: FileId,
        idx: usize,
        key: &mut [u8],
        mode: SearchMode,
        flags: SearchFlags,
        rec: &mut [u8],
    ) -> Result<RowId>;

    /// Fetches the record at `pos` and establishes currency on index `idx`.
    fn get_direct(
        &self,
        file: FileId,
        idx: usize,
        pos: RowId,
        key: &mut [u8],
        flags: SearchFlags,
        rec: &mut [u8],
    ) -> Result<()>;

    /// Address of the current record.
    fn get_position(&self, file: FileId) -> Result<RowId>;

    /// Deletes every record accepted by `predicate` and returns the count.
    fn delete_from(
        &self,
        file: FileId,
        use_tx: bool,
        predicate: &mut dyn FnMut(&[u8]) -> bool,
    ) -> Result<usize>;

    /// File statistics.
    fn file_stat(&self, file: FileId, items: StatItems) -> Result<TableStat>;

    /// Releases every row lock held through `file`.
    fn unlock(&self, file: FileId) -> Result<()>;

    /// Starts an engine transaction.
    fn begin_transaction(&self) -> Result<()>;

    /// Commits the active transaction.
    fn commit_transaction(&self) -> Result<()>;

    /// Rolls back the active transaction.
    fn abort_transaction(&self) -> Result<()>;
}
