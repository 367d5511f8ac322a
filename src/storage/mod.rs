//! Record-level storage: LOB cells, serialization and backends.

/// Storage backends and the in-memory indexed-sequential engine.
pub mod backend;

/// Large-object cells and the per-table LOB registry.
pub mod lob;

/// Serialization context for specs and records.
pub mod ser;

pub use backend::{
    DictProvider, DirectBackend, FileId, IsamEngine, OpenMode, OpenRequest, SearchFlags,
    SearchMode, StatItems, StorageBackend, TableStat,
};
pub use lob::{LobCell, LobLookup, LobRegistry, LobTag, LobTransfer};
pub use ser::{Dir, SerializeContext};
