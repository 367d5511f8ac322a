//! Fixed-layout record tables with large-object support.
//!
//! A [`RecordTable`] owns a fixed-size record buffer and forwards every
//! engine call to the [`StorageBackend`](storage::StorageBackend) chosen at
//! construction: either the structured [`DictProvider`](storage::DictProvider)
//! or the legacy [`DirectBackend`](storage::DirectBackend). BLOB and CLOB
//! fields keep small payloads inline and move large ones to owned
//! allocations; [`RecordTable::store_and_trim_lob`] and
//! [`RecordTable::restore_lob`] carry them across channels that only see
//! the fixed buffer.

#![warn(missing_docs)]

/// Error type and engine status codes.
pub mod error;
/// Byte streams and varints.
pub mod primitives;
/// Field, index and table descriptions.
pub mod schema;
/// Thread-local session area and configuration.
pub mod session;
/// Backends, LOB cells and serialization.
pub mod storage;
/// Record tables.
pub mod table;
/// Row addresses and handles.
pub mod types;

pub use error::{DbError, EngineStatus, Result};
pub use schema::{FieldKind, TableSpec};
pub use session::{SessionConfig, Transaction};
pub use table::{RecordTable, SelectStmt, TableOptions};
pub use types::{RowId, TableHandle};
