#![forbid(unsafe_code)]
//! Fixed-layout record tables over a pluggable backend.
//!
//! [`RecordTable`] owns the record buffer, the field and index views
//! resolved at open, and the [`LobRegistry`] derived from them. Every engine
//! call goes through the [`StorageBackend`] chosen at construction.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{DbError, EngineStatus, Result};
use crate::schema::{FieldDef, FieldList, IndexList};
use crate::session;
use crate::storage::backend::{FileId, OpenMode, OpenRequest, StatItems, StorageBackend, TableStat};
use crate::storage::lob::LobRegistry;
use crate::types::{FieldRef, RowId, TableHandle};

mod diag;
mod lob;
mod options;
mod records;
mod serial;

pub use options::{ErrLogReporter, OpenFailureHandler, TableOptions};
pub use serial::{SelectStmt, ARRAY_HEADROOM};

/// Table state bits.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct TableState(pub u16);

impl TableState {
    /// Physical file is open.
    pub const OPENED: Self = Self(0x0001);
    /// Record buffer is owned by the table.
    pub const OWN_BUF: Self = Self(0x0002);
    /// Layout has BLOB/CLOB fields.
    pub const HAS_LOB: Self = Self(0x0004);
    /// Layout has a NOTE field.
    pub const HAS_NOTE: Self = Self(0x0008);
    /// Layout has an auto-increment field.
    pub const HAS_AUTOINC: Self = Self(0x0010);
    /// File is a temporary table.
    pub const TEMPORARY: Self = Self(0x0020);
    /// Table belongs to the schema dictionary.
    pub const SCHEMA: Self = Self(0x0040);
    /// Out-of-transaction reporting is off.
    pub const SUPPRESS_TX_LOG: Self = Self(0x0080);

    const LAYOUT: Self = Self(0x001c);

    /// Returns true when every bit of `other` is set.
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns true when any bit of `other` is set.
    pub fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    fn set(&mut self, other: Self, on: bool) {
        if on {
            self.0 |= other.0;
        } else {
            self.0 &= !other.0;
        }
    }

    fn names(self) -> Vec<&'static str> {
        const NAMES: [(TableState, &str); 8] = [
            (TableState::OPENED, "opened"),
            (TableState::OWN_BUF, "own_buf"),
            (TableState::HAS_LOB, "has_lob"),
            (TableState::HAS_NOTE, "has_note"),
            (TableState::HAS_AUTOINC, "has_autoinc"),
            (TableState::TEMPORARY, "temporary"),
            (TableState::SCHEMA, "schema"),
            (TableState::SUPPRESS_TX_LOG, "suppress_tx_log"),
        ];
        NAMES
            .iter()
            .filter(|(bit, _)| self.contains(*bit))
            .map(|(_, name)| *name)
            .collect()
    }
}

fn track<T>(res: Result<T>) -> Result<T> {
    match &res {
        Ok(_) => session::record_status(EngineStatus::OK),
        Err(err) => {
            if let Some(code) = err.status() {
                session::record_status(code);
            }
        }
    }
    res
}

/// A table of fixed-length records bound to one backend.
pub struct RecordTable {
    backend: Arc<dyn StorageBackend>,
    on_open_failure: Option<Arc<dyn OpenFailureHandler>>,
    handle: Option<TableHandle>,
    file: Option<FileId>,
    table_name: String,
    file_name: String,
    fields: FieldList,
    indexes: IndexList,
    lobs: LobRegistry,
    position: RowId,
    cur_index: usize,
    buf: Vec<u8>,
    buf_len: usize,
    state: TableState,
    stmts: [Option<SelectStmt>; 2],
    cur_stmt: usize,
    lob_staging: Vec<u8>,
}

impl RecordTable {
    /// Creates a closed table.
    pub fn new(options: TableOptions) -> Self {
        let mut state = TableState::default();
        state.set(TableState::TEMPORARY, options.temporary);
        state.set(TableState::SCHEMA, options.schema_table);
        state.set(TableState::SUPPRESS_TX_LOG, options.suppress_tx_log);
        Self {
            backend: options.backend,
            on_open_failure: options.on_open_failure,
            handle: None,
            file: None,
            table_name: String::new(),
            file_name: String::new(),
            fields: FieldList::new(),
            indexes: IndexList::new(),
            lobs: LobRegistry::new(),
            position: RowId::ZERO,
            cur_index: 0,
            buf: Vec::new(),
            buf_len: 0,
            state,
            stmts: [None, None],
            cur_stmt: 0,
            lob_staging: Vec::new(),
        }
    }

    /// Creates a table and opens it.
    pub fn open_new(
        table_name: &str,
        file_name: Option<&str>,
        mode: OpenMode,
        options: TableOptions,
    ) -> Result<Self> {
        let mut table = Self::new(options);
        table.open(table_name, file_name, mode)?;
        Ok(table)
    }

    /// Opens a table and binds the named fields, sizing the owned buffer from
    /// the field layout.
    pub fn open_bound(
        table_name: &str,
        file_name: Option<&str>,
        mode: OpenMode,
        options: TableOptions,
        bind: &[&str],
    ) -> Result<(Self, Vec<FieldRef>)> {
        let mut table = Self::open_new(table_name, file_name, mode, options)?;
        let size = table.fields.iter().map(|f| f.size).sum();
        table.alloc_own_buffer(size)?;
        let refs = bind
            .iter()
            .map(|name| {
                table
                    .field_ref(name)
                    .ok_or(DbError::Invalid("bound field not in table layout"))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok((table, refs))
    }

    /// Opens the physical file behind `table_name`.
    ///
    /// `file_name` overrides the file the backend would resolve. Opening an
    /// open table returns its handle unchanged. On failure the handle stays
    /// unset and the open-failure handler, if any, is called once.
    pub fn open(
        &mut self,
        table_name: &str,
        file_name: Option<&str>,
        mode: OpenMode,
    ) -> Result<TableHandle> {
        if let Some(handle) = self.handle.filter(|_| self.is_open()) {
            return Ok(handle);
        }
        match self.open_inner(table_name, file_name, mode) {
            Ok(handle) => Ok(handle),
            Err(err) => {
                let status = err.status().unwrap_or_else(session::last_status);
                let resolved = std::mem::take(&mut self.file_name);
                warn!(table = table_name, file = %resolved, %status, error = %err, "table.open.failed");
                self.reset_layout();
                self.table_name.clear();
                self.handle = None;
                if let Some(handler) = &self.on_open_failure {
                    handler.on_open_failure(&resolved, status);
                }
                Err(err)
            }
        }
    }

    fn open_inner(
        &mut self,
        table_name: &str,
        file_name: Option<&str>,
        mode: OpenMode,
    ) -> Result<TableHandle> {
        self.table_name = table_name.to_string();
        self.file_name = file_name.unwrap_or(table_name).to_string();
        let mut spec = track(self.backend.load_table_spec(table_name, file_name))?;
        if let Some(resolved) = &spec.file_name {
            self.file_name = resolved.clone();
        }
        if self.state.contains(TableState::TEMPORARY) {
            let temp = track(self.backend.create_temp_file(table_name, &spec))?;
            spec.file_name = Some(temp.clone());
            self.file_name = temp;
        }
        let (fields, indexes) = spec.build()?;
        let guard = session::access_guard();
        let file = track(self.backend.open(&OpenRequest {
            table_name,
            file_name: &self.file_name,
            mode,
            guard: &guard,
        }))?;
        if let Err(err) = self.bind_layout(fields, indexes) {
            if let Err(close) = self.backend.close(file) {
                warn!(error = %close, "table.open.close_failed");
            }
            return Err(err);
        }
        self.file = Some(file);
        self.state.set(TableState::OPENED, true);
        let handle = session::add_table_entry(table_name, &self.file_name, self.backend.kind());
        self.handle = Some(handle);
        debug!(
            handle = handle.get(),
            table = table_name,
            file = %self.file_name,
            backend = self.backend.kind(),
            rec_size = self.fields.rec_size(),
            "table.open"
        );
        Ok(handle)
    }

    /// Installs a layout, rebuilding the LOB registry and sizing the buffer.
    fn bind_layout(&mut self, fields: FieldList, indexes: IndexList) -> Result<()> {
        let scan = self.lobs.rebuild(&fields);
        self.state.set(TableState::HAS_LOB, scan.has_lob);
        self.state.set(TableState::HAS_NOTE, scan.has_note);
        self.state.set(TableState::HAS_AUTOINC, scan.has_autoinc);
        let rec_size = fields.rec_size();
        self.fields = fields;
        self.indexes = indexes;
        if self.state.contains(TableState::OWN_BUF) || self.buf.is_empty() {
            self.alloc_own_buffer(rec_size)?;
        } else if self.buf_len < rec_size {
            return Err(DbError::Invalid("external buffer shorter than record"));
        }
        Ok(())
    }

    fn reset_layout(&mut self) {
        self.fields.reset();
        self.indexes.reset();
        self.lobs.clear();
        self.state.set(TableState::LAYOUT, false);
    }

    /// Closes the table. Closing a closed table does nothing.
    pub fn close(&mut self) -> Result<()> {
        let mut result = Ok(());
        if self.is_open() {
            if let Some(file) = self.file.take() {
                result = track(self.backend.close(file));
            }
            self.state.set(TableState::OPENED, false);
            if self.state.contains(TableState::TEMPORARY) && !self.file_name.is_empty() {
                if let Err(err) = self.backend.remove_file(&self.file_name) {
                    warn!(file = %self.file_name, error = %err, "table.temp.remove_failed");
                }
            }
            debug!(table = %self.table_name, "table.close");
        }
        self.table_name.clear();
        self.file_name.clear();
        self.reset_layout();
        if let Some(handle) = self.handle.take() {
            session::free_table_entry(handle);
        }
        if self.state.contains(TableState::OWN_BUF) {
            self.buf = Vec::new();
            self.buf_len = 0;
            self.state.set(TableState::OWN_BUF, false);
        }
        self.position.set_zero();
        self.cur_index = 0;
        result
    }

    /// Returns true while the physical file is open.
    pub fn is_open(&self) -> bool {
        self.state.contains(TableState::OPENED)
    }

    /// Handle assigned by the session registry; `None` when closed.
    pub fn handle(&self) -> Option<TableHandle> {
        self.handle
    }

    /// State bits.
    pub fn state(&self) -> TableState {
        self.state
    }

    /// Logical table name.
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Physical file name.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Bound backend.
    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    /// Row address cached by the last positioning call.
    pub fn position(&self) -> RowId {
        self.position
    }

    fn file(&self) -> Result<FileId> {
        self.file.ok_or(DbError::NotOpen)
    }

    /// Field layout.
    pub fn fields(&self) -> &FieldList {
        &self.fields
    }

    /// Index layout.
    pub fn indexes(&self) -> &IndexList {
        &self.indexes
    }

    /// Field at position `n`.
    pub fn field(&self, n: usize) -> Option<&FieldDef> {
        self.fields.get(n)
    }

    /// Field named `name` with its position.
    pub fn field_by_name(&self, name: &str) -> Option<(usize, &FieldDef)> {
        self.fields.by_name(name)
    }

    /// Reference to the field named `name` of this open table.
    pub fn field_ref(&self, name: &str) -> Option<FieldRef> {
        let (field, _) = self.fields.by_name(name)?;
        Some(FieldRef {
            table: self.handle?,
            field,
        })
    }

    /// Value bytes of field `n` in the record buffer.
    pub fn field_value(&self, n: usize) -> Option<&[u8]> {
        self.fields.value(self.buffer(), n)
    }

    /// Writes field `n`, zero-padding short input.
    pub fn set_field_value(&mut self, n: usize, src: &[u8]) -> Result<()> {
        self.fields.set_value(&mut self.buf[..self.buf_len], n, src)
    }

    /// Value bytes of the field named `name`.
    pub fn field_value_by_name(&self, name: &str) -> Option<&[u8]> {
        let (n, _) = self.fields.by_name(name)?;
        self.field_value(n)
    }

    /// Writes the field named `name`.
    pub fn set_field_value_by_name(&mut self, name: &str, src: &[u8]) -> Result<()> {
        let (n, _) = self
            .fields
            .by_name(name)
            .ok_or(DbError::Invalid("unknown field name"))?;
        self.set_field_value(n, src)
    }

    /// Renders the record as `value; ` or `name=value; ` pairs.
    pub fn rec_to_string(&self, with_names: bool) -> String {
        let rec = self.buffer();
        let mut out = String::new();
        for (n, f) in self.fields.iter().enumerate() {
            let value = self.fields.value_to_string(rec, n).unwrap_or_default();
            if with_names {
                out.push_str(&f.name);
                out.push('=');
            }
            out.push_str(&value);
            out.push_str("; ");
        }
        out
    }

    /// Fixed record size of the layout.
    pub fn rec_size(&self) -> usize {
        self.fields.rec_size()
    }

    /// Active record buffer length.
    pub fn buf_len(&self) -> usize {
        self.buf_len
    }

    /// Record buffer.
    pub fn buffer(&self) -> &[u8] {
        &self.buf[..self.buf_len]
    }

    /// Mutable record buffer. Writes into LOB flat regions bypass the LOB
    /// cells; use [`RecordTable::write_lob_data`] for those.
    pub fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.buf[..self.buf_len]
    }

    /// Replaces the buffer with an owned, zeroed one of `size` bytes plus a
    /// guard byte. A previous external buffer is handed back.
    pub fn alloc_own_buffer(&mut self, size: usize) -> Result<Option<Vec<u8>>> {
        let fresh = crate::error::try_alloc_zeroed(size + 1)?;
        let previous = std::mem::replace(&mut self.buf, fresh);
        let was_external = !self.state.contains(TableState::OWN_BUF) && !previous.is_empty();
        self.buf_len = size;
        self.state.set(TableState::OWN_BUF, true);
        self.lobs.clear_values();
        Ok(was_external.then_some(previous))
    }

    /// Binds a caller-supplied buffer of which the first `len` bytes form the
    /// record. A previous external buffer is handed back; an owned one is
    /// released.
    pub fn set_data_buf(&mut self, buf: Vec<u8>, len: usize) -> Result<Option<Vec<u8>>> {
        if len > buf.len() {
            return Err(DbError::Invalid("buffer length exceeds buffer"));
        }
        if self.is_open() && len < self.fields.rec_size() {
            return Err(DbError::Invalid("external buffer shorter than record"));
        }
        let previous = std::mem::replace(&mut self.buf, buf);
        let was_external = !self.state.contains(TableState::OWN_BUF) && !previous.is_empty();
        self.buf_len = len;
        self.state.set(TableState::OWN_BUF, false);
        self.lobs.clear_values();
        Ok(was_external.then_some(previous))
    }

    /// Takes back an external buffer, leaving the table without one.
    pub fn take_data_buf(&mut self) -> Option<Vec<u8>> {
        if self.state.contains(TableState::OWN_BUF) || self.buf.is_empty() {
            return None;
        }
        self.buf_len = 0;
        self.lobs.clear_values();
        Some(std::mem::take(&mut self.buf))
    }

    /// Zeroes the record and forgets LOB values.
    pub fn clear_data_buf(&mut self) {
        self.buf[..self.buf_len].fill(0);
        self.lobs.clear_values();
    }

    /// Copies a whole record from `src`.
    pub fn copy_buf_from(&mut self, src: &[u8]) -> Result<()> {
        if src.len() < self.buf_len {
            return Err(DbError::Invalid("source shorter than record buffer"));
        }
        let n = self.buf_len;
        self.buf[..n].copy_from_slice(&src[..n]);
        Ok(())
    }

    /// Copies at most `size` bytes of `src`, clamped to both lengths.
    pub fn copy_buf_from_sized(&mut self, src: &[u8], size: usize) -> usize {
        let n = size.min(src.len()).min(self.buf_len);
        self.buf[..n].copy_from_slice(&src[..n]);
        n
    }

    /// Copies the record into `dst`, clamped to both lengths.
    pub fn copy_buf_to(&self, dst: &mut [u8]) -> usize {
        let n = dst.len().min(self.buf_len);
        dst[..n].copy_from_slice(&self.buf[..n]);
        n
    }

    /// Key length of index `idx`.
    pub fn key_size(&self, idx: usize) -> usize {
        self.indexes.key_size(idx, &self.fields)
    }

    /// Builds the key of index `idx` from the record buffer, segment by
    /// segment. Returns the key length.
    pub fn copy_buffer_to_key(&self, idx: usize, out: &mut [u8]) -> Result<usize> {
        let key = self
            .indexes
            .get(idx)
            .ok_or(DbError::Invalid("index out of range"))?;
        let rec = self.buffer();
        let mut off = 0;
        for seg in &key.segments {
            let value = self
                .fields
                .value(rec, seg.field)
                .ok_or(DbError::Invalid("record buffer shorter than key layout"))?;
            let dst = out
                .get_mut(off..off + value.len())
                .ok_or(DbError::Invalid("key buffer too short"))?;
            dst.copy_from_slice(value);
            off += value.len();
        }
        Ok(off)
    }

    /// File statistics for the items selected.
    pub fn file_stat(&self, items: StatItems) -> Result<TableStat> {
        track(self.backend.file_stat(self.file()?, items))
    }

    /// Derives the session error log name from the installed config.
    pub fn init_err_file_name(&self) -> Option<PathBuf> {
        session::init_err_file_name()
    }

    /// Session error log name.
    pub fn last_error_file_name(&self) -> Option<PathBuf> {
        session::err_file_name()
    }

    fn report_out_of_transaction(&self, op: &'static str) {
        let exempt = TableState(
            TableState::TEMPORARY.0 | TableState::SCHEMA.0 | TableState::SUPPRESS_TX_LOG.0,
        );
        if self.state.intersects(exempt) || session::state().in_transaction {
            return;
        }
        let config = session::config();
        if config.out_of_transaction_logging {
            diag::out_of_transaction(&config, op, &self.table_name, &self.file_name);
        }
    }
}

impl Drop for RecordTable {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(error = %err, "table.drop.close_failed");
        }
    }
}

impl std::fmt::Debug for RecordTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordTable")
            .field("handle", &self.handle)
            .field("table_name", &self.table_name)
            .field("file_name", &self.file_name)
            .field("backend", &self.backend.kind())
            .field("state", &self.state.names())
            .field("buf_len", &self.buf_len)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldKind, TableSpec};
    use crate::storage::backend::{DirectBackend, IsamEngine};

    fn table() -> RecordTable {
        let engine = Arc::new(IsamEngine::new());
        let direct = DirectBackend::new(engine);
        let spec = TableSpec::new("pairs")
            .field("a", FieldKind::Int, 4)
            .field("b", FieldKind::Char, 8)
            .field("c", FieldKind::UInt, 2)
            .index(&["a", "b"], false);
        direct.create_file("pairs.btr", &spec).unwrap();
        RecordTable::open_new(
            "pairs",
            Some("pairs.btr"),
            OpenMode::Normal,
            TableOptions::new(Arc::new(direct)).suppress_tx_log(true),
        )
        .unwrap()
    }

    #[test]
    fn composite_key_is_segment_concatenation() {
        let mut t = table();
        t.set_field_value(0, &7i32.to_le_bytes()).unwrap();
        t.set_field_value(1, b"abcdefgh").unwrap();
        let mut key = [0u8; 16];
        let n = t.copy_buffer_to_key(0, &mut key).unwrap();
        assert_eq!(n, 12);
        assert_eq!(&key[..4], &7i32.to_le_bytes());
        assert_eq!(&key[4..12], b"abcdefgh");
        let mut short = [0u8; 6];
        assert!(t.copy_buffer_to_key(0, &mut short).is_err());
    }

    #[test]
    fn own_buffer_has_guard_byte_and_record_length() {
        let t = table();
        assert_eq!(t.buf_len(), 14);
        assert_eq!(t.buf.len(), 15);
        assert!(t.state().contains(TableState::OWN_BUF));
    }

    #[test]
    fn external_buffer_swaps_and_returns() {
        let mut t = table();
        assert!(t.set_data_buf(vec![1u8; 10], 10).is_err());
        assert!(t.set_data_buf(vec![1u8; 20], 16).unwrap().is_none());
        assert_eq!(t.buf_len(), 16);
        let prev = t.set_data_buf(vec![2u8; 14], 14).unwrap().unwrap();
        assert_eq!(prev.len(), 20);
        let back = t.take_data_buf().unwrap();
        assert_eq!(back, vec![2u8; 14]);
        assert!(t.alloc_own_buffer(14).unwrap().is_none());
    }

    #[test]
    fn copies_clamp_to_shorter_side() {
        let mut t = table();
        assert_eq!(t.copy_buf_from_sized(&[9u8; 40], 100), 14);
        assert_eq!(t.copy_buf_from_sized(&[8u8; 3], 100), 3);
        let mut small = [0u8; 5];
        assert_eq!(t.copy_buf_to(&mut small), 5);
        assert_eq!(small, [8, 8, 8, 9, 9]);
        assert!(t.copy_buf_from(&[0u8; 4]).is_err());
    }

    #[test]
    fn rec_to_string_with_and_without_names() {
        let mut t = table();
        t.set_field_value_by_name("a", &(-3i32).to_le_bytes()).unwrap();
        t.set_field_value_by_name("b", b"xy").unwrap();
        t.set_field_value_by_name("c", &5u16.to_le_bytes()).unwrap();
        assert_eq!(t.rec_to_string(true), "a=-3; b=xy; c=5; ");
        assert_eq!(t.rec_to_string(false), "-3; xy; 5; ");
        assert!(t.set_field_value_by_name("zz", b"1").is_err());
    }
}
