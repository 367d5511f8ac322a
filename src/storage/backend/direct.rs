use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use super::{
    FileId, IsamEngine, OpenRequest, SearchFlags, SearchMode, StatItems, StepMode,
    StorageBackend, TableStat,
};
use crate::error::Result;
use crate::schema::TableSpec;
use crate::session;
use crate::types::RowId;

/// Legacy fallback: every call maps onto one raw engine entry point.
///
/// There is no dictionary; `load_table_spec` reads the schema embedded in
/// the file named by the caller (or by the table name when no file is
/// given).
pub struct DirectBackend {
    engine: Arc<IsamEngine>,
    temp_seq: AtomicU32,
}

impl DirectBackend {
    /// Wraps `engine`.
    pub fn new(engine: Arc<IsamEngine>) -> Self {
        Self {
            engine,
            temp_seq: AtomicU32::new(0),
        }
    }

    /// Underlying engine.
    pub fn engine(&self) -> &Arc<IsamEngine> {
        &self.engine
    }

    /// Creates a file carrying `spec`; the spec is stored with the file.
    pub fn create_file(&self, path: &str, spec: &TableSpec) -> Result<()> {
        self.engine.btr_create(path, spec, false)
    }

    pub(super) fn next_temp_seq(&self) -> u32 {
        self.temp_seq.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn delete_matching(
        &self,
        file: FileId,
        rec_size: usize,
        predicate: &mut dyn FnMut(&[u8]) -> bool,
    ) -> Result<usize> {
        let mut rec = vec![0u8; rec_size];
        let config = session::config();
        let flags = if config.locking_disabled() {
            SearchFlags::default()
        } else {
            SearchFlags::for_update(config.wait_lock_tries)
        };
        let mut mode = StepMode::First;
        let mut deleted = 0;
        loop {
            match self.engine.btr_step(file, mode, flags, &mut rec) {
                Ok(_) => {}
                Err(err) if err.is_not_found() => break,
                Err(err) => return Err(err),
            }
            mode = StepMode::Next;
            if predicate(&rec) {
                self.engine.btr_delete(file)?;
                deleted += 1;
            } else if flags.lock {
                self.engine.btr_unlock(file)?;
            }
        }
        Ok(deleted)
    }
}

impl StorageBackend for DirectBackend {
    fn kind(&self) -> &'static str {
        "direct"
    }

    fn load_table_spec(&self, table: &str, file: Option<&str>) -> Result<TableSpec> {
        let path = file.unwrap_or(table);
        let mut spec = self.engine.btr_file_spec(path)?;
        spec.name = table.to_string();
        Ok(spec)
    }

    fn create_temp_file(&self, name_hint: &str, spec: &TableSpec) -> Result<String> {
        let dir = session::config().temp_dir.clone();
        let path = dir
            .join(format!("{name_hint}_{}.tmp", self.next_temp_seq()))
            .display()
            .to_string();
        self.engine.btr_create(&path, spec, true)?;
        debug!(path = %path, "direct.temp.create");
        Ok(path)
    }

    fn remove_file(&self, file_name: &str) -> Result<()> {
        self.engine.btr_remove(file_name)
    }

    fn open(&self, req: &OpenRequest<'_>) -> Result<FileId> {
        self.engine.btr_open(req.file_name, req.mode, req.guard)
    }

    fn close(&self, file: FileId) -> Result<()> {
        self.engine.btr_close(file)
    }

    fn insert_rec(&self, file: FileId, rec: &mut [u8]) -> Result<RowId> {
        self.engine.btr_insert(file, rec)
    }

    fn update_rec(&self, file: FileId, rec: &[u8], keep_currency: bool) -> Result<()> {
        self.engine.btr_update(file, rec, keep_currency)
    }

    fn delete_rec(&self, file: FileId) -> Result<()> {
        self.engine.btr_delete(file)
    }

    fn search(
        &self,
        file: FileId,
        idx: usize,
        key: &mut [u8],
        mode: SearchMode,
        flags: SearchFlags,
        rec: &mut [u8],
    ) -> Result<RowId> {
        self.engine.btr_get(file, idx, key, mode, flags, rec)
    }

    fn get_direct(
        &self,
        file: FileId,
        idx: usize,
        pos: RowId,
        key: &mut [u8],
        flags: SearchFlags,
        rec: &mut [u8],
    ) -> Result<()> {
        self.engine.btr_get_direct(file, idx, pos, key, flags, rec)
    }

    fn get_position(&self, file: FileId) -> Result<RowId> {
        self.engine.btr_get_position(file)
    }

    fn delete_from(
        &self,
        file: FileId,
        use_tx: bool,
        predicate: &mut dyn FnMut(&[u8]) -> bool,
    ) -> Result<usize> {
        let rec_size = self.engine.btr_stat(file, StatItems::REC_SIZE)?.rec_size as usize;
        let own_tx = use_tx && !self.engine.btr_in_transaction();
        if own_tx {
            self.engine.btr_begin()?;
        }
        match self.delete_matching(file, rec_size, predicate) {
            Ok(n) => {
                if own_tx {
                    self.engine.btr_end()?;
                }
                debug!(file = file.0, deleted = n, "direct.delete_from");
                Ok(n)
            }
            Err(err) => {
                if own_tx {
                    if let Err(abort) = self.engine.btr_abort() {
                        warn!(error = %abort, "direct.delete_from.abort_failed");
                    }
                }
                Err(err)
            }
        }
    }

    fn file_stat(&self, file: FileId, items: StatItems) -> Result<TableStat> {
        self.engine.btr_stat(file, items)
    }

    fn unlock(&self, file: FileId) -> Result<()> {
        self.engine.btr_unlock(file)
    }

    fn begin_transaction(&self) -> Result<()> {
        self.engine.btr_begin()
    }

    fn commit_transaction(&self) -> Result<()> {
        self.engine.btr_end()
    }

    fn abort_transaction(&self) -> Result<()> {
        self.engine.btr_abort()
    }
}
