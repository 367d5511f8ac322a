#![forbid(unsafe_code)]
//! In-memory indexed-sequential engine behind both backends.
//!
//! Files are keyed by path. Each file keeps its records in a map addressed by
//! record number and one sorted entry list per index, ordered by the
//! kind-aware segment comparison of [`IndexList::compare_keys`] with the
//! record number as tie breaker. Every open of a file gets its own cursor
//! carrying the current position; row locks belong to cursors.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, trace};

use super::{
    FileId, OpenMode, SearchFlags, SearchMode, StatItems, TableStat, FILE_FLAG_DUP_KEYS,
    FILE_FLAG_TEMPORARY,
};
use crate::error::{DbError, EngineStatus, Result};
use crate::schema::{FieldKind, FieldList, IndexList, TableSpec};
use crate::types::RowId;

const LOCK_RETRY_DELAY: Duration = Duration::from_millis(2);

/// Physical-order movement used by [`IsamEngine::btr_step`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum StepMode {
    /// Lowest record number.
    First,
    /// Highest record number.
    Last,
    /// Successor of the current record.
    Next,
    /// Predecessor of the current record.
    Prev,
}

#[derive(Clone, Debug)]
struct IndexEntry {
    key: Vec<u8>,
    recno: u32,
}

#[derive(Clone, Debug, Default)]
struct FileData {
    records: BTreeMap<u32, Vec<u8>>,
    keys: Vec<Vec<IndexEntry>>,
    next_recno: u32,
    autoinc: Vec<u64>,
}

#[derive(Clone, Debug)]
struct Position {
    recno: u32,
    idx: Option<usize>,
    key: Vec<u8>,
    live: bool,
}

struct Cursor {
    path: String,
    mode: OpenMode,
    pos: Option<Position>,
}

struct IsamFile {
    spec: TableSpec,
    fields: FieldList,
    indexes: IndexList,
    temporary: bool,
    data: FileData,
    locks: HashMap<u32, u32>,
    openers: usize,
    exclusive: Option<u32>,
    owner: Vec<u8>,
}

fn fail(code: EngineStatus, op: &'static str) -> DbError {
    DbError::engine(code, op)
}

fn read_le(src: &[u8]) -> u64 {
    let mut raw = [0u8; 8];
    let n = src.len().min(8);
    raw[..n].copy_from_slice(&src[..n]);
    u64::from_le_bytes(raw)
}

fn padded(key: &[u8], size: usize) -> Vec<u8> {
    let mut out = vec![0u8; size];
    let n = key.len().min(size);
    out[..n].copy_from_slice(&key[..n]);
    out
}

fn copy_clamped(dst: &mut [u8], src: &[u8]) {
    let n = dst.len().min(src.len());
    dst[..n].copy_from_slice(&src[..n]);
}

impl IsamFile {
    fn new(spec: &TableSpec, temporary: bool) -> Result<Self> {
        let (fields, indexes) = spec.build()?;
        let data = FileData {
            records: BTreeMap::new(),
            keys: vec![Vec::new(); indexes.num_keys()],
            next_recno: 1,
            autoinc: vec![0; fields.len()],
        };
        Ok(Self {
            spec: spec.clone(),
            fields,
            indexes,
            temporary,
            data,
            locks: HashMap::new(),
            openers: 0,
            exclusive: None,
            owner: Vec::new(),
        })
    }

    fn cmp_key(&self, idx: usize, a: &[u8], b: &[u8]) -> Ordering {
        self.indexes.compare_keys(idx, &self.fields, a, b)
    }

    fn lower_bound(&self, idx: usize, target: &[u8]) -> usize {
        self.data.keys[idx].partition_point(|e| self.cmp_key(idx, &e.key, target) == Ordering::Less)
    }

    fn upper_bound(&self, idx: usize, target: &[u8]) -> usize {
        self.data.keys[idx]
            .partition_point(|e| self.cmp_key(idx, &e.key, target) != Ordering::Greater)
    }

    fn locate(&self, idx: usize, key: &[u8], recno: u32) -> usize {
        self.data.keys[idx].partition_point(|e| {
            self.cmp_key(idx, &e.key, key).then(e.recno.cmp(&recno)) == Ordering::Less
        })
    }

    fn index_insert(&mut self, recno: u32, rec: &[u8]) -> Result<()> {
        for idx in 0..self.indexes.num_keys() {
            let key = self.indexes.extract_key(idx, &self.fields, rec)?;
            let at = self.locate(idx, &key, recno);
            self.data.keys[idx].insert(at, IndexEntry { key, recno });
        }
        Ok(())
    }

    fn index_remove(&mut self, recno: u32, rec: &[u8]) -> Result<()> {
        for idx in 0..self.indexes.num_keys() {
            let key = self.indexes.extract_key(idx, &self.fields, rec)?;
            let at = self.locate(idx, &key, recno);
            if self.data.keys[idx].get(at).is_some_and(|e| e.recno == recno) {
                self.data.keys[idx].remove(at);
            }
        }
        Ok(())
    }

    fn check_unique(&self, rec: &[u8], except: Option<u32>, op: &'static str) -> Result<()> {
        for (idx, def) in self.indexes.iter().enumerate() {
            if def.allows_duplicates() {
                continue;
            }
            let key = self.indexes.extract_key(idx, &self.fields, rec)?;
            let clash = self.data.keys[idx][self.lower_bound(idx, &key)..]
                .iter()
                .take_while(|e| self.cmp_key(idx, &e.key, &key) == Ordering::Equal)
                .any(|e| Some(e.recno) != except);
            if clash {
                return Err(fail(EngineStatus::DUPLICATE_KEY, op));
            }
        }
        Ok(())
    }

    /// Fills zero auto-increment fields of `row`; returns the counters to
    /// commit once the insert succeeds.
    fn assign_autoinc(&self, row: &mut [u8]) -> Vec<(usize, u64)> {
        let mut updates = Vec::new();
        for (n, f) in self.fields.iter().enumerate() {
            if f.kind != FieldKind::AutoInc {
                continue;
            }
            let slot = &mut row[f.range()];
            let current = read_le(slot);
            if current == 0 {
                let next = self.data.autoinc[n] + 1;
                let bytes = next.to_le_bytes();
                let width = slot.len().min(8);
                slot[..width].copy_from_slice(&bytes[..width]);
                updates.push((n, next));
            } else if current > self.data.autoinc[n] {
                updates.push((n, current));
            }
        }
        updates
    }

    fn record(&self, recno: u32, op: &'static str) -> Result<&[u8]> {
        self.data
            .records
            .get(&recno)
            .map(Vec::as_slice)
            .ok_or(fail(EngineStatus::INVALID_RECORD_ADDRESS, op))
    }

    fn check_lock(&self, recno: u32, cursor: u32, op: &'static str) -> Result<()> {
        match self.locks.get(&recno) {
            Some(owner) if *owner != cursor => Err(fail(EngineStatus::RECORD_LOCKED, op)),
            _ => Ok(()),
        }
    }

    fn take_lock(&mut self, recno: u32, cursor: u32, op: &'static str) -> Result<()> {
        self.check_lock(recno, cursor, op)?;
        self.locks.insert(recno, cursor);
        Ok(())
    }

    fn release_locks(&mut self, cursor: u32) {
        self.locks.retain(|_, owner| *owner != cursor);
    }

    /// Key and record number that `Next`/`Prev` on `idx` start from.
    fn anchor(&self, pos: &Position, idx: usize, op: &'static str) -> Result<(Vec<u8>, u32)> {
        if pos.idx == Some(idx) {
            return Ok((pos.key.clone(), pos.recno));
        }
        if !pos.live {
            return Err(fail(EngineStatus::INVALID_POSITIONING, op));
        }
        let rec = self.record(pos.recno, op)?;
        Ok((self.indexes.extract_key(idx, &self.fields, rec)?, pos.recno))
    }

    fn writable(&self, cursor: &Cursor, op: &'static str) -> Result<()> {
        if cursor.mode == OpenMode::ReadOnly {
            return Err(fail(EngineStatus::ACCESS_DENIED, op));
        }
        Ok(())
    }
}

#[derive(Default)]
struct EngineState {
    files: HashMap<String, IsamFile>,
    cursors: HashMap<u32, Cursor>,
    next_cursor: u32,
    snapshot: Option<HashMap<String, FileData>>,
}

/// In-memory indexed-sequential engine.
///
/// All state sits behind one mutex; the engine can be shared between
/// backends with an `Arc`.
#[derive(Default)]
pub struct IsamEngine {
    state: Mutex<EngineState>,
}

impl IsamEngine {
    /// Creates an engine with no files.
    pub fn new() -> Self {
        Self::default()
    }

    fn with_file<T>(
        &self,
        file: FileId,
        op: &'static str,
        f: impl FnOnce(&mut Cursor, &mut IsamFile) -> Result<T>,
    ) -> Result<T> {
        let mut st = self.state.lock();
        let EngineState { files, cursors, .. } = &mut *st;
        let cursor = cursors
            .get_mut(&file.0)
            .ok_or(fail(EngineStatus::FILE_NOT_OPEN, op))?;
        let isam = files
            .get_mut(&cursor.path)
            .ok_or(fail(EngineStatus::FILE_NOT_OPEN, op))?;
        f(cursor, isam)
    }

    /// Runs `f`, retrying lock conflicts up to `tries` more times with the
    /// engine mutex released in between.
    fn with_file_retry<T>(
        &self,
        file: FileId,
        op: &'static str,
        tries: i32,
        mut f: impl FnMut(&mut Cursor, &mut IsamFile) -> Result<T>,
    ) -> Result<T> {
        let mut left = tries.max(0);
        loop {
            match self.with_file(file, op, &mut f) {
                Err(err) if err.status() == Some(EngineStatus::RECORD_LOCKED) && left > 0 => {
                    left -= 1;
                    trace!(file = file.0, left, "isam.lock.retry");
                    thread::sleep(LOCK_RETRY_DELAY);
                }
                res => return res,
            }
        }
    }

    /// Returns true when a file exists at `path`.
    pub fn btr_exists(&self, path: &str) -> bool {
        self.state.lock().files.contains_key(path)
    }

    /// Creates an empty file shaped by `spec`.
    pub fn btr_create(&self, path: &str, spec: &TableSpec, temporary: bool) -> Result<()> {
        let mut st = self.state.lock();
        if st.files.contains_key(path) {
            return Err(fail(EngineStatus::FILE_EXISTS, "create"));
        }
        let file = IsamFile::new(spec, temporary)?;
        st.files.insert(path.to_string(), file);
        debug!(path, table = %spec.name, temporary, "isam.create");
        Ok(())
    }

    /// Drops the file at `path`; fails while it is open.
    pub fn btr_remove(&self, path: &str) -> Result<()> {
        let mut st = self.state.lock();
        match st.files.get(path) {
            None => Err(fail(EngineStatus::FILE_NOT_FOUND, "remove")),
            Some(f) if f.openers > 0 => Err(fail(EngineStatus::FILE_IN_USE, "remove")),
            Some(_) => {
                st.files.remove(path);
                if let Some(snap) = st.snapshot.as_mut() {
                    snap.remove(path);
                }
                debug!(path, "isam.remove");
                Ok(())
            }
        }
    }

    /// Schema embedded in the file at `path`, with the file name filled in.
    pub fn btr_file_spec(&self, path: &str) -> Result<TableSpec> {
        let st = self.state.lock();
        let file = st
            .files
            .get(path)
            .ok_or(fail(EngineStatus::FILE_NOT_FOUND, "file_spec"))?;
        let mut spec = file.spec.clone();
        spec.file_name = Some(path.to_string());
        Ok(spec)
    }

    /// Sets the owner bytes every later open of `path` must present. An
    /// empty owner clears the guard.
    pub fn btr_set_owner(&self, path: &str, owner: &[u8]) -> Result<()> {
        let mut st = self.state.lock();
        let file = st
            .files
            .get_mut(path)
            .ok_or(fail(EngineStatus::FILE_NOT_FOUND, "set_owner"))?;
        file.owner = owner.to_vec();
        debug!(path, guarded = !owner.is_empty(), "isam.owner.set");
        Ok(())
    }

    /// Opens `path` and returns a fresh cursor. `owner` must match the
    /// file's owner bytes when it has any.
    pub fn btr_open(&self, path: &str, mode: OpenMode, owner: &[u8]) -> Result<FileId> {
        let mut st = self.state.lock();
        let id = st.next_cursor + 1;
        let file = st
            .files
            .get_mut(path)
            .ok_or(fail(EngineStatus::FILE_NOT_FOUND, "open"))?;
        if !file.owner.is_empty() && file.owner != owner {
            return Err(fail(EngineStatus::INVALID_OWNER, "open"));
        }
        if file.exclusive.is_some() || (mode == OpenMode::Exclusive && file.openers > 0) {
            return Err(fail(EngineStatus::FILE_IN_USE, "open"));
        }
        file.openers += 1;
        if mode == OpenMode::Exclusive {
            file.exclusive = Some(id);
        }
        st.next_cursor = id;
        st.cursors.insert(
            id,
            Cursor {
                path: path.to_string(),
                mode,
                pos: None,
            },
        );
        debug!(path, cursor = id, ?mode, "isam.open");
        Ok(FileId(id))
    }

    /// Closes a cursor and releases its locks.
    pub fn btr_close(&self, file: FileId) -> Result<()> {
        let mut st = self.state.lock();
        let cursor = st
            .cursors
            .remove(&file.0)
            .ok_or(fail(EngineStatus::FILE_NOT_OPEN, "close"))?;
        if let Some(isam) = st.files.get_mut(&cursor.path) {
            isam.release_locks(file.0);
            isam.openers = isam.openers.saturating_sub(1);
            if isam.exclusive == Some(file.0) {
                isam.exclusive = None;
            }
        }
        debug!(path = %cursor.path, cursor = file.0, "isam.close");
        Ok(())
    }

    /// Inserts a record and makes it current.
    pub fn btr_insert(&self, file: FileId, rec: &mut [u8]) -> Result<RowId> {
        const OP: &str = "insert";
        self.with_file(file, OP, |cur, isam| {
            isam.writable(cur, OP)?;
            let size = isam.fields.rec_size();
            if rec.len() < size {
                return Err(fail(EngineStatus::BUFFER_TOO_SHORT, OP));
            }
            let mut row = rec[..size].to_vec();
            let counters = isam.assign_autoinc(&mut row);
            isam.check_unique(&row, None, OP)?;
            for (n, v) in counters {
                isam.data.autoinc[n] = v;
            }
            let recno = isam.data.next_recno;
            isam.data.next_recno += 1;
            isam.index_insert(recno, &row)?;
            rec[..size].copy_from_slice(&row);
            isam.data.records.insert(recno, row);
            cur.pos = Some(Position {
                recno,
                idx: None,
                key: Vec::new(),
                live: true,
            });
            trace!(file = file.0, recno, "isam.insert");
            Ok(RowId::from_record_number(recno))
        })
    }

    /// Rewrites the current record.
    pub fn btr_update(&self, file: FileId, rec: &[u8], keep_currency: bool) -> Result<()> {
        const OP: &str = "update";
        self.with_file(file, OP, |cur, isam| {
            isam.writable(cur, OP)?;
            let pos = cur
                .pos
                .as_mut()
                .filter(|p| p.live)
                .ok_or(fail(EngineStatus::INVALID_POSITIONING, OP))?;
            let size = isam.fields.rec_size();
            if rec.len() < size {
                return Err(fail(EngineStatus::BUFFER_TOO_SHORT, OP));
            }
            let recno = pos.recno;
            isam.check_lock(recno, file.0, OP)?;
            let row = rec[..size].to_vec();
            isam.check_unique(&row, Some(recno), OP)?;
            let old = isam.record(recno, OP)?.to_vec();
            isam.index_remove(recno, &old)?;
            isam.index_insert(recno, &row)?;
            if !keep_currency {
                if let Some(idx) = pos.idx {
                    pos.key = isam.indexes.extract_key(idx, &isam.fields, &row)?;
                }
            }
            isam.data.records.insert(recno, row);
            isam.locks.remove(&recno);
            trace!(file = file.0, recno, keep_currency, "isam.update");
            Ok(())
        })
    }

    /// Deletes the current record. Currency survives for `Next`/`Prev`.
    pub fn btr_delete(&self, file: FileId) -> Result<()> {
        const OP: &str = "delete";
        self.with_file(file, OP, |cur, isam| {
            isam.writable(cur, OP)?;
            let pos = cur
                .pos
                .as_mut()
                .filter(|p| p.live)
                .ok_or(fail(EngineStatus::INVALID_POSITIONING, OP))?;
            let recno = pos.recno;
            isam.check_lock(recno, file.0, OP)?;
            let old = isam
                .data
                .records
                .remove(&recno)
                .ok_or(fail(EngineStatus::INVALID_RECORD_ADDRESS, OP))?;
            isam.index_remove(recno, &old)?;
            isam.locks.remove(&recno);
            pos.live = false;
            trace!(file = file.0, recno, "isam.delete");
            Ok(())
        })
    }

    /// Key-ordered positioning on index `idx`.
    pub fn btr_get(
        &self,
        file: FileId,
        idx: usize,
        key: &mut [u8],
        mode: SearchMode,
        flags: SearchFlags,
        rec: &mut [u8],
    ) -> Result<RowId> {
        const OP: &str = "search";
        self.with_file_retry(file, OP, flags.wait_tries, |cur, isam| {
            if idx >= isam.indexes.num_keys() {
                return Err(fail(EngineStatus::INVALID_KEY_NUMBER, OP));
            }
            let size = isam.fields.rec_size();
            if !flags.key_only && rec.len() < size {
                return Err(fail(EngineStatus::BUFFER_TOO_SHORT, OP));
            }
            let len = isam.data.keys[idx].len();
            let at = match mode {
                SearchMode::First => (len > 0).then_some(0),
                SearchMode::Last => len.checked_sub(1),
                SearchMode::Next | SearchMode::Prev => {
                    let pos = cur
                        .pos
                        .as_ref()
                        .ok_or(fail(EngineStatus::INVALID_POSITIONING, OP))?;
                    let (k, r) = isam.anchor(pos, idx, OP)?;
                    let p = isam.locate(idx, &k, r);
                    let exact = isam.data.keys[idx].get(p).is_some_and(|e| {
                        e.recno == r && isam.cmp_key(idx, &e.key, &k) == Ordering::Equal
                    });
                    if mode == SearchMode::Next {
                        let n = if exact { p + 1 } else { p };
                        (n < len).then_some(n)
                    } else {
                        p.checked_sub(1)
                    }
                }
                _ => {
                    let target = padded(key, isam.indexes.key_size(idx, &isam.fields));
                    match mode {
                        SearchMode::Equal => {
                            let lo = isam.lower_bound(idx, &target);
                            isam.data.keys[idx]
                                .get(lo)
                                .filter(|e| isam.cmp_key(idx, &e.key, &target) == Ordering::Equal)
                                .map(|_| lo)
                        }
                        SearchMode::GreaterOrEqual => {
                            Some(isam.lower_bound(idx, &target)).filter(|n| *n < len)
                        }
                        SearchMode::Greater => {
                            Some(isam.upper_bound(idx, &target)).filter(|n| *n < len)
                        }
                        SearchMode::Less => isam.lower_bound(idx, &target).checked_sub(1),
                        _ => isam.upper_bound(idx, &target).checked_sub(1),
                    }
                }
            };
            let Some(at) = at else {
                let code = if mode == SearchMode::Equal {
                    EngineStatus::KEY_NOT_FOUND
                } else {
                    EngineStatus::END_OF_FILE
                };
                return Err(fail(code, OP));
            };
            let entry = isam.data.keys[idx][at].clone();
            if flags.lock {
                isam.take_lock(entry.recno, file.0, OP)?;
            }
            copy_clamped(key, &entry.key);
            if !flags.key_only {
                rec[..size].copy_from_slice(isam.record(entry.recno, OP)?);
            }
            trace!(file = file.0, idx, ?mode, recno = entry.recno, "isam.get");
            cur.pos = Some(Position {
                recno: entry.recno,
                idx: Some(idx),
                key: entry.key,
                live: true,
            });
            Ok(RowId::from_record_number(entry.recno))
        })
    }

    /// Physical-order positioning.
    pub fn btr_step(
        &self,
        file: FileId,
        mode: StepMode,
        flags: SearchFlags,
        rec: &mut [u8],
    ) -> Result<RowId> {
        const OP: &str = "step";
        self.with_file_retry(file, OP, flags.wait_tries, |cur, isam| {
            let size = isam.fields.rec_size();
            if rec.len() < size {
                return Err(fail(EngineStatus::BUFFER_TOO_SHORT, OP));
            }
            let records = &isam.data.records;
            let found = match mode {
                StepMode::First => records.keys().next().copied(),
                StepMode::Last => records.keys().next_back().copied(),
                StepMode::Next | StepMode::Prev => {
                    let from = cur
                        .pos
                        .as_ref()
                        .ok_or(fail(EngineStatus::INVALID_POSITIONING, OP))?
                        .recno;
                    if mode == StepMode::Next {
                        records.range(from.saturating_add(1)..).next().map(|(k, _)| *k)
                    } else {
                        records.range(..from).next_back().map(|(k, _)| *k)
                    }
                }
            };
            let recno = found.ok_or(fail(EngineStatus::END_OF_FILE, OP))?;
            if flags.lock {
                isam.take_lock(recno, file.0, OP)?;
            }
            rec[..size].copy_from_slice(isam.record(recno, OP)?);
            cur.pos = Some(Position {
                recno,
                idx: None,
                key: Vec::new(),
                live: true,
            });
            Ok(RowId::from_record_number(recno))
        })
    }

    /// Fetches the record at `pos`, establishing currency on `idx` when the
    /// file has indexes.
    pub fn btr_get_direct(
        &self,
        file: FileId,
        idx: usize,
        pos: RowId,
        key: &mut [u8],
        flags: SearchFlags,
        rec: &mut [u8],
    ) -> Result<()> {
        const OP: &str = "get_direct";
        self.with_file_retry(file, OP, flags.wait_tries, |cur, isam| {
            if pos.is_long() {
                return Err(fail(EngineStatus::INVALID_RECORD_ADDRESS, OP));
            }
            let recno = pos.record_number();
            let size = isam.fields.rec_size();
            if rec.len() < size {
                return Err(fail(EngineStatus::BUFFER_TOO_SHORT, OP));
            }
            let row = isam.record(recno, OP)?;
            let keyed = if isam.indexes.num_keys() == 0 {
                None
            } else if idx >= isam.indexes.num_keys() {
                return Err(fail(EngineStatus::INVALID_KEY_NUMBER, OP));
            } else {
                Some(isam.indexes.extract_key(idx, &isam.fields, row)?)
            };
            if flags.lock {
                isam.take_lock(recno, file.0, OP)?;
            }
            rec[..size].copy_from_slice(isam.record(recno, OP)?);
            if let Some(k) = keyed.as_deref() {
                copy_clamped(key, k);
            }
            cur.pos = Some(Position {
                recno,
                idx: keyed.as_ref().map(|_| idx),
                key: keyed.unwrap_or_default(),
                live: true,
            });
            Ok(())
        })
    }

    /// Address of the current record.
    pub fn btr_get_position(&self, file: FileId) -> Result<RowId> {
        const OP: &str = "get_position";
        self.with_file(file, OP, |cur, _| {
            cur.pos
                .as_ref()
                .filter(|p| p.live)
                .map(|p| RowId::from_record_number(p.recno))
                .ok_or(fail(EngineStatus::INVALID_POSITIONING, OP))
        })
    }

    /// File statistics restricted to `items`.
    pub fn btr_stat(&self, file: FileId, items: StatItems) -> Result<TableStat> {
        self.with_file(file, "stat", |_, isam| {
            let mut stat = TableStat::default();
            if items.contains(StatItems::RECORDS) {
                stat.records = isam.data.records.len() as u64;
            }
            if items.contains(StatItems::REC_SIZE) {
                stat.rec_size = isam.fields.rec_size() as u32;
            }
            if items.contains(StatItems::PAGE_SIZE) {
                stat.page_size = isam.spec.page_size;
            }
            if items.contains(StatItems::KEYS) {
                stat.keys = isam.indexes.num_keys() as u32;
            }
            if items.contains(StatItems::FLAGS) {
                if isam.temporary {
                    stat.flags |= FILE_FLAG_TEMPORARY;
                }
                if isam.indexes.iter().any(|k| k.allows_duplicates()) {
                    stat.flags |= FILE_FLAG_DUP_KEYS;
                }
            }
            Ok(stat)
        })
    }

    /// Releases the row locks held by `file`.
    pub fn btr_unlock(&self, file: FileId) -> Result<()> {
        self.with_file(file, "unlock", |_, isam| {
            isam.release_locks(file.0);
            Ok(())
        })
    }

    /// Returns true while a transaction is active.
    pub fn btr_in_transaction(&self) -> bool {
        self.state.lock().snapshot.is_some()
    }

    /// Starts a transaction by snapshotting every file.
    pub fn btr_begin(&self) -> Result<()> {
        let mut st = self.state.lock();
        if st.snapshot.is_some() {
            return Err(DbError::Invalid("transaction already active"));
        }
        let snap = st
            .files
            .iter()
            .map(|(path, f)| (path.clone(), f.data.clone()))
            .collect();
        st.snapshot = Some(snap);
        debug!("isam.tx.begin");
        Ok(())
    }

    /// Commits the active transaction.
    pub fn btr_end(&self) -> Result<()> {
        let mut st = self.state.lock();
        st.snapshot
            .take()
            .ok_or(DbError::Invalid("no active transaction"))?;
        for f in st.files.values_mut() {
            f.locks.clear();
        }
        debug!("isam.tx.commit");
        Ok(())
    }

    /// Rolls every file back to the snapshot taken at begin.
    pub fn btr_abort(&self) -> Result<()> {
        let mut st = self.state.lock();
        let snap = st
            .snapshot
            .take()
            .ok_or(DbError::Invalid("no active transaction"))?;
        for (path, data) in snap {
            if let Some(f) = st.files.get_mut(&path) {
                f.data = data;
            }
        }
        for f in st.files.values_mut() {
            f.locks.clear();
        }
        for cur in st.cursors.values_mut() {
            cur.pos = None;
        }
        debug!("isam.tx.abort");
        Ok(())
    }
}
