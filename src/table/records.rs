use tracing::trace;

use super::{track, RecordTable};
use crate::error::Result;
use crate::session;
use crate::storage::backend::{SearchFlags, SearchMode};
use crate::types::RowId;

impl RecordTable {
    fn update_flags(&self) -> SearchFlags {
        let config = session::config();
        if config.locking_disabled() {
            SearchFlags::default()
        } else {
            SearchFlags::for_update(config.wait_lock_tries)
        }
    }

    fn search_with(
        &mut self,
        idx: usize,
        key: &mut [u8],
        mode: SearchMode,
        flags: SearchFlags,
    ) -> Result<RowId> {
        let file = self.file()?;
        let rec = &mut self.buf[..self.buf_len];
        let pos = track(self.backend.search(file, idx, key, mode, flags, rec))?;
        if !flags.key_only {
            self.lobs.clear_values();
        }
        self.position = pos;
        self.cur_index = idx;
        trace!(table = %self.table_name, idx, ?mode, %pos, "table.search");
        Ok(pos)
    }

    /// Positions on index `idx` and loads the record.
    pub fn search(&mut self, idx: usize, key: &mut [u8], mode: SearchMode) -> Result<RowId> {
        self.search_with(idx, key, mode, SearchFlags::default())
    }

    /// [`RecordTable::search`] on the index used by the last positioning.
    pub fn search_current(&mut self, key: &mut [u8], mode: SearchMode) -> Result<RowId> {
        self.search(self.cur_index, key, mode)
    }

    /// Locking search; without locking configured this is a plain search.
    pub fn search_for_update(
        &mut self,
        idx: usize,
        key: &mut [u8],
        mode: SearchMode,
    ) -> Result<RowId> {
        let flags = self.update_flags();
        self.search_with(idx, key, mode, flags)
    }

    /// Positions and returns the key only; the record buffer is untouched.
    pub fn search_key(&mut self, idx: usize, key: &mut [u8], mode: SearchMode) -> Result<RowId> {
        let flags = SearchFlags {
            key_only: true,
            ..SearchFlags::default()
        };
        self.search_with(idx, key, mode, flags)
    }

    fn get_direct_with(
        &mut self,
        idx: usize,
        key: &mut [u8],
        pos: RowId,
        flags: SearchFlags,
    ) -> Result<()> {
        let file = self.file()?;
        let rec = &mut self.buf[..self.buf_len];
        track(self.backend.get_direct(file, idx, pos, key, flags, rec))?;
        self.lobs.clear_values();
        self.position = pos;
        self.cur_index = idx;
        Ok(())
    }

    /// Loads the record at `pos` and makes `idx` the current index.
    pub fn get_direct(&mut self, idx: usize, key: &mut [u8], pos: RowId) -> Result<()> {
        self.get_direct_with(idx, key, pos, SearchFlags::default())
    }

    /// Locking [`RecordTable::get_direct`].
    pub fn get_direct_for_update(&mut self, idx: usize, key: &mut [u8], pos: RowId) -> Result<()> {
        let flags = self.update_flags();
        self.get_direct_with(idx, key, pos, flags)
    }

    /// Re-fetches the current record under a row lock.
    ///
    /// Returns `Ok(false)` without touching the engine when record locking
    /// is disabled for the session.
    pub fn reread_for_update(&mut self, idx: usize, key: &mut [u8]) -> Result<bool> {
        if session::config().locking_disabled() {
            return Ok(false);
        }
        let pos = self.get_position()?;
        self.get_direct_for_update(idx, key, pos)?;
        Ok(true)
    }

    /// Address of the current record, cached afterwards.
    pub fn get_position(&mut self) -> Result<RowId> {
        let pos = track(self.backend.get_position(self.file()?))?;
        self.position = pos;
        Ok(pos)
    }

    /// Releases row locks held by this table.
    pub fn unlock(&self) -> Result<()> {
        track(self.backend.unlock(self.file()?))
    }

    /// Inserts the record buffer.
    pub fn insert_rec(&mut self) -> Result<RowId> {
        self.report_out_of_transaction("insert");
        let file = self.file()?;
        let rec = &mut self.buf[..self.buf_len];
        let pos = track(self.backend.insert_rec(file, rec))?;
        self.position = pos;
        trace!(table = %self.table_name, %pos, "table.insert");
        Ok(pos)
    }

    /// Inserts and then builds the key of index `idx` into `key`.
    pub fn insert_rec_with_key(&mut self, idx: usize, key: &mut [u8]) -> Result<RowId> {
        let pos = self.insert_rec()?;
        self.copy_buffer_to_key(idx, key)?;
        Ok(pos)
    }

    /// Copies `data` into the buffer and inserts it.
    pub fn insert_rec_buf(&mut self, data: &[u8]) -> Result<RowId> {
        self.copy_buf_from(data)?;
        self.insert_rec()
    }

    fn update_with(&mut self, keep_currency: bool) -> Result<()> {
        self.report_out_of_transaction("update");
        let file = self.file()?;
        track(
            self.backend
                .update_rec(file, &self.buf[..self.buf_len], keep_currency),
        )
    }

    /// Rewrites the current record from the buffer.
    pub fn update_rec(&mut self) -> Result<()> {
        self.update_with(false)
    }

    /// Rewrites the current record without moving the scan position.
    pub fn update_rec_ncc(&mut self) -> Result<()> {
        self.update_with(true)
    }

    /// Copies `data` into the buffer and rewrites the current record.
    pub fn update_rec_buf(&mut self, data: &[u8]) -> Result<()> {
        self.copy_buf_from(data)?;
        self.update_rec()
    }

    /// Deletes the current record.
    pub fn delete_rec(&mut self) -> Result<()> {
        self.report_out_of_transaction("delete");
        track(self.backend.delete_rec(self.file()?))
    }

    /// Deletes every record accepted by `predicate`, optionally inside a
    /// transaction of its own. Returns the number deleted.
    pub fn delete_by_query(
        &mut self,
        use_tx: bool,
        mut predicate: impl FnMut(&[u8]) -> bool,
    ) -> Result<usize> {
        self.report_out_of_transaction("delete_from");
        let file = self.file()?;
        track(self.backend.delete_from(file, use_tx, &mut predicate))
    }
}
