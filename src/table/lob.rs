use tracing::trace;

use super::{RecordTable, TableState};
use crate::error::{DbError, Result};
use crate::primitives::bytes::ByteStream;
use crate::schema::FieldKind;
use crate::storage::lob::{LobLookup, LobRegistry, LobTransfer};

impl RecordTable {
    /// LOB registry of the current layout.
    pub fn lobs(&self) -> &LobRegistry {
        &self.lobs
    }

    /// Number of LOB fields.
    pub fn lob_count(&self) -> usize {
        self.lobs.len()
    }

    /// Field position of the `n`-th LOB field.
    pub fn lob_field(&self, n: usize) -> Option<usize> {
        self.lobs.get(n).map(|d| d.field)
    }

    /// Sets the logical size of LOB field `fld`.
    pub fn set_lob_size(&mut self, fld: usize, size: usize) -> LobLookup {
        self.lobs.set_size(fld, size)
    }

    /// Logical size of LOB field `fld`.
    pub fn lob_size(&self, fld: usize) -> Option<usize> {
        self.lobs.size(fld)
    }

    /// Stores the backend location token of LOB field `fld`.
    pub fn set_lob_location(&mut self, fld: usize, loc: u32) -> LobLookup {
        self.lobs.set_location(fld, loc)
    }

    /// Backend location token of LOB field `fld`.
    pub fn lob_location(&self, fld: usize) -> Option<u32> {
        self.lobs.location(fld)
    }

    /// Returns true when the layout has LOB fields; with `check_last` the
    /// last field must also be one.
    pub fn has_lob(&self, check_last: bool) -> bool {
        self.state.contains(TableState::HAS_LOB)
            && (!check_last || self.last_field_kind().is_some_and(FieldKind::is_lob))
    }

    /// Returns true when the layout has a NOTE field; with `check_last` the
    /// last field must also be one.
    pub fn has_note(&self, check_last: bool) -> bool {
        self.state.contains(TableState::HAS_NOTE)
            && (!check_last || self.last_field_kind() == Some(FieldKind::Note))
    }

    fn last_field_kind(&self) -> Option<FieldKind> {
        self.fields.len().checked_sub(1).and_then(|n| self.fields.get(n)).map(|f| f.kind)
    }

    /// Current payload of LOB field `fld`, cut to its logical size.
    pub fn read_lob_data(&self, fld: usize) -> Result<&[u8]> {
        let pos = self
            .lobs
            .search(fld)
            .position()
            .ok_or(DbError::Invalid("field is not a LOB"))?;
        let desc = self
            .lobs
            .get(pos)
            .ok_or(DbError::Invalid("field is not a LOB"))?;
        let cell = desc.cell();
        let data = if let Some(ptr) = cell.ptr_data() {
            ptr
        } else if cell.is_structured() {
            &[]
        } else {
            self.field_value(fld).unwrap_or(&[])
        };
        Ok(&data[..desc.size.min(data.len())])
    }

    /// Stores `data` as the value of LOB field `fld`.
    ///
    /// Payloads up to the flat size stay in the record unless
    /// `force_canonical` asks for an owned allocation; larger ones always
    /// move to one.
    pub fn write_lob_data(&mut self, fld: usize, data: &[u8], force_canonical: bool) -> Result<()> {
        let len = data.len();
        let mut slot = self
            .lobs
            .slot(fld, &self.fields, &mut self.buf[..self.buf_len])
            .ok_or(DbError::Invalid("field is not a LOB"))?;
        let flat_size = slot.flat_size();
        if len > flat_size || (force_canonical && len > 0) {
            if let Err(err) = slot.init_ptr(len) {
                drop(slot);
                self.lobs.set_size(fld, 0);
                return Err(err);
            }
        } else {
            slot.init(0);
        }
        if let Some(dst) = slot.raw_data_mut() {
            dst[..len].copy_from_slice(data);
        }
        let is_ptr = slot.cell().is_ptr();
        drop(slot);
        self.lobs.set_size(fld, len);
        trace!(fld, len, is_ptr, "table.lob.write");
        Ok(())
    }

    /// Moves the value of `fld` into an owned allocation through a staging
    /// copy. Returns false when it already was one.
    pub fn canonicalize_lob(&mut self, fld: usize) -> Result<bool> {
        if self.lobs.cell(fld).is_some_and(|c| c.is_ptr()) {
            return Ok(false);
        }
        let mut staging = std::mem::take(&mut self.lob_staging);
        staging.clear();
        let result = self.read_lob_data(fld).and_then(|current| {
            staging
                .try_reserve(current.len())
                .map_err(|_| DbError::Alloc {
                    size: current.len(),
                })?;
            staging.extend_from_slice(current);
            Ok(())
        });
        let result = result.and_then(|()| self.write_lob_data(fld, &staging, true));
        self.lob_staging = staging;
        result.map(|()| true)
    }

    /// Moves every LOB payload out of the record into the spill buffer.
    pub fn store_and_trim_lob(&mut self) -> Result<LobTransfer> {
        self.lobs.spill(&self.fields, &mut self.buf[..self.buf_len])
    }

    /// Reloads LOB payloads from the spill buffer into the record.
    pub fn restore_lob(&mut self) -> Result<LobTransfer> {
        self.lobs.restore(&self.fields, &mut self.buf[..self.buf_len])
    }

    /// Spill buffer.
    pub fn lob_storage(&self) -> &ByteStream {
        self.lobs.storage()
    }

    /// Takes the spill buffer to carry it alongside the record.
    pub fn take_lob_storage(&mut self) -> ByteStream {
        self.lobs.take_storage()
    }

    /// Installs a spill buffer received alongside the record.
    pub fn set_lob_storage(&mut self, storage: ByteStream) {
        self.lobs.set_storage(storage);
    }
}
