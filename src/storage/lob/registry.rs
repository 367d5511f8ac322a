#![forbid(unsafe_code)]

use tracing::{debug, trace, warn};

use super::cell::{LobCell, LobSlot, LobTag};
use crate::error::{DbError, Result};
use crate::primitives::bytes::ByteStream;
use crate::schema::{FieldKind, FieldList};
use crate::storage::ser::Dir;

/// Outcome of [`LobRegistry::search`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LobLookup {
    /// Field is LOB-bearing; position inside the registry.
    Found(usize),
    /// Registry has descriptors but none for this field.
    NotFound,
    /// Registry has no descriptors at all.
    Empty,
}

impl LobLookup {
    /// Position when found.
    pub fn position(self) -> Option<usize> {
        match self {
            LobLookup::Found(pos) => Some(pos),
            _ => None,
        }
    }
}

/// Result of a spill or restore pass.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LobTransfer {
    /// Table has no LOB fields.
    NotApplicable,
    /// Pass ran but no field carried a payload.
    Nothing,
    /// At least one payload moved.
    Moved,
}

/// Per-field LOB state for the current record.
#[derive(Clone, Debug, Default)]
pub struct LobDescriptor {
    /// Field position in the table's field list.
    pub field: usize,
    /// Current logical payload size.
    pub size: usize,
    /// Opaque location token supplied by the backend.
    pub loc: u32,
    /// Format chosen by the last spill.
    pub tag: LobTag,
    cell: LobCell,
}

impl LobDescriptor {
    fn new(field: usize) -> Self {
        Self {
            field,
            ..Self::default()
        }
    }

    /// Value cell for this field.
    pub fn cell(&self) -> &LobCell {
        &self.cell
    }
}

/// Schema traits discovered while scanning a field list.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct FieldScan {
    /// At least one BLOB/CLOB field.
    pub has_lob: bool,
    /// At least one NOTE field.
    pub has_note: bool,
    /// At least one auto-increment field.
    pub has_autoinc: bool,
}

/// Collection of LOB descriptors for one table plus the spill buffer.
#[derive(Debug, Default)]
pub struct LobRegistry {
    items: Vec<LobDescriptor>,
    storage: ByteStream,
}

impl LobRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds descriptors from `fields`, one per BLOB/CLOB field in field
    /// order.
    pub fn rebuild(&mut self, fields: &FieldList) -> FieldScan {
        self.clear();
        let mut scan = FieldScan::default();
        for (n, f) in fields.iter().enumerate() {
            match f.kind {
                FieldKind::Blob | FieldKind::Clob => {
                    self.items.push(LobDescriptor::new(n));
                    scan.has_lob = true;
                }
                FieldKind::Note => scan.has_note = true,
                FieldKind::AutoInc => scan.has_autoinc = true,
                _ => {}
            }
        }
        debug!(lobs = self.items.len(), "lob.registry.rebuild");
        scan
    }

    /// Drops every descriptor and the spill buffer.
    pub fn clear(&mut self) {
        self.items.clear();
        self.storage.clear();
    }

    /// Number of LOB fields.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true when the table has no LOB fields.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Descriptor at registry position `n`.
    pub fn get(&self, n: usize) -> Option<&LobDescriptor> {
        self.items.get(n)
    }

    /// Iterates descriptors in field order.
    pub fn iter(&self) -> impl Iterator<Item = &LobDescriptor> {
        self.items.iter()
    }

    /// Spill buffer contents.
    pub fn storage(&self) -> &ByteStream {
        &self.storage
    }

    /// Replaces the spill buffer, e.g. with bytes received alongside a record.
    pub fn set_storage(&mut self, storage: ByteStream) {
        self.storage = storage;
    }

    /// Takes the spill buffer, leaving it empty.
    pub fn take_storage(&mut self) -> ByteStream {
        std::mem::take(&mut self.storage)
    }

    /// Locates the descriptor for `field`.
    pub fn search(&self, field: usize) -> LobLookup {
        if self.items.is_empty() {
            return LobLookup::Empty;
        }
        self.items
            .iter()
            .position(|d| d.field == field)
            .map_or(LobLookup::NotFound, LobLookup::Found)
    }

    /// Sets the cached payload size of `field`.
    pub fn set_size(&mut self, field: usize, size: usize) -> LobLookup {
        let found = self.search(field);
        if let LobLookup::Found(pos) = found {
            self.items[pos].size = size;
        }
        found
    }

    /// Cached payload size of `field`.
    pub fn size(&self, field: usize) -> Option<usize> {
        self.search(field).position().map(|pos| self.items[pos].size)
    }

    /// Sets the location token of `field`.
    pub fn set_location(&mut self, field: usize, loc: u32) -> LobLookup {
        let found = self.search(field);
        if let LobLookup::Found(pos) = found {
            self.items[pos].loc = loc;
        }
        found
    }

    /// Location token of `field`.
    pub fn location(&self, field: usize) -> Option<u32> {
        self.search(field).position().map(|pos| self.items[pos].loc)
    }

    /// Cell of `field`.
    pub fn cell(&self, field: usize) -> Option<&LobCell> {
        self.search(field).position().map(|pos| &self.items[pos].cell)
    }

    /// Binds the cell of `field` to its flat region inside `rec`.
    pub fn slot<'a>(
        &'a mut self,
        field: usize,
        fields: &FieldList,
        rec: &'a mut [u8],
    ) -> Option<LobSlot<'a>> {
        let pos = self.search(field).position()?;
        let range = fields.get(field)?.range();
        let flat = rec.get_mut(range)?;
        Some(self.items[pos].cell.slot(flat))
    }

    /// Forgets every value: cells back to flat, sizes and tags zeroed.
    pub fn clear_values(&mut self) {
        for d in &mut self.items {
            d.cell = LobCell::new();
            d.size = 0;
            d.tag = LobTag::default();
        }
    }

    /// Moves every LOB payload out of `rec` into the spill buffer.
    ///
    /// For each descriptor in field order a u32 size is written; when the size
    /// is nonzero the format byte and the serialized cell follow, then the
    /// cell is emptied and the cached size reset. The stream is
    /// self-contained: restoring it needs no state from this registry.
    pub fn spill(&mut self, fields: &FieldList, rec: &mut [u8]) -> Result<LobTransfer> {
        if self.items.is_empty() {
            return Ok(LobTransfer::NotApplicable);
        }
        self.storage.clear();
        let mut outcome = LobTransfer::Nothing;
        for d in &mut self.items {
            let range = fields
                .get(d.field)
                .ok_or(DbError::Invalid("LOB descriptor references missing field"))?
                .range();
            let size = u32::try_from(d.size)
                .map_err(|_| DbError::Invalid("LOB size exceeds u32"))?;
            self.storage.write_u32(size);
            if size == 0 {
                continue;
            }
            let flat = rec
                .get_mut(range)
                .ok_or(DbError::Invalid("record buffer shorter than field layout"))?;
            let mut slot = d.cell.slot(flat);
            let mut payload = ByteStream::new();
            slot.serialize(Dir::Write, &mut d.tag, &mut payload)?;
            slot.empty();
            self.storage.write_u8(d.tag.to_byte());
            self.storage.write(payload.as_bytes());
            trace!(field = d.field, size, tag = d.tag.to_byte(), "lob.spill.field");
            d.size = 0;
            outcome = LobTransfer::Moved;
        }
        debug!(bytes = self.storage.len(), "lob.spill");
        Ok(outcome)
    }

    /// Reloads payloads written by the matching [`LobRegistry::spill`].
    ///
    /// The spill buffer is cleared afterwards whether or not the pass
    /// succeeded. Calling this with an empty buffer is a precondition error;
    /// bytes left over after the last field mean the buffer did not come
    /// from a matching spill and fail with [`DbError::Corruption`].
    pub fn restore(&mut self, fields: &FieldList, rec: &mut [u8]) -> Result<LobTransfer> {
        if self.items.is_empty() {
            return Ok(LobTransfer::NotApplicable);
        }
        let result = self.restore_inner(fields, rec);
        self.storage.clear();
        result
    }

    fn restore_inner(&mut self, fields: &FieldList, rec: &mut [u8]) -> Result<LobTransfer> {
        if self.storage.available() == 0 {
            warn!("lob.restore.without_spill");
            return Err(DbError::Invalid("LOB restore without a prior spill"));
        }
        let mut outcome = LobTransfer::Nothing;
        for d in &mut self.items {
            let range = fields
                .get(d.field)
                .ok_or(DbError::Invalid("LOB descriptor references missing field"))?
                .range();
            let size = self.storage.read_u32()?;
            if size != 0 {
                let flat = rec
                    .get_mut(range)
                    .ok_or(DbError::Invalid("record buffer shorter than field layout"))?;
                d.tag = LobTag::from_byte(self.storage.read_u8()?)?;
                d.cell
                    .slot(flat)
                    .serialize(Dir::Read, &mut d.tag, &mut self.storage)?;
                outcome = LobTransfer::Moved;
                trace!(field = d.field, size, tag = d.tag.to_byte(), "lob.restore.field");
            }
            d.size = size as usize;
        }
        if self.storage.available() != 0 {
            warn!(left = self.storage.available(), "lob.restore.trailing_bytes");
            return Err(DbError::Corruption("LOB spill stream has trailing bytes"));
        }
        debug!("lob.restore");
        Ok(outcome)
    }
}
