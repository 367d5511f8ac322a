#![forbid(unsafe_code)]

use tracing::trace;

use crate::error::{try_alloc_zeroed, DbError, Result};
use crate::primitives::bytes::ByteStream;
use crate::storage::ser::Dir;

/// One-byte storage format recorded for a LOB field by the last spill.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum LobTag {
    /// Raw flat bytes follow in the stream.
    #[default]
    Flat = 0,
    /// Flat region was all zero; nothing follows.
    Zero = 1,
    /// Length-prefixed heap payload follows.
    Pointer = 2,
}

impl LobTag {
    /// Decodes a stored indicator byte.
    pub fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(Self::Flat),
            1 => Ok(Self::Zero),
            2 => Ok(Self::Pointer),
            _ => Err(DbError::Corruption("unknown LOB storage indicator")),
        }
    }

    /// Encodes the indicator byte.
    pub fn to_byte(self) -> u8 {
        self as u8
    }
}

/// Heap allocation owned by a structured cell. Freed exactly once on drop.
#[derive(Clone, PartialEq, Eq)]
pub struct LobBuf(Box<[u8]>);

impl LobBuf {
    fn alloc(size: usize) -> Result<Self> {
        Ok(Self(try_alloc_zeroed(size)?.into_boxed_slice()))
    }

    /// Payload bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    /// Mutable payload bytes.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.0
    }

    /// Allocation length.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true for a zero-length allocation.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for LobBuf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "LobBuf(len={})", self.0.len())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
enum CellRepr {
    /// Payload lives in the record's flat region.
    #[default]
    Flat,
    /// Metadata cell; flat region is kept zeroed.
    Structured { handle: u32, ptr: Option<LobBuf> },
}

/// Per-field LOB value cell.
///
/// A cell pairs with the field's fixed-size flat region inside the record
/// buffer. Unstructured cells keep their payload in that region; structured
/// cells carry an external descriptor or own exactly one heap allocation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LobCell {
    repr: CellRepr,
}

impl LobCell {
    /// Creates an unstructured, empty cell.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when the cell carries metadata instead of flat bytes.
    pub fn is_structured(&self) -> bool {
        matches!(self.repr, CellRepr::Structured { .. })
    }

    /// Returns true when the cell owns a heap allocation.
    pub fn is_ptr(&self) -> bool {
        matches!(self.repr, CellRepr::Structured { ptr: Some(_), .. })
    }

    /// Length of the owned allocation, zero when there is none.
    pub fn ptr_size(&self) -> usize {
        match &self.repr {
            CellRepr::Structured { ptr: Some(buf), .. } => buf.len(),
            _ => 0,
        }
    }

    /// Owned allocation, if any.
    pub fn ptr_data(&self) -> Option<&[u8]> {
        match &self.repr {
            CellRepr::Structured { ptr: Some(buf), .. } => Some(buf.as_slice()),
            _ => None,
        }
    }

    /// External descriptor stored by [`LobSlot::init`].
    pub fn handle(&self) -> u32 {
        match self.repr {
            CellRepr::Structured { handle, .. } => handle,
            CellRepr::Flat => 0,
        }
    }

    /// Releases an owned allocation, leaving the cell structured and empty.
    /// Returns false (no-op) when the cell held no pointer.
    pub fn destroy_ptr(&mut self) -> bool {
        match &mut self.repr {
            CellRepr::Structured { handle, ptr } if ptr.is_some() => {
                *ptr = None;
                *handle = 0;
                true
            }
            _ => false,
        }
    }

    /// Binds the cell to its flat region for the full operation set.
    pub fn slot<'a>(&'a mut self, flat: &'a mut [u8]) -> LobSlot<'a> {
        LobSlot { cell: self, flat }
    }
}

/// A cell together with the flat region it overlays.
#[derive(Debug)]
pub struct LobSlot<'a> {
    cell: &'a mut LobCell,
    flat: &'a mut [u8],
}

impl<'a> LobSlot<'a> {
    /// Pairs `cell` with `flat`.
    pub fn new(cell: &'a mut LobCell, flat: &'a mut [u8]) -> Self {
        Self { cell, flat }
    }

    /// Flat capacity of the field.
    pub fn flat_size(&self) -> usize {
        self.flat.len()
    }

    /// Read access to the cell.
    pub fn cell(&self) -> &LobCell {
        &*self.cell
    }

    /// Marks the cell structured and empty. Returns false when it already was.
    pub fn set_structured(&mut self) -> bool {
        if self.cell.is_structured() {
            return false;
        }
        self.flat.fill(0);
        self.cell.repr = CellRepr::Structured {
            handle: 0,
            ptr: None,
        };
        true
    }

    /// Resets the cell; a nonzero `descriptor` leaves it structured with that
    /// external handle stored.
    pub fn init(&mut self, descriptor: u32) {
        self.cell.destroy_ptr();
        self.flat.fill(0);
        self.cell.repr = if descriptor != 0 {
            CellRepr::Structured {
                handle: descriptor,
                ptr: None,
            }
        } else {
            CellRepr::Flat
        };
    }

    /// Drops any payload and leaves the cell structured-empty.
    pub fn empty(&mut self) {
        self.cell.destroy_ptr();
        self.flat.fill(0);
        self.cell.repr = CellRepr::Structured {
            handle: 0,
            ptr: None,
        };
    }

    /// Drops structure, returning the cell to a zeroed flat state. Returns
    /// false when the cell was already flat.
    pub fn ensure_unstructured(&mut self) -> bool {
        if !self.cell.is_structured() {
            return false;
        }
        self.cell.repr = CellRepr::Flat;
        self.flat.fill(0);
        true
    }

    /// Replaces the cell content with a fresh zeroed allocation of `size`
    /// bytes.
    ///
    /// Any prior pointer is released first, even when `size` is zero; in that
    /// case nothing is allocated and `Ok(false)` is returned. On allocation
    /// failure the cell is left structured with no pointer.
    pub fn init_ptr(&mut self, size: usize) -> Result<bool> {
        self.cell.destroy_ptr();
        if size == 0 {
            return Ok(false);
        }
        self.set_structured();
        let buf = LobBuf::alloc(size)?;
        self.cell.repr = CellRepr::Structured {
            handle: 0,
            ptr: Some(buf),
        };
        trace!(size, "lob.cell.init_ptr");
        Ok(true)
    }

    /// Releases an owned allocation; see [`LobCell::destroy_ptr`].
    pub fn destroy_ptr(&mut self) -> bool {
        self.cell.destroy_ptr()
    }

    fn reset_flat(&mut self) {
        self.cell.destroy_ptr();
        self.cell.repr = CellRepr::Flat;
        self.flat.fill(0);
    }

    /// Payload location: the owned allocation, the flat region for an
    /// unstructured cell, or `None` when structured without pointer.
    pub fn raw_data(&self) -> Option<&[u8]> {
        match &self.cell.repr {
            CellRepr::Flat => Some(&*self.flat),
            CellRepr::Structured { ptr: Some(buf), .. } => Some(buf.as_slice()),
            CellRepr::Structured { ptr: None, .. } => None,
        }
    }

    /// Mutable counterpart of [`LobSlot::raw_data`].
    pub fn raw_data_mut(&mut self) -> Option<&mut [u8]> {
        match &mut self.cell.repr {
            CellRepr::Flat => Some(&mut *self.flat),
            CellRepr::Structured { ptr: Some(buf), .. } => Some(buf.as_mut_slice()),
            CellRepr::Structured { ptr: None, .. } => None,
        }
    }

    /// Moves the value into (`Dir::Write`) or out of (`Dir::Read`) `stream`.
    ///
    /// Writing records the chosen format in `tag`: an owned pointer becomes
    /// [`LobTag::Pointer`] followed by a u32 length and the payload; an
    /// all-zero flat region becomes [`LobTag::Zero`] with nothing written;
    /// anything else is [`LobTag::Flat`] followed by the whole flat region.
    /// Reading consumes exactly what the matching write produced; a failed
    /// read leaves the cell structured and empty.
    pub fn serialize(&mut self, dir: Dir, tag: &mut LobTag, stream: &mut ByteStream) -> Result<()> {
        match dir {
            Dir::Write => {
                if let CellRepr::Structured { ptr: Some(buf), .. } = &self.cell.repr {
                    let len = u32::try_from(buf.len())
                        .map_err(|_| DbError::Invalid("LOB payload exceeds u32 length"))?;
                    *tag = LobTag::Pointer;
                    stream.write_u32(len);
                    stream.write(buf.as_slice());
                } else if self.flat.iter().all(|b| *b == 0) {
                    *tag = LobTag::Zero;
                } else {
                    stream.write(&*self.flat);
                    *tag = LobTag::Flat;
                }
            }
            Dir::Read => {
                if let Err(err) = self.read_from(*tag, stream) {
                    self.empty();
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    fn read_from(&mut self, tag: LobTag, stream: &mut ByteStream) -> Result<()> {
        match tag {
            LobTag::Zero => self.reset_flat(),
            LobTag::Pointer => {
                let len = stream.read_u32()? as usize;
                if len > stream.available() {
                    return Err(DbError::Corruption("LOB pointer payload truncated"));
                }
                if self.init_ptr(len)? {
                    if let Some(dst) = self.raw_data_mut() {
                        stream.read_into(dst)?;
                    }
                }
            }
            LobTag::Flat => {
                self.reset_flat();
                stream.read_into(&mut *self.flat)?;
            }
        }
        Ok(())
    }
}
