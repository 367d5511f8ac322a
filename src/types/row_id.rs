#![forbid(unsafe_code)]

use std::fmt;

/// Width of a row address in bytes.
pub const ROW_ID_LEN: usize = 8;

/// Longest opaque address accepted by [`RowId::set_from_str`]; the last byte
/// stays a terminator.
pub const ROW_ID_TEXT_CAPACITY: usize = ROW_ID_LEN - 1;

/// How [`RowId::set_from_str`] classified its input.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RowIdParse {
    /// Empty input; the address was zeroed.
    Empty,
    /// All characters decimal; parsed into the record-number form.
    Numeric,
    /// Non-decimal input copied verbatim (clipped) into the raw form.
    Opaque,
}

/// Dual-encoding row address.
///
/// Either a 32-bit record number (upper four bytes zero) or an engine-native
/// byte token. The active encoding is tracked explicitly so short opaque
/// tokens never read back as numbers.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Default)]
pub struct RowId {
    bytes: [u8; ROW_ID_LEN],
    raw: bool,
}

impl RowId {
    /// The all-zero address.
    pub const ZERO: RowId = RowId {
        bytes: [0; ROW_ID_LEN],
        raw: false,
    };

    /// Builds the numeric form.
    pub fn from_record_number(n: u32) -> Self {
        let mut bytes = [0u8; ROW_ID_LEN];
        bytes[..4].copy_from_slice(&n.to_le_bytes());
        Self { bytes, raw: false }
    }

    /// Builds an address from engine bytes, deriving the encoding from the
    /// upper half.
    pub fn from_raw(bytes: [u8; ROW_ID_LEN]) -> Self {
        let raw = bytes[4..].iter().any(|b| *b != 0);
        Self { bytes, raw }
    }

    /// Zeroes the address.
    pub fn set_zero(&mut self) {
        *self = Self::ZERO;
    }

    /// Sets the canonical "largest" sentinel.
    pub fn set_max(&mut self) {
        self.bytes = [0xff; ROW_ID_LEN];
        self.bytes[ROW_ID_LEN - 1] = 0;
        self.raw = true;
    }

    /// Returns true when the engine-native byte form is active.
    pub fn is_long(&self) -> bool {
        self.raw
    }

    /// Returns true for the all-zero address.
    pub fn is_zero(&self) -> bool {
        self.bytes.iter().all(|b| *b == 0)
    }

    /// Record number held in the low four bytes.
    pub fn record_number(&self) -> u32 {
        let mut lo = [0u8; 4];
        lo.copy_from_slice(&self.bytes[..4]);
        u32::from_le_bytes(lo)
    }

    /// Underlying bytes.
    pub fn as_bytes(&self) -> &[u8; ROW_ID_LEN] {
        &self.bytes
    }

    /// Replaces the address with the value denoted by `s`.
    pub fn set_from_str(&mut self, s: &str) -> RowIdParse {
        self.set_zero();
        if s.is_empty() {
            return RowIdParse::Empty;
        }
        if s.bytes().all(|b| b.is_ascii_digit()) {
            // Saturates like strtoul on overflow.
            let n = s.parse::<u64>().map_or(u32::MAX, |v| v.min(u32::MAX as u64) as u32);
            *self = Self::from_record_number(n);
            RowIdParse::Numeric
        } else {
            let src = s.as_bytes();
            let n = src.len().min(ROW_ID_TEXT_CAPACITY);
            self.bytes[..n].copy_from_slice(&src[..n]);
            self.raw = true;
            RowIdParse::Opaque
        }
    }

    /// Parses `s` into a fresh address.
    pub fn parse(s: &str) -> (Self, RowIdParse) {
        let mut id = Self::ZERO;
        let kind = id.set_from_str(s);
        (id, kind)
    }
}

impl From<u32> for RowId {
    fn from(value: u32) -> Self {
        RowId::from_record_number(value)
    }
}

impl From<RowId> for u32 {
    fn from(value: RowId) -> Self {
        value.record_number()
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.raw {
            let end = self
                .bytes
                .iter()
                .position(|b| *b == 0)
                .unwrap_or(ROW_ID_LEN);
            f.write_str(&String::from_utf8_lossy(&self.bytes[..end]))
        } else if self.record_number() != 0 {
            write!(f, "{}", self.record_number())
        } else {
            Ok(())
        }
    }
}

impl fmt::Debug for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.raw {
            write!(f, "RowId(raw {:02x?})", self.bytes)
        } else {
            write!(f, "RowId({})", self.record_number())
        }
    }
}
