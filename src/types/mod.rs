//! Small value types shared across the crate.

use std::fmt;
use std::num::NonZeroU32;

mod row_id;

pub use row_id::{RowId, RowIdParse, ROW_ID_LEN, ROW_ID_TEXT_CAPACITY};

/// Identifier handed out by the session's table registry for an open table.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct TableHandle(pub NonZeroU32);

impl TableHandle {
    /// Raw numeric value (never zero).
    pub fn get(self) -> u32 {
        self.0.get()
    }
}

impl fmt::Display for TableHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Field reference: owning table handle plus field position.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct FieldRef {
    /// Handle of the table the field belongs to.
    pub table: TableHandle,
    /// Zero-based field position.
    pub field: usize,
}
