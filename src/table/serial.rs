use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use super::RecordTable;
use crate::error::{try_alloc_zeroed, DbError, Result};
use crate::primitives::bytes::ByteStream;
use crate::schema::{FieldList, IndexList};
use crate::storage::ser::{Dir, SerializeContext};

/// Extra bytes allocated per element when reading a record array.
pub const ARRAY_HEADROOM: usize = 4096;

/// Opaque select statement kept in one of the two statement slots.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct SelectStmt {
    /// Statement text.
    pub text: String,
    /// Index the statement scans.
    pub index: usize,
    /// Start position.
    pub sp: i32,
    /// Stop position.
    pub sf: i32,
}

impl RecordTable {
    /// Replaces the statement in the current slot, returning the old one.
    pub fn set_stmt(&mut self, stmt: Option<SelectStmt>) -> Option<SelectStmt> {
        std::mem::replace(&mut self.stmts[self.cur_stmt], stmt)
    }

    /// Switches current and opposite slots.
    pub fn toggle_stmt(&mut self) {
        self.cur_stmt ^= 1;
    }

    /// Statement in the current slot.
    pub fn stmt(&self) -> Option<&SelectStmt> {
        self.stmts[self.cur_stmt].as_ref()
    }

    /// Statement in the opposite slot.
    pub fn opposite_stmt(&self) -> Option<&SelectStmt> {
        self.stmts[self.cur_stmt ^ 1].as_ref()
    }

    /// Transfers table name, file name, field list and index list.
    ///
    /// Reading is only allowed on a closed table. The layout is installed
    /// after the whole description was read; a failure leaves the table as
    /// it was.
    pub fn serialize_spec(
        &mut self,
        dir: Dir,
        ctx: &SerializeContext,
        stream: &mut ByteStream,
    ) -> Result<()> {
        match dir {
            Dir::Write => {
                let mut name = self.table_name.clone();
                let mut file = self.file_name.clone();
                ctx.serialize_str(dir, &mut name, stream)?;
                ctx.serialize_str(dir, &mut file, stream)?;
                ctx.serialize_field_list(dir, &mut self.fields, stream)?;
                ctx.serialize_index_list(dir, &mut self.indexes, &self.fields, stream)?;
            }
            Dir::Read => {
                if self.is_open() {
                    return Err(DbError::Invalid("cannot replace the layout of an open table"));
                }
                let mut name = String::new();
                let mut file = String::new();
                let mut fields = FieldList::new();
                let mut indexes = IndexList::new();
                ctx.serialize_str(dir, &mut name, stream)?;
                ctx.serialize_str(dir, &mut file, stream)?;
                ctx.serialize_field_list(dir, &mut fields, stream)?;
                ctx.serialize_index_list(dir, &mut indexes, &fields, stream)?;
                self.bind_layout(fields, indexes)?;
                self.table_name = name;
                self.file_name = file;
                debug!(table = %self.table_name, fields = self.fields.len(), "table.spec.read");
            }
        }
        Ok(())
    }

    /// Transfers the record buffer. LOB payloads are not carried; spill
    /// them first.
    pub fn serialize_record(
        &mut self,
        dir: Dir,
        ctx: &mut SerializeContext,
        stream: &mut ByteStream,
    ) -> Result<()> {
        match dir {
            Dir::Write => ctx.write_record(&self.table_name, &self.fields, self.buffer(), stream),
            Dir::Read => {
                ctx.read_record(&self.fields, &mut self.buf[..self.buf_len], stream)?;
                self.lobs.clear_values();
                Ok(())
            }
        }
    }

    /// Transfers a count-prefixed array of records laid out like this table.
    ///
    /// Reading clears `items` first and appends one record per element; an
    /// error stops the pass with the elements read so far kept.
    pub fn serialize_array(
        &self,
        dir: Dir,
        ctx: &mut SerializeContext,
        stream: &mut ByteStream,
        items: &mut Vec<Vec<u8>>,
    ) -> Result<()> {
        let rec_size = self.fields.rec_size();
        match dir {
            Dir::Write => {
                stream.write_var(items.len() as u64);
                for item in items.iter() {
                    ctx.write_record(&self.table_name, &self.fields, item, stream)?;
                }
            }
            Dir::Read => {
                items.clear();
                let count = usize::try_from(stream.read_var()?)
                    .map_err(|_| DbError::Corruption("array count exceeds usize"))?;
                for _ in 0..count {
                    let mut item = try_alloc_zeroed(rec_size + ARRAY_HEADROOM)?;
                    ctx.read_record(&self.fields, &mut item, stream)?;
                    item.truncate(rec_size);
                    items.push(item);
                }
                debug!(table = %self.table_name, count, "table.array.read");
            }
        }
        Ok(())
    }

    /// JSON snapshot of the table for diagnostics.
    pub fn debug_output(&self) -> Value {
        let indexes: Vec<Value> = self
            .indexes
            .iter()
            .map(|k| {
                json!({
                    "key_number": k.key_number,
                    "flags": k.flags,
                    "segments": k.segments.iter().map(|s| json!({"field": s.field, "flags": s.flags})).collect::<Vec<_>>(),
                })
            })
            .collect();
        let lobs: Vec<Value> = self
            .lobs
            .iter()
            .map(|d| json!({"field": d.field, "size": d.size, "loc": d.loc, "pointer": d.cell().is_ptr()}))
            .collect();
        json!({
            "handle": self.handle.map(|h| h.get()),
            "state": self.state.names(),
            "table_name": self.table_name,
            "file_name": self.file_name,
            "backend": self.backend.kind(),
            "rec_size": self.fields.rec_size(),
            "buf_len": self.buf_len,
            "position": self.position.to_string(),
            "fields": self.fields.iter().collect::<Vec<_>>(),
            "indexes": indexes,
            "lobs": lobs,
            "stmt": self.stmt(),
        })
    }
}
