#![forbid(unsafe_code)]
//! Serialization context shared by spec, record and record-array transfer.

use std::collections::HashMap;

use smallvec::SmallVec;
use tracing::trace;

use crate::error::{DbError, Result};
use crate::primitives::bytes::ByteStream;
use crate::schema::{FieldKind, FieldList, IndexDef, IndexList, KeySegment};

/// Transfer direction.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Dir {
    /// Value to stream.
    Write,
    /// Stream to value.
    Read,
}

impl Dir {
    /// Maps the classic `+1`/`-1` encoding; zero has no direction.
    pub fn from_sign(sign: i32) -> Option<Self> {
        match sign.signum() {
            1 => Some(Dir::Write),
            -1 => Some(Dir::Read),
            _ => None,
        }
    }
}

fn kind_to_byte(kind: FieldKind) -> u8 {
    match kind {
        FieldKind::Int => 1,
        FieldKind::UInt => 2,
        FieldKind::Float => 3,
        FieldKind::Date => 4,
        FieldKind::Time => 5,
        FieldKind::Char => 6,
        FieldKind::Raw => 7,
        FieldKind::Note => 8,
        FieldKind::Blob => 9,
        FieldKind::Clob => 10,
        FieldKind::AutoInc => 11,
    }
}

fn kind_from_byte(byte: u8) -> Result<FieldKind> {
    Ok(match byte {
        1 => FieldKind::Int,
        2 => FieldKind::UInt,
        3 => FieldKind::Float,
        4 => FieldKind::Date,
        5 => FieldKind::Time,
        6 => FieldKind::Char,
        7 => FieldKind::Raw,
        8 => FieldKind::Note,
        9 => FieldKind::Blob,
        10 => FieldKind::Clob,
        11 => FieldKind::AutoInc,
        _ => return Err(DbError::Corruption("unknown field kind")),
    })
}

fn read_usize(stream: &mut ByteStream) -> Result<usize> {
    usize::try_from(stream.read_var()?).map_err(|_| DbError::Corruption("length exceeds usize"))
}

/// Sequences scalar, string, schema and record values through a
/// [`ByteStream`].
///
/// Record writes are keyed by table name: each distinct name gets a small
/// struct id on first use and later records of the same table carry only the
/// id.
#[derive(Debug, Default)]
pub struct SerializeContext {
    struct_ids: HashMap<String, u32>,
}

impl SerializeContext {
    /// Creates a context with an empty struct registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct tables whose records were written.
    pub fn struct_count(&self) -> usize {
        self.struct_ids.len()
    }

    /// Transfers an i32.
    pub fn serialize_i32(&self, dir: Dir, value: &mut i32, stream: &mut ByteStream) -> Result<()> {
        match dir {
            Dir::Write => stream.write_i32(*value),
            Dir::Read => *value = stream.read_i32()?,
        }
        Ok(())
    }

    /// Transfers a string.
    pub fn serialize_str(&self, dir: Dir, value: &mut String, stream: &mut ByteStream) -> Result<()> {
        match dir {
            Dir::Write => stream.write_len_prefixed(value.as_bytes()),
            Dir::Read => {
                let raw = stream.read_len_prefixed()?;
                *value = String::from_utf8(raw)
                    .map_err(|_| DbError::Corruption("string not valid UTF-8"))?;
            }
        }
        Ok(())
    }

    /// Transfers a field list; reading replaces `fields`.
    pub fn serialize_field_list(
        &self,
        dir: Dir,
        fields: &mut FieldList,
        stream: &mut ByteStream,
    ) -> Result<()> {
        match dir {
            Dir::Write => {
                stream.write_var(fields.len() as u64);
                for f in fields.iter() {
                    stream.write_len_prefixed(f.name.as_bytes());
                    stream.write_u8(kind_to_byte(f.kind));
                    stream.write_var(f.size as u64);
                }
            }
            Dir::Read => {
                let count = read_usize(stream)?;
                let mut list = FieldList::new();
                for _ in 0..count {
                    let name = String::from_utf8(stream.read_len_prefixed()?)
                        .map_err(|_| DbError::Corruption("field name not valid UTF-8"))?;
                    let kind = kind_from_byte(stream.read_u8()?)?;
                    let size = read_usize(stream)?;
                    list.add(name, kind, size)
                        .map_err(|_| DbError::Corruption("malformed field list"))?;
                }
                *fields = list;
            }
        }
        Ok(())
    }

    /// Transfers an index list; reading validates segments against `fields`.
    pub fn serialize_index_list(
        &self,
        dir: Dir,
        indexes: &mut IndexList,
        fields: &FieldList,
        stream: &mut ByteStream,
    ) -> Result<()> {
        match dir {
            Dir::Write => {
                stream.write_var(indexes.num_keys() as u64);
                for k in indexes.iter() {
                    stream.write_var(u64::from(k.key_number));
                    stream.write_var(u64::from(k.flags));
                    stream.write_var(k.segments.len() as u64);
                    for seg in &k.segments {
                        stream.write_var(seg.field as u64);
                        stream.write_var(u64::from(seg.flags));
                    }
                }
            }
            Dir::Read => {
                let count = read_usize(stream)?;
                let mut list = IndexList::new();
                for _ in 0..count {
                    let key_number = u16::try_from(stream.read_var()?)
                        .map_err(|_| DbError::Corruption("key number out of range"))?;
                    let flags = u16::try_from(stream.read_var()?)
                        .map_err(|_| DbError::Corruption("key flags out of range"))?;
                    let nseg = read_usize(stream)?;
                    let mut segments = SmallVec::new();
                    for _ in 0..nseg {
                        let field = read_usize(stream)?;
                        let flags = u16::try_from(stream.read_var()?)
                            .map_err(|_| DbError::Corruption("segment flags out of range"))?;
                        segments.push(KeySegment { field, flags });
                    }
                    list.add(
                        IndexDef {
                            key_number,
                            flags,
                            segments,
                        },
                        fields,
                    )
                    .map_err(|_| DbError::Corruption("malformed index list"))?;
                }
                *indexes = list;
            }
        }
        Ok(())
    }

    /// Writes one record of `table` with trailing zero bytes of every field
    /// trimmed.
    pub fn write_record(
        &mut self,
        table: &str,
        fields: &FieldList,
        rec: &[u8],
        stream: &mut ByteStream,
    ) -> Result<()> {
        if rec.len() < fields.rec_size() {
            return Err(DbError::Invalid("record buffer shorter than field layout"));
        }
        let next = self.struct_ids.len() as u32 + 1;
        let id = *self.struct_ids.entry(table.to_string()).or_insert(next);
        stream.write_var(u64::from(id));
        stream.write_var(fields.len() as u64);
        for n in 0..fields.len() {
            let v = fields.value(rec, n).unwrap_or(&[]);
            let used = v.iter().rposition(|b| *b != 0).map_or(0, |p| p + 1);
            stream.write_len_prefixed(&v[..used]);
        }
        trace!(table, id, "ser.record.write");
        Ok(())
    }

    /// Reads one record laid out by `fields` into `rec`.
    pub fn read_record(&self, fields: &FieldList, rec: &mut [u8], stream: &mut ByteStream) -> Result<()> {
        if rec.len() < fields.rec_size() {
            return Err(DbError::Invalid("record buffer shorter than field layout"));
        }
        let _struct_id = stream.read_var()?;
        let count = read_usize(stream)?;
        if count != fields.len() {
            return Err(DbError::Corruption("record field count mismatch"));
        }
        for n in 0..count {
            let v = stream.read_len_prefixed()?;
            let size = fields.get(n).map_or(0, |f| f.size);
            if v.len() > size {
                return Err(DbError::Corruption("serialized value exceeds field size"));
            }
            fields.set_value(rec, n, &v)?;
        }
        Ok(())
    }
}
