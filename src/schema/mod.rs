#![forbid(unsafe_code)]
//! Field and index metadata read by the record layer.
//!
//! A [`FieldList`] lays fields out back to back in a fixed-length record; an
//! [`IndexList`] describes composite keys as ordered segments over those
//! fields. [`TableSpec`] is the serde-friendly description used by schema
//! dictionaries and TOML files.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::error::{DbError, Result};

/// Storage kind of a field.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    /// Signed little-endian integer (1, 2, 4 or 8 bytes).
    Int,
    /// Unsigned little-endian integer (1, 2, 4 or 8 bytes).
    UInt,
    /// IEEE float (4 or 8 bytes).
    Float,
    /// Packed date: `year << 16 | month << 8 | day`.
    Date,
    /// Packed time: `hour << 24 | minute << 16 | second << 8 | hundredths`.
    Time,
    /// Zero-padded character string.
    Char,
    /// Opaque bytes.
    Raw,
    /// Trailing variable-length note text.
    Note,
    /// Binary large object.
    Blob,
    /// Character large object.
    Clob,
    /// Engine-assigned auto-increment integer.
    AutoInc,
}

impl FieldKind {
    /// Returns true for BLOB and CLOB fields.
    pub fn is_lob(self) -> bool {
        matches!(self, FieldKind::Blob | FieldKind::Clob)
    }

    /// Orders two encoded values of this kind.
    pub fn compare(self, a: &[u8], b: &[u8]) -> Ordering {
        match self {
            FieldKind::Int => read_int(a).cmp(&read_int(b)),
            FieldKind::UInt | FieldKind::AutoInc | FieldKind::Date | FieldKind::Time => {
                read_uint(a).cmp(&read_uint(b))
            }
            FieldKind::Float => read_float(a).total_cmp(&read_float(b)),
            _ => a.cmp(b),
        }
    }
}

fn read_uint(src: &[u8]) -> u64 {
    let mut raw = [0u8; 8];
    let n = src.len().min(8);
    raw[..n].copy_from_slice(&src[..n]);
    u64::from_le_bytes(raw)
}

fn read_int(src: &[u8]) -> i64 {
    let n = src.len().min(8);
    if n == 0 {
        return 0;
    }
    let negative = src[n - 1] & 0x80 != 0;
    let mut raw = if negative { [0xffu8; 8] } else { [0u8; 8] };
    raw[..n].copy_from_slice(&src[..n]);
    i64::from_le_bytes(raw)
}

fn read_float(src: &[u8]) -> f64 {
    match src.len() {
        4 => {
            let mut raw = [0u8; 4];
            raw.copy_from_slice(src);
            f32::from_le_bytes(raw) as f64
        }
        8 => {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(src);
            f64::from_le_bytes(raw)
        }
        _ => 0.0,
    }
}

/// One field of a fixed-layout record.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    /// Dictionary identifier.
    pub id: u32,
    /// Field name.
    pub name: String,
    /// Storage kind.
    pub kind: FieldKind,
    /// Fixed byte size in the record (the flat size for LOB fields).
    pub size: usize,
    /// Byte offset inside the record.
    pub offset: usize,
}

impl FieldDef {
    /// Byte range occupied inside a record.
    pub fn range(&self) -> std::ops::Range<usize> {
        self.offset..self.offset + self.size
    }
}

/// Ordered field list with computed offsets.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FieldList {
    fields: Vec<FieldDef>,
    rec_size: usize,
}

impl FieldList {
    /// Creates an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a field placed right after the previous one.
    pub fn add(&mut self, name: impl Into<String>, kind: FieldKind, size: usize) -> Result<usize> {
        if size == 0 {
            return Err(DbError::Invalid("field size must be positive"));
        }
        let name = name.into();
        if self.by_name(&name).is_some() {
            return Err(DbError::Invalid("duplicate field name"));
        }
        let idx = self.fields.len();
        self.fields.push(FieldDef {
            id: idx as u32 + 1,
            name,
            kind,
            size,
            offset: self.rec_size,
        });
        self.rec_size += size;
        Ok(idx)
    }

    /// Builder-style [`FieldList::add`].
    pub fn with(mut self, name: impl Into<String>, kind: FieldKind, size: usize) -> Result<Self> {
        self.add(name, kind, size)?;
        Ok(self)
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true when no fields are defined.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Fixed record size (sum of field sizes).
    pub fn rec_size(&self) -> usize {
        self.rec_size
    }

    /// Field at position `n`.
    pub fn get(&self, n: usize) -> Option<&FieldDef> {
        self.fields.get(n)
    }

    /// Field with the given name together with its position.
    pub fn by_name(&self, name: &str) -> Option<(usize, &FieldDef)> {
        self.fields.iter().enumerate().find(|(_, f)| f.name == name)
    }

    /// Iterates fields in record order.
    pub fn iter(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter()
    }

    /// Drops every field.
    pub fn reset(&mut self) {
        self.fields.clear();
        self.rec_size = 0;
    }

    /// Borrowed value of field `n` inside `rec`.
    pub fn value<'a>(&self, rec: &'a [u8], n: usize) -> Option<&'a [u8]> {
        let f = self.fields.get(n)?;
        rec.get(f.range())
    }

    /// Writes `src` into field `n`, zero-padding short input.
    pub fn set_value(&self, rec: &mut [u8], n: usize, src: &[u8]) -> Result<()> {
        let f = self
            .fields
            .get(n)
            .ok_or(DbError::Invalid("field index out of range"))?;
        let dst = rec
            .get_mut(f.range())
            .ok_or(DbError::Invalid("record buffer shorter than field layout"))?;
        let n = src.len().min(dst.len());
        dst[..n].copy_from_slice(&src[..n]);
        dst[n..].fill(0);
        Ok(())
    }

    /// Renders field `n` of `rec` as text.
    pub fn value_to_string(&self, rec: &[u8], n: usize) -> Option<String> {
        let f = self.fields.get(n)?;
        let v = rec.get(f.range())?;
        Some(render_value(f, v))
    }
}

fn render_value(f: &FieldDef, v: &[u8]) -> String {
    match f.kind {
        FieldKind::Int => read_int(v).to_string(),
        FieldKind::UInt | FieldKind::AutoInc => read_uint(v).to_string(),
        FieldKind::Float => read_float(v).to_string(),
        FieldKind::Date => {
            let raw = read_uint(v) as u32;
            format!("{:04}-{:02}-{:02}", raw >> 16, (raw >> 8) & 0xff, raw & 0xff)
        }
        FieldKind::Time => {
            let raw = read_uint(v) as u32;
            format!(
                "{:02}:{:02}:{:02}.{:02}",
                raw >> 24,
                (raw >> 16) & 0xff,
                (raw >> 8) & 0xff,
                raw & 0xff
            )
        }
        FieldKind::Char | FieldKind::Note => {
            let end = v.iter().position(|b| *b == 0).unwrap_or(v.len());
            String::from_utf8_lossy(&v[..end]).into_owned()
        }
        FieldKind::Raw => hex::encode(v),
        FieldKind::Blob | FieldKind::Clob => format!("lob(flat={})", f.size),
    }
}

/// Key-segment flag: values sort in descending order.
pub const SEG_DESCENDING: u16 = 0x0040;

/// Key flag: duplicate keys allowed.
pub const KEY_DUP: u16 = 0x0001;
/// Key flag: key values may change on update.
pub const KEY_MODIFIABLE: u16 = 0x0002;

/// One segment of a composite key.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct KeySegment {
    /// Position of the field in the owning [`FieldList`].
    pub field: usize,
    /// Segment flags (see [`SEG_DESCENDING`]).
    pub flags: u16,
}

/// Composite index over record fields.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct IndexDef {
    /// Engine key number.
    pub key_number: u16,
    /// Key flags (see [`KEY_DUP`]).
    pub flags: u16,
    /// Segments in key order.
    pub segments: SmallVec<[KeySegment; 4]>,
}

impl IndexDef {
    /// Creates an index over `fields` in order with the given flags.
    pub fn new(key_number: u16, flags: u16, fields: &[usize]) -> Self {
        Self {
            key_number,
            flags,
            segments: fields
                .iter()
                .map(|&field| KeySegment { field, flags: 0 })
                .collect(),
        }
    }

    /// Returns true when duplicate keys are allowed.
    pub fn allows_duplicates(&self) -> bool {
        self.flags & KEY_DUP != 0
    }
}

/// Index metadata for a table.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct IndexList {
    keys: Vec<IndexDef>,
}

impl IndexList {
    /// Creates an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an index after checking its segments against `fields`.
    pub fn add(&mut self, def: IndexDef, fields: &FieldList) -> Result<usize> {
        if def.segments.is_empty() {
            return Err(DbError::Invalid("index without segments"));
        }
        for seg in &def.segments {
            match fields.get(seg.field) {
                None => return Err(DbError::Invalid("index segment references missing field")),
                Some(f) if f.kind.is_lob() || f.kind == FieldKind::Note => {
                    return Err(DbError::Invalid("index segment over a LOB or note field"))
                }
                Some(_) => {}
            }
        }
        self.keys.push(def);
        Ok(self.keys.len() - 1)
    }

    /// Number of indexes.
    pub fn num_keys(&self) -> usize {
        self.keys.len()
    }

    /// Index at position `idx`.
    pub fn get(&self, idx: usize) -> Option<&IndexDef> {
        self.keys.get(idx)
    }

    /// Iterates indexes in order.
    pub fn iter(&self) -> impl Iterator<Item = &IndexDef> {
        self.keys.iter()
    }

    /// Byte length of a key buffer for index `idx`.
    pub fn key_size(&self, idx: usize, fields: &FieldList) -> usize {
        self.keys.get(idx).map_or(0, |k| {
            k.segments
                .iter()
                .filter_map(|s| fields.get(s.field))
                .map(|f| f.size)
                .sum()
        })
    }

    /// Builds the composite key of index `idx` from a record.
    pub fn extract_key(&self, idx: usize, fields: &FieldList, rec: &[u8]) -> Result<Vec<u8>> {
        let key = self
            .keys
            .get(idx)
            .ok_or(DbError::Invalid("index out of range"))?;
        let mut out = Vec::with_capacity(self.key_size(idx, fields));
        for seg in &key.segments {
            let v = fields
                .value(rec, seg.field)
                .ok_or(DbError::Invalid("record buffer shorter than key layout"))?;
            out.extend_from_slice(v);
        }
        Ok(out)
    }

    /// Orders two key buffers of index `idx` segment by segment.
    pub fn compare_keys(&self, idx: usize, fields: &FieldList, a: &[u8], b: &[u8]) -> Ordering {
        let Some(key) = self.keys.get(idx) else {
            return a.cmp(b);
        };
        let mut off = 0usize;
        for seg in &key.segments {
            let Some(f) = fields.get(seg.field) else {
                break;
            };
            let end = off + f.size;
            let sa = a.get(off..end.min(a.len())).unwrap_or(&[]);
            let sb = b.get(off..end.min(b.len())).unwrap_or(&[]);
            let mut ord = f.kind.compare(sa, sb);
            if seg.flags & SEG_DESCENDING != 0 {
                ord = ord.reverse();
            }
            if ord != Ordering::Equal {
                return ord;
            }
            off = end;
        }
        Ordering::Equal
    }

    /// Drops every index.
    pub fn reset(&mut self) {
        self.keys.clear();
    }
}

/// Serde description of one field.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Field name.
    pub name: String,
    /// Storage kind.
    pub kind: FieldKind,
    /// Fixed byte size.
    pub size: usize,
}

/// Serde description of one index.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct IndexSpec {
    /// Field names in segment order.
    pub segments: Vec<String>,
    /// Names of segments sorted descending.
    #[serde(default)]
    pub descending: Vec<String>,
    /// Whether duplicates are allowed.
    #[serde(default)]
    pub duplicates: bool,
    /// Whether key values may change on update.
    #[serde(default)]
    pub modifiable: bool,
}

/// Table description as stored by schema dictionaries.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TableSpec {
    /// Logical table name.
    pub name: String,
    /// Physical file name; dictionaries derive one when absent.
    #[serde(default)]
    pub file_name: Option<String>,
    /// Engine page size reported by file statistics.
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// Fields in record order.
    pub fields: Vec<FieldSpec>,
    /// Indexes in key-number order.
    #[serde(default)]
    pub indexes: Vec<IndexSpec>,
}

fn default_page_size() -> u32 {
    4096
}

impl TableSpec {
    /// Starts a spec with no fields.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            file_name: None,
            page_size: default_page_size(),
            fields: Vec::new(),
            indexes: Vec::new(),
        }
    }

    /// Adds a field.
    pub fn field(mut self, name: impl Into<String>, kind: FieldKind, size: usize) -> Self {
        self.fields.push(FieldSpec {
            name: name.into(),
            kind,
            size,
        });
        self
    }

    /// Adds an index over the named fields.
    pub fn index(mut self, segments: &[&str], duplicates: bool) -> Self {
        self.indexes.push(IndexSpec {
            segments: segments.iter().map(|s| s.to_string()).collect(),
            duplicates,
            ..IndexSpec::default()
        });
        self
    }

    /// Sets the physical file name.
    pub fn file(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }

    /// Parses a spec from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|err| DbError::Config(err.to_string()))
    }

    /// Resolves the spec into field and index lists.
    pub fn build(&self) -> Result<(FieldList, IndexList)> {
        let mut fields = FieldList::new();
        for f in &self.fields {
            fields.add(f.name.clone(), f.kind, f.size)?;
        }
        let mut indexes = IndexList::new();
        for (n, ix) in self.indexes.iter().enumerate() {
            let mut segments = SmallVec::new();
            for name in &ix.segments {
                let (pos, _) = fields
                    .by_name(name)
                    .ok_or(DbError::Invalid("index segment names unknown field"))?;
                let flags = if ix.descending.iter().any(|d| d == name) {
                    SEG_DESCENDING
                } else {
                    0
                };
                segments.push(KeySegment { field: pos, flags });
            }
            let mut flags = 0;
            if ix.duplicates {
                flags |= KEY_DUP;
            }
            if ix.modifiable {
                flags |= KEY_MODIFIABLE;
            }
            indexes.add(
                IndexDef {
                    key_number: n as u16,
                    flags,
                    segments,
                },
                &fields,
            )?;
        }
        Ok((fields, indexes))
    }
}
