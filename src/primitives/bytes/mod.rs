#![forbid(unsafe_code)]
//! Varint and stream-buffer utilities shared by the LOB and serialization layers.

pub mod var {
    //! Unsigned varints.

    use crate::error::{DbError, Result};

    /// Encodes a u64 as an unsigned varint.
    pub fn encode_u64(mut v: u64, out: &mut Vec<u8>) {
        loop {
            let byte = (v & 0x7f) as u8;
            v >>= 7;
            if v == 0 {
                out.push(byte);
                break;
            } else {
                out.push(byte | 0x80);
            }
        }
    }

    /// Decodes a u64 varint from a slice, updating the offset.
    pub fn decode_u64(src: &[u8], off: &mut usize) -> Result<u64> {
        let mut result = 0u64;
        let mut shift = 0u32;
        for i in 0..10 {
            let byte = *src
                .get(*off)
                .ok_or(DbError::Corruption("varint decode truncated"))?;
            *off += 1;
            let payload = (byte & 0x7f) as u64;
            if i == 9 && payload > 1 {
                return Err(DbError::Corruption("varint overflow (more than 64 bits)"));
            }
            result |= payload << shift;
            if (byte & 0x80) == 0 {
                return Ok(result);
            }
            shift += 7;
        }
        Err(DbError::Corruption("varint too long (exceeded 10 bytes)"))
    }
}

pub mod stream {
    //! Growable byte buffer with an independent read cursor.

    use core::fmt;

    use super::var;
    use crate::error::{DbError, Result};

    /// Append-only byte buffer read back front to back.
    ///
    /// Fixed-width integers are little-endian. Reads past the written end
    /// fail with [`DbError::Corruption`] instead of panicking.
    #[derive(Clone, Default, PartialEq, Eq)]
    pub struct ByteStream {
        buf: Vec<u8>,
        rd: usize,
    }

    impl ByteStream {
        /// Creates an empty stream.
        pub fn new() -> Self {
            Self::default()
        }

        /// Wraps existing bytes for reading.
        pub fn from_bytes(bytes: Vec<u8>) -> Self {
            Self { buf: bytes, rd: 0 }
        }

        /// Drops all content and rewinds the cursor.
        pub fn clear(&mut self) {
            self.buf.clear();
            self.rd = 0;
        }

        /// Total bytes written.
        pub fn len(&self) -> usize {
            self.buf.len()
        }

        /// Returns true when nothing has been written.
        pub fn is_empty(&self) -> bool {
            self.buf.is_empty()
        }

        /// Bytes not yet consumed by the read cursor.
        pub fn available(&self) -> usize {
            self.buf.len().saturating_sub(self.rd)
        }

        /// Full written content, independent of the read cursor.
        pub fn as_bytes(&self) -> &[u8] {
            &self.buf
        }

        /// Consumes the stream, returning the written bytes.
        pub fn into_bytes(self) -> Vec<u8> {
            self.buf
        }

        /// Appends raw bytes.
        pub fn write(&mut self, bytes: &[u8]) {
            self.buf.extend_from_slice(bytes);
        }

        /// Appends a little-endian u32.
        pub fn write_u32(&mut self, v: u32) {
            self.write(&v.to_le_bytes());
        }

        /// Appends a little-endian i32.
        pub fn write_i32(&mut self, v: i32) {
            self.write(&v.to_le_bytes());
        }

        /// Appends a single byte.
        pub fn write_u8(&mut self, v: u8) {
            self.buf.push(v);
        }

        /// Appends an unsigned varint.
        pub fn write_var(&mut self, v: u64) {
            var::encode_u64(v, &mut self.buf);
        }

        /// Appends a varint length prefix followed by the bytes.
        pub fn write_len_prefixed(&mut self, bytes: &[u8]) {
            self.write_var(bytes.len() as u64);
            self.write(bytes);
        }

        /// Takes the next `n` bytes, advancing the cursor.
        pub fn take(&mut self, n: usize) -> Result<&[u8]> {
            let end = self
                .rd
                .checked_add(n)
                .ok_or(DbError::Corruption("stream offset overflow"))?;
            if end > self.buf.len() {
                return Err(DbError::Corruption("stream read beyond written data"));
            }
            let start = self.rd;
            self.rd = end;
            Ok(&self.buf[start..end])
        }

        /// Fills `dst` completely from the stream.
        pub fn read_into(&mut self, dst: &mut [u8]) -> Result<()> {
            let src = self.take(dst.len())?;
            dst.copy_from_slice(src);
            Ok(())
        }

        /// Reads a little-endian u32.
        pub fn read_u32(&mut self) -> Result<u32> {
            let mut raw = [0u8; 4];
            self.read_into(&mut raw)?;
            Ok(u32::from_le_bytes(raw))
        }

        /// Reads a little-endian i32.
        pub fn read_i32(&mut self) -> Result<i32> {
            let mut raw = [0u8; 4];
            self.read_into(&mut raw)?;
            Ok(i32::from_le_bytes(raw))
        }

        /// Reads a single byte.
        pub fn read_u8(&mut self) -> Result<u8> {
            Ok(self.take(1)?[0])
        }

        /// Reads an unsigned varint.
        pub fn read_var(&mut self) -> Result<u64> {
            let mut off = self.rd;
            let v = var::decode_u64(&self.buf, &mut off)?;
            self.rd = off;
            Ok(v)
        }

        /// Reads a varint length prefix and the bytes it announces.
        pub fn read_len_prefixed(&mut self) -> Result<Vec<u8>> {
            let len = usize::try_from(self.read_var()?)
                .map_err(|_| DbError::Corruption("length prefix exceeds usize"))?;
            Ok(self.take(len)?.to_vec())
        }
    }

    impl fmt::Debug for ByteStream {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("ByteStream")
                .field("len", &self.buf.len())
                .field("rd", &self.rd)
                .finish()
        }
    }
}

pub use stream::ByteStream;
