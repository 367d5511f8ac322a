//! Low-level primitives shared by the record and LOB layers.

/// Byte-level utilities: varints and the spill/serialization stream buffer.
pub mod bytes;
