//! Large-object (BLOB/CLOB) values carried beside the fixed record layout.
//!
//! Each LOB field reserves a fixed flat region in the record. Small payloads
//! live there directly; larger ones move to a heap allocation owned by the
//! field's [`LobCell`]. Before a record travels through a channel that only
//! understands the fixed layout, [`LobRegistry::spill`] moves every payload
//! into a side stream; [`LobRegistry::restore`] brings them back.

mod cell;
mod registry;

pub use cell::{LobBuf, LobCell, LobSlot, LobTag};
pub use registry::{FieldScan, LobDescriptor, LobLookup, LobRegistry, LobTransfer};
