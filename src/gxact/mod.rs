//! The shared GXact table: a fixed-capacity slab of global-transaction
//! descriptors with a freelist, a dense active index, and a single
//! reader-writer lock protecting structural changes (spec.md §4.2).

pub mod descriptor;
pub mod table;

pub use descriptor::{DummyProc, GXact};
pub use table::{GXactRef, GXactSnapshot, GXactTable};
