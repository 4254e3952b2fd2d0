//! Object decorations: attach fixed-width data to object ids in memory.
//!
//! # Architecture
//!
//! - [`SlotBuffer`]: contiguous fixed-stride slot storage
//! - [`ObjectHashTable`]: open-addressing table from [`ObjectId`] to a
//!   `width`-byte payload, grown by full rehash
//! - [`Decoration`]: owned values of any type keyed by object id, built on
//!   the byte table
//!
//! The table never deletes entries. Ids are assumed to be hash output, so a
//! four-byte prefix serves directly as the bucket index.
//!
//! [`ObjectId`]: objmeta_types::ObjectId

pub mod decoration;
pub mod slots;
pub mod table;

pub use decoration::Decoration;
pub use slots::SlotBuffer;
pub use table::{GrowthPolicy, Insert, Iter, ObjectHashTable};
