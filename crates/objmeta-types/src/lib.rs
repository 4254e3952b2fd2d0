//! Foundation types for objmeta.
//!
//! Every other objmeta crate depends on `objmeta-types` for [`ObjectId`], the
//! 20-byte content-addressed identifier that decorations and cache records
//! are keyed by.

pub mod error;
pub mod object;

pub use error::TypeError;
pub use object::{ObjectId, OBJECT_ID_LEN};
