//! Persistent metadata caches keyed by object id.
//!
//! A [`MetadataCache`] maps [`ObjectId`]s to fixed-width byte payloads. Values
//! computed by earlier processes are read from a sorted record file; values
//! added by this process live in an in-memory [`ObjectHashTable`] overlay and
//! are merged back into the file at shutdown.
//!
//! # Architecture
//!
//! - [`format`]: the 32-byte file header codec
//! - [`records`]: fixed-stride sorted record arrays and binary search
//! - [`disk`]: validated read-only view of a cache file (mmap or buffered)
//! - [`merge`]: newer-wins two-way merge of sorted record sets
//! - [`writer`]: temp-file-then-rename write-back
//! - [`validity`]: fingerprints that invalidate a whole file
//! - [`registry`]: ordered shutdown flushing of every initialized cache
//! - [`cache`]: the cache handle tying it together
//!
//! A file that is missing, truncated, written with another width, or stamped
//! with a stale fingerprint is never an error for readers: the cache simply
//! starts empty.
//!
//! [`ObjectId`]: objmeta_types::ObjectId
//! [`ObjectHashTable`]: objmeta_decorate::ObjectHashTable

pub mod cache;
pub mod config;
pub mod disk;
pub mod error;
pub mod format;
pub mod merge;
pub mod records;
pub mod registry;
pub mod validity;
pub mod writer;

pub use cache::{CacheStats, MetadataCache};
pub use config::{CacheConfig, ReadMode};
pub use disk::DiskRecords;
pub use error::{CacheError, CacheResult};
pub use format::{CacheHeader, HEADER_LEN, MAGIC, VERSION};
pub use merge::{merge_records, MergeStats};
pub use records::{record_size, RecordBuffer, RecordSlice};
pub use registry::{FlushGuard, FlushOutcome, FlushRegistry, FlushReport, Flushable};
pub use validity::{graph_validity, Fingerprint, ValidityHasher, ValidityProvider, FINGERPRINT_LEN};
pub use writer::write_cache_file;
