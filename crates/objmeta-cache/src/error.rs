use std::path::PathBuf;

use thiserror::Error;

use crate::validity::Fingerprint;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache file is short ({len} bytes)")]
    Short { len: usize },

    #[error("invalid cache magic: expected {expected}, got {actual}")]
    InvalidMagic { expected: String, actual: String },

    #[error("unsupported cache version: {0}")]
    UnsupportedVersion(u32),

    #[error("cache width mismatch: expected {expected}, file has {actual}")]
    WidthMismatch { expected: u32, actual: u32 },

    #[error("stale cache fingerprint: expected {expected}, file has {actual}")]
    FingerprintMismatch {
        expected: Fingerprint,
        actual: Fingerprint,
    },

    #[error("invalid cache name: {0:?}")]
    InvalidName(String),

    #[error("cache width {0} does not fit the on-disk format")]
    WidthTooLarge(usize),

    #[error("failed to replace cache file {}: {source}", .path.display())]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid cache configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CacheError {
    /// Whether this error means the on-disk file should be ignored and the
    /// cache started cold, as opposed to a failure of the operation itself.
    pub fn is_cold_start(&self) -> bool {
        matches!(
            self,
            Self::Short { .. }
                | Self::InvalidMagic { .. }
                | Self::UnsupportedVersion(_)
                | Self::WidthMismatch { .. }
                | Self::FingerprintMismatch { .. }
        )
    }
}

pub type CacheResult<T> = Result<T, CacheError>;
