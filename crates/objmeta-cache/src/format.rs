use crate::error::{CacheError, CacheResult};
use crate::validity::{Fingerprint, FINGERPRINT_LEN};

/// Magic bytes at the start of every cache file.
pub const MAGIC: &[u8; 4] = b"MTAC";

/// The only supported format version.
pub const VERSION: u32 = 1;

/// Size of the fixed header preceding the records.
pub const HEADER_LEN: usize = 32;

/// Fixed 32-byte cache file header.
///
/// Layout:
/// ```text
/// [4 bytes: magic "MTAC"]
/// [4 bytes: version (big-endian u32)]
/// [4 bytes: record payload width (big-endian u32)]
/// [20 bytes: fingerprint]
/// ```
/// The sorted records follow immediately.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheHeader {
    pub version: u32,
    pub width: u32,
    pub fingerprint: Fingerprint,
}

impl CacheHeader {
    /// A current-version header.
    pub fn new(width: u32, fingerprint: Fingerprint) -> Self {
        Self {
            version: VERSION,
            width,
            fingerprint,
        }
    }

    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0..4].copy_from_slice(MAGIC);
        buf[4..8].copy_from_slice(&self.version.to_be_bytes());
        buf[8..12].copy_from_slice(&self.width.to_be_bytes());
        buf[12..HEADER_LEN].copy_from_slice(self.fingerprint.as_bytes());
        buf
    }

    /// Decode the header at the start of `data`.
    ///
    /// Checks length, magic and version; width and fingerprint are checked
    /// separately by [`CacheHeader::validate`] because they depend on the
    /// cache reading the file.
    pub fn decode(data: &[u8]) -> CacheResult<Self> {
        if data.len() < HEADER_LEN {
            return Err(CacheError::Short { len: data.len() });
        }
        if &data[0..4] != MAGIC {
            return Err(CacheError::InvalidMagic {
                expected: String::from_utf8_lossy(MAGIC).into(),
                actual: String::from_utf8_lossy(&data[0..4]).into(),
            });
        }
        let version = read_u32(&data[4..8]);
        if version != VERSION {
            return Err(CacheError::UnsupportedVersion(version));
        }
        let width = read_u32(&data[8..12]);
        let mut fingerprint = [0u8; FINGERPRINT_LEN];
        fingerprint.copy_from_slice(&data[12..HEADER_LEN]);

        Ok(Self {
            version,
            width,
            fingerprint: Fingerprint::from_bytes(fingerprint),
        })
    }

    /// Check that this header belongs to a cache of `width` whose external
    /// state currently fingerprints to `expected`.
    pub fn validate(&self, width: u32, expected: &Fingerprint) -> CacheResult<()> {
        if self.width != width {
            return Err(CacheError::WidthMismatch {
                expected: width,
                actual: self.width,
            });
        }
        if self.fingerprint != *expected {
            return Err(CacheError::FingerprintMismatch {
                expected: *expected,
                actual: self.fingerprint,
            });
        }
        Ok(())
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}
