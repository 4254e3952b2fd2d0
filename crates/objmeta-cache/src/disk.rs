use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use memmap2::Mmap;
use objmeta_types::ObjectId;
use tracing::{debug, warn};

use crate::config::ReadMode;
use crate::error::{CacheError, CacheResult};
use crate::format::{CacheHeader, HEADER_LEN};
use crate::records::{record_size, RecordSlice};
use crate::validity::Fingerprint;

enum Backing {
    Empty,
    Mapped(Mmap),
    Owned(Vec<u8>),
}

/// The validated, read-only record set of one cache file.
///
/// Either a private read-only mapping of the file or an owned copy of its
/// bytes, depending on [`ReadMode`]. Both are searched the same way. The
/// contents are a snapshot taken at open time; later renames over the path
/// are not observed.
pub struct DiskRecords {
    backing: Backing,
    width: usize,
    header: Option<CacheHeader>,
}

impl DiskRecords {
    /// No records; the cold-start state.
    pub fn empty(width: usize) -> Self {
        Self {
            backing: Backing::Empty,
            width,
            header: None,
        }
    }

    /// Open and validate the cache file at `path`.
    ///
    /// Never fails: a missing, unreadable, short, foreign, or stale file
    /// yields an empty record set, and the reason is logged.
    pub fn open(path: &Path, width: usize, expected: &Fingerprint, mode: ReadMode) -> Self {
        match Self::try_open(path, width, expected, mode) {
            Ok(Some(records)) => {
                debug!(
                    path = %path.display(),
                    records = records.len(),
                    mapped = records.is_mapped(),
                    "opened cache file"
                );
                records
            }
            Ok(None) => {
                debug!(path = %path.display(), "no cache file; starting cold");
                Self::empty(width)
            }
            Err(e @ CacheError::FingerprintMismatch { .. }) => {
                debug!(path = %path.display(), error = %e, "cache invalidated; starting cold");
                Self::empty(width)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring cache file");
                Self::empty(width)
            }
        }
    }

    /// Like [`DiskRecords::open`] but reporting why a file was rejected.
    ///
    /// Returns `Ok(None)` when the file does not exist.
    pub fn try_open(
        path: &Path,
        width: usize,
        expected: &Fingerprint,
        mode: ReadMode,
    ) -> CacheResult<Option<Self>> {
        let mut file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let len = file.metadata()?.len() as usize;
        if len < HEADER_LEN {
            return Err(CacheError::Short { len });
        }

        let backing = match mode {
            // SAFETY: the mapping is read-only and private. Writers never
            // modify a cache file in place; they rename a new file over it,
            // which leaves this mapping's inode untouched.
            ReadMode::Mmap => Backing::Mapped(unsafe { Mmap::map(&file)? }),
            ReadMode::Buffered => {
                let mut data = Vec::with_capacity(len);
                file.read_to_end(&mut data)?;
                Backing::Owned(data)
            }
        };

        Self::from_backing(backing, width, expected).map(Some)
    }

    /// Validate an in-memory copy of a cache file.
    pub fn from_bytes(data: Vec<u8>, width: usize, expected: &Fingerprint) -> CacheResult<Self> {
        Self::from_backing(Backing::Owned(data), width, expected)
    }

    fn from_backing(backing: Backing, width: usize, expected: &Fingerprint) -> CacheResult<Self> {
        let bytes: &[u8] = match &backing {
            Backing::Empty => &[],
            Backing::Mapped(map) => map,
            Backing::Owned(data) => data,
        };
        let header = CacheHeader::decode(bytes)?;
        header.validate(width as u32, expected)?;

        let trailing = (bytes.len() - HEADER_LEN) % record_size(width);
        if trailing != 0 {
            warn!(trailing, "cache file ends in a partial record; ignoring it");
        }

        Ok(Self {
            backing,
            width,
            header: Some(header),
        })
    }

    fn bytes(&self) -> &[u8] {
        match &self.backing {
            Backing::Empty => &[],
            Backing::Mapped(map) => map,
            Backing::Owned(data) => data,
        }
    }

    /// The records following the header.
    pub fn records(&self) -> RecordSlice<'_> {
        match self.bytes().get(HEADER_LEN..) {
            Some(rest) => RecordSlice::new(rest, self.width),
            None => RecordSlice::empty(self.width),
        }
    }

    /// Binary search for `id`.
    pub fn find(&self, id: &ObjectId) -> Option<&[u8]> {
        self.records().find(id)
    }

    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The validated header, if a file was loaded.
    pub fn header(&self) -> Option<&CacheHeader> {
        self.header.as_ref()
    }

    pub fn is_mapped(&self) -> bool {
        matches!(self.backing, Backing::Mapped(_))
    }
}

impl std::fmt::Debug for DiskRecords {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskRecords")
            .field("records", &self.len())
            .field("width", &self.width)
            .field("mapped", &self.is_mapped())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::RecordBuffer;
    use crate::validity::FINGERPRINT_LEN;

    fn id(byte: u8) -> ObjectId {
        ObjectId::from_hash([byte; 20])
    }

    fn cache_bytes(width: u32, fingerprint: Fingerprint, keys: &[u8]) -> Vec<u8> {
        let mut bytes = CacheHeader::new(width, fingerprint).encode().to_vec();
        let mut records = RecordBuffer::with_capacity(width as usize, keys.len());
        for &k in keys {
            records.push(&id(k), &vec![k; width as usize]);
        }
        bytes.extend_from_slice(records.as_slice().as_bytes());
        bytes
    }

    #[test]
    fn from_bytes_finds_records() {
        let data = cache_bytes(3, Fingerprint::zero(), &[1, 4, 9]);
        let disk = DiskRecords::from_bytes(data, 3, &Fingerprint::zero()).unwrap();
        assert_eq!(disk.len(), 3);
        assert_eq!(disk.find(&id(4)), Some(&[4, 4, 4][..]));
        assert!(disk.find(&id(5)).is_none());
        assert_eq!(disk.header().unwrap().width, 3);
    }

    #[test]
    fn header_only_file_has_no_records() {
        let data = cache_bytes(3, Fingerprint::zero(), &[]);
        let disk = DiskRecords::from_bytes(data, 3, &Fingerprint::zero()).unwrap();
        assert!(disk.is_empty());
    }

    #[test]
    fn stale_fingerprint_is_rejected() {
        let written = Fingerprint::from_bytes([1; FINGERPRINT_LEN]);
        let current = Fingerprint::from_bytes([2; FINGERPRINT_LEN]);
        let data = cache_bytes(3, written, &[1]);
        let err = DiskRecords::from_bytes(data, 3, &current).unwrap_err();
        assert!(matches!(err, CacheError::FingerprintMismatch { .. }));
    }

    #[test]
    fn missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let result =
            DiskRecords::try_open(&dir.path().join("nope"), 4, &Fingerprint::zero(), ReadMode::Mmap)
                .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn mapped_and_buffered_agree() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache");
        std::fs::write(&path, cache_bytes(2, Fingerprint::zero(), &[2, 3, 5, 8])).unwrap();

        let mapped = DiskRecords::open(&path, 2, &Fingerprint::zero(), ReadMode::Mmap);
        let buffered = DiskRecords::open(&path, 2, &Fingerprint::zero(), ReadMode::Buffered);
        assert!(mapped.is_mapped());
        assert!(!buffered.is_mapped());
        for k in 0..10u8 {
            assert_eq!(mapped.find(&id(k)), buffered.find(&id(k)));
        }
        assert_eq!(mapped.len(), 4);
    }

    #[test]
    fn corrupt_files_open_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache");

        let cases: Vec<Vec<u8>> = vec![
            b"MTAC".to_vec(),
            {
                let mut d = cache_bytes(2, Fingerprint::zero(), &[1]);
                d[0] = b'X';
                d
            },
            {
                let mut d = cache_bytes(2, Fingerprint::zero(), &[1]);
                d[7] = 9;
                d
            },
            cache_bytes(6, Fingerprint::zero(), &[1]),
            cache_bytes(2, Fingerprint::from_bytes([4; FINGERPRINT_LEN]), &[1]),
        ];
        for data in cases {
            std::fs::write(&path, data).unwrap();
            let disk = DiskRecords::open(&path, 2, &Fingerprint::zero(), ReadMode::Mmap);
            assert!(disk.is_empty());
            assert!(disk.header().is_none());
        }
    }
}
