use std::cmp::Ordering;

use objmeta_decorate::ObjectHashTable;
use objmeta_types::{ObjectId, OBJECT_ID_LEN};

/// Size of one on-disk record: a 20-byte id followed by the payload.
pub fn record_size(width: usize) -> usize {
    OBJECT_ID_LEN + width
}

/// A borrowed array of fixed-stride `[id][payload]` records.
///
/// Trailing bytes that do not form a whole record are not part of the slice.
/// Lookups assume the records are sorted by id, as cache files and
/// [`RecordBuffer::from_table`] guarantee.
#[derive(Clone, Copy)]
pub struct RecordSlice<'a> {
    bytes: &'a [u8],
    width: usize,
}

impl<'a> RecordSlice<'a> {
    pub fn new(bytes: &'a [u8], width: usize) -> Self {
        let stride = record_size(width);
        let whole = bytes.len() / stride * stride;
        Self {
            bytes: &bytes[..whole],
            width,
        }
    }

    pub fn empty(width: usize) -> Self {
        Self { bytes: &[], width }
    }

    pub fn len(&self) -> usize {
        self.bytes.len() / self.stride()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn stride(&self) -> usize {
        record_size(self.width)
    }

    /// The underlying bytes, whole records only.
    pub fn as_bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Full record `index`, id and payload.
    pub fn record(&self, index: usize) -> &'a [u8] {
        let start = index * self.stride();
        &self.bytes[start..start + self.stride()]
    }

    pub fn id_bytes(&self, index: usize) -> &'a [u8] {
        &self.record(index)[..OBJECT_ID_LEN]
    }

    pub fn payload(&self, index: usize) -> &'a [u8] {
        &self.record(index)[OBJECT_ID_LEN..]
    }

    pub fn get(&self, index: usize) -> (ObjectId, &'a [u8]) {
        let mut id = [0u8; OBJECT_ID_LEN];
        id.copy_from_slice(self.id_bytes(index));
        (ObjectId::from_hash(id), self.payload(index))
    }

    /// Binary search for `id`, returning its payload.
    pub fn find(&self, id: &ObjectId) -> Option<&'a [u8]> {
        let target: &[u8] = id.as_bytes();
        let mut lo = 0;
        let mut hi = self.len();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            match self.id_bytes(mid).cmp(target) {
                Ordering::Equal => return Some(self.payload(mid)),
                Ordering::Less => lo = mid + 1,
                Ordering::Greater => hi = mid,
            }
        }
        None
    }

    /// Whether ids are strictly ascending (sorted and duplicate-free).
    pub fn is_strictly_sorted(&self) -> bool {
        (1..self.len()).all(|i| self.id_bytes(i - 1) < self.id_bytes(i))
    }

    pub fn iter(&self) -> impl Iterator<Item = (ObjectId, &'a [u8])> + 'a {
        let slice = *self;
        (0..slice.len()).map(move |i| slice.get(i))
    }
}

impl std::fmt::Debug for RecordSlice<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordSlice")
            .field("records", &self.len())
            .field("width", &self.width)
            .finish()
    }
}

/// An owned, growable array of records.
#[derive(Clone, Debug)]
pub struct RecordBuffer {
    bytes: Vec<u8>,
    width: usize,
}

impl RecordBuffer {
    pub fn with_capacity(width: usize, records: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(records * record_size(width)),
            width,
        }
    }

    /// Flatten every entry of `table` into records sorted ascending by id.
    ///
    /// # Panics
    ///
    /// Panics if the table yields a different number of entries than it
    /// reports, which would mean its slots are corrupt.
    pub fn from_table(table: &ObjectHashTable) -> Self {
        let mut entries: Vec<(ObjectId, &[u8])> = table.iter().collect();
        assert_eq!(
            entries.len(),
            table.len(),
            "BUG: decoration table contained extra values"
        );
        entries.sort_unstable_by(|a, b| a.0.cmp(&b.0));

        let mut buffer = Self::with_capacity(table.width(), entries.len());
        for (id, payload) in entries {
            buffer.push(&id, payload);
        }
        buffer
    }

    /// Append a record. Callers keep the buffer sorted if they need lookups.
    pub fn push(&mut self, id: &ObjectId, payload: &[u8]) {
        debug_assert_eq!(payload.len(), self.width);
        self.bytes.extend_from_slice(id.as_bytes());
        self.bytes.extend_from_slice(payload);
    }

    pub fn len(&self) -> usize {
        self.bytes.len() / record_size(self.width)
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_slice(&self) -> RecordSlice<'_> {
        RecordSlice::new(&self.bytes, self.width)
    }
}
