use objmeta_types::{ObjectId, OBJECT_ID_LEN};

const TAG_EMPTY: u8 = 0;
const TAG_OCCUPIED: u8 = 1;

/// A flat, zero-initialized array of fixed-width hash slots.
///
/// Slot layout:
/// ```text
/// [1 byte: occupancy tag][20 bytes: object id][width bytes: payload]
/// ```
///
/// Slots are only ever addressed as `index * stride`; the buffer never hands
/// out typed views of its memory. An explicit tag marks occupancy so the
/// all-zero id remains a usable key.
#[derive(Clone)]
pub struct SlotBuffer {
    bytes: Vec<u8>,
    stride: usize,
    width: usize,
}

impl SlotBuffer {
    /// Allocate `slots` empty slots, each holding a `width`-byte payload.
    pub fn zeroed(slots: usize, width: usize) -> Self {
        let stride = 1 + OBJECT_ID_LEN + width;
        Self {
            bytes: vec![0u8; slots * stride],
            stride,
            width,
        }
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.bytes.len() / self.stride
    }

    /// Returns `true` if the buffer has no slots at all.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Bytes per slot, tag included.
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Payload width in bytes.
    pub fn width(&self) -> usize {
        self.width
    }

    fn start(&self, index: usize) -> usize {
        index * self.stride
    }

    /// Whether slot `index` holds an entry.
    pub fn is_occupied(&self, index: usize) -> bool {
        self.bytes[self.start(index)] == TAG_OCCUPIED
    }

    /// Raw id bytes stored in slot `index`.
    pub fn id_bytes(&self, index: usize) -> &[u8] {
        let start = self.start(index) + 1;
        &self.bytes[start..start + OBJECT_ID_LEN]
    }

    /// Payload bytes stored in slot `index`.
    pub fn payload(&self, index: usize) -> &[u8] {
        let start = self.start(index) + 1 + OBJECT_ID_LEN;
        &self.bytes[start..start + self.width]
    }

    /// Mutable payload bytes of slot `index`.
    pub fn payload_mut(&mut self, index: usize) -> &mut [u8] {
        let start = self.start(index) + 1 + OBJECT_ID_LEN;
        let width = self.width;
        &mut self.bytes[start..start + width]
    }

    /// The entry in slot `index`, or `None` if the slot is empty.
    pub fn get(&self, index: usize) -> Option<(ObjectId, &[u8])> {
        if !self.is_occupied(index) {
            return None;
        }
        let mut id = [0u8; OBJECT_ID_LEN];
        id.copy_from_slice(self.id_bytes(index));
        Some((ObjectId::from_hash(id), self.payload(index)))
    }

    /// Bind `id` and `payload` to slot `index`, marking it occupied.
    pub fn occupy(&mut self, index: usize, id: &ObjectId, payload: &[u8]) {
        let start = self.start(index);
        let end = start + self.stride;
        let slot = &mut self.bytes[start..end];
        slot[0] = TAG_OCCUPIED;
        slot[1..1 + OBJECT_ID_LEN].copy_from_slice(id.as_bytes());
        slot[1 + OBJECT_ID_LEN..].copy_from_slice(payload);
    }

    /// Whether slot `index` is empty. Cheaper than [`SlotBuffer::get`].
    pub fn is_vacant(&self, index: usize) -> bool {
        self.bytes[self.start(index)] == TAG_EMPTY
    }
}

impl std::fmt::Debug for SlotBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotBuffer")
            .field("slots", &self.len())
            .field("width", &self.width)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zeroed_slots_are_vacant() {
        let buf = SlotBuffer::zeroed(4, 8);
        assert_eq!(buf.len(), 4);
        assert_eq!(buf.stride(), 29);
        assert!((0..4).all(|i| buf.is_vacant(i)));
        assert!(buf.get(2).is_none());
    }

    #[test]
    fn occupy_then_read_back() {
        let mut buf = SlotBuffer::zeroed(3, 4);
        let id = ObjectId::from_bytes(b"slot");
        buf.occupy(1, &id, &[1, 2, 3, 4]);

        assert!(buf.is_occupied(1));
        assert!(buf.is_vacant(0));
        assert!(buf.is_vacant(2));
        let (read_id, payload) = buf.get(1).unwrap();
        assert_eq!(read_id, id);
        assert_eq!(payload, &[1, 2, 3, 4]);
    }

    #[test]
    fn null_id_is_a_real_key() {
        let mut buf = SlotBuffer::zeroed(1, 1);
        buf.occupy(0, &ObjectId::null(), &[0]);
        assert_eq!(buf.get(0).unwrap().0, ObjectId::null());
    }

    #[test]
    fn payload_mut_overwrites_in_place() {
        let mut buf = SlotBuffer::zeroed(2, 2);
        buf.occupy(0, &ObjectId::from_bytes(b"a"), &[9, 9]);
        buf.payload_mut(0).copy_from_slice(&[7, 8]);
        assert_eq!(buf.payload(0), &[7, 8]);
        assert!(buf.is_vacant(1));
    }

    #[test]
    fn zero_slots() {
        let buf = SlotBuffer::zeroed(0, 4);
        assert!(buf.is_empty());
        assert_eq!(buf.len(), 0);
    }
}
