use objmeta_types::ObjectId;

use crate::table::{Insert, ObjectHashTable};

const HANDLE_WIDTH: usize = 8;

/// Attach an arbitrary owned value to an object id.
///
/// This is the "pointer-width" flavour of the decoration table: the hash
/// table stores an 8-byte handle into an owned arena of values, so callers
/// can decorate objects with any `T` while the table itself stays a plain
/// byte-payload table. Values are never removed, only replaced.
pub struct Decoration<T> {
    handles: ObjectHashTable,
    values: Vec<T>,
}

impl<T> Decoration<T> {
    /// Create an empty decoration.
    pub fn new() -> Self {
        Self {
            handles: ObjectHashTable::new(HANDLE_WIDTH),
            values: Vec::new(),
        }
    }

    /// Number of decorated objects.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` if nothing has been decorated.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Decorate `id` with `value`, returning the value it replaces.
    pub fn add(&mut self, id: &ObjectId, value: T) -> Option<T> {
        if let Some(handle) = self.handle(id) {
            return Some(std::mem::replace(&mut self.values[handle], value));
        }
        let handle = self.values.len();
        self.values.push(value);
        let outcome = self.handles.insert(id, &(handle as u64).to_be_bytes());
        debug_assert_eq!(outcome, Insert::Added);
        None
    }

    /// The value attached to `id`.
    pub fn get(&self, id: &ObjectId) -> Option<&T> {
        self.handle(id).map(|handle| &self.values[handle])
    }

    /// Mutable access to the value attached to `id`.
    pub fn get_mut(&mut self, id: &ObjectId) -> Option<&mut T> {
        let handle = self.handle(id)?;
        Some(&mut self.values[handle])
    }

    /// Iterate `(id, value)` pairs in table order.
    pub fn iter(&self) -> impl Iterator<Item = (ObjectId, &T)> + '_ {
        self.handles
            .iter()
            .map(move |(id, raw)| (id, &self.values[decode_handle(raw)]))
    }

    fn handle(&self, id: &ObjectId) -> Option<usize> {
        self.handles.get(id).map(decode_handle)
    }
}

impl<T> Default for Decoration<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for Decoration<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Decoration")
            .field("len", &self.len())
            .field("table", &self.handles)
            .finish()
    }
}

fn decode_handle(raw: &[u8]) -> usize {
    let mut buf = [0u8; HANDLE_WIDTH];
    buf.copy_from_slice(raw);
    u64::from_be_bytes(buf) as usize
}
