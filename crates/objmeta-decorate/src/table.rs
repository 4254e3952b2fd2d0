use objmeta_types::ObjectId;
use tracing::trace;

use crate::slots::SlotBuffer;

/// How an [`ObjectHashTable`] picks its next capacity.
///
/// The next capacity is `(old + floor) * numerator / denominator`: the
/// additive floor keeps small tables from reallocating over and over, and the
/// multiplicative factor bounds the overshoot on large ones.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GrowthPolicy {
    pub floor: usize,
    pub numerator: usize,
    pub denominator: usize,
}

impl Default for GrowthPolicy {
    fn default() -> Self {
        Self {
            floor: 1000,
            numerator: 3,
            denominator: 2,
        }
    }
}

impl GrowthPolicy {
    /// Capacity to grow to from `old`. Always strictly larger than `old`.
    pub fn next_capacity(&self, old: usize) -> usize {
        let next = (old + self.floor) * self.numerator / self.denominator.max(1);
        next.max(old + 1)
    }
}

/// Outcome of [`ObjectHashTable::insert`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Insert {
    /// The id was not present; a new slot was bound.
    Added,
    /// The id was present; its payload was overwritten. Holds the old payload.
    Replaced(Vec<u8>),
}

enum Probe {
    Vacant(usize),
    Found(usize),
}

/// Open-addressing hash table from [`ObjectId`] to a fixed-width payload.
///
/// The bucket for an id is its first four bytes read as a big-endian `u32`,
/// modulo the capacity; collisions are resolved by forward linear probing
/// with wrap-around. Ids are hash output, so the prefix needs no further
/// mixing. Entries are never removed, which means an empty slot always
/// terminates a probe sequence.
///
/// The load factor is kept at or below 2/3 by growing before an insert that
/// would exceed it.
pub struct ObjectHashTable {
    slots: SlotBuffer,
    len: usize,
    growth: GrowthPolicy,
}

impl ObjectHashTable {
    /// Create an empty table holding `width`-byte payloads.
    ///
    /// No slots are allocated until the first insert.
    pub fn new(width: usize) -> Self {
        Self::with_growth(width, GrowthPolicy::default())
    }

    /// Create an empty table with a custom growth policy.
    pub fn with_growth(width: usize, growth: GrowthPolicy) -> Self {
        Self {
            slots: SlotBuffer::zeroed(0, width),
            len: 0,
            growth,
        }
    }

    /// Payload width in bytes.
    pub fn width(&self) -> usize {
        self.slots.width()
    }

    /// Number of slots currently allocated.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if no entries have been inserted.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Insert or overwrite the payload for `id`.
    ///
    /// # Panics
    ///
    /// Panics if `payload.len()` differs from the table's width.
    pub fn insert(&mut self, id: &ObjectId, payload: &[u8]) -> Insert {
        self.check_width(payload);
        self.reserve_one();
        match self.probe_for_insert(id) {
            Probe::Vacant(index) => {
                self.slots.occupy(index, id, payload);
                self.len += 1;
                Insert::Added
            }
            Probe::Found(index) => {
                let previous = self.slots.payload(index).to_vec();
                self.slots.payload_mut(index).copy_from_slice(payload);
                Insert::Replaced(previous)
            }
        }
    }

    /// Insert or overwrite the payload for `id`, copying any previous payload
    /// into `previous` instead of allocating.
    ///
    /// Returns `true` if the id was newly added, `false` if it was overwritten.
    /// `previous` is left untouched when the id was new.
    ///
    /// # Panics
    ///
    /// Panics if `payload` (or `previous`, when given) is not exactly the
    /// table's width.
    pub fn insert_with_previous(
        &mut self,
        id: &ObjectId,
        payload: &[u8],
        previous: Option<&mut [u8]>,
    ) -> bool {
        self.check_width(payload);
        self.reserve_one();
        match self.probe_for_insert(id) {
            Probe::Vacant(index) => {
                self.slots.occupy(index, id, payload);
                self.len += 1;
                true
            }
            Probe::Found(index) => {
                if let Some(out) = previous {
                    out.copy_from_slice(self.slots.payload(index));
                }
                self.slots.payload_mut(index).copy_from_slice(payload);
                false
            }
        }
    }

    /// Look up the payload for `id`.
    pub fn get(&self, id: &ObjectId) -> Option<&[u8]> {
        match self.probe(id)? {
            Probe::Found(index) => Some(self.slots.payload(index)),
            Probe::Vacant(_) => None,
        }
    }

    /// Whether `id` has an entry.
    pub fn contains(&self, id: &ObjectId) -> bool {
        self.get(id).is_some()
    }

    /// Iterate occupied entries in slot order.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            slots: &self.slots,
            index: 0,
        }
    }

    fn check_width(&self, payload: &[u8]) {
        assert_eq!(
            payload.len(),
            self.width(),
            "payload width mismatch for decoration table"
        );
    }

    fn bucket(id: &ObjectId, capacity: usize) -> usize {
        let b = id.as_bytes();
        let prefix = u32::from_be_bytes([b[0], b[1], b[2], b[3]]);
        prefix as usize % capacity
    }

    /// Walk the probe sequence for `id`. `None` means the table has no slots,
    /// or every slot was visited without finding `id` or a vacancy.
    fn probe(&self, id: &ObjectId) -> Option<Probe> {
        let capacity = self.capacity();
        if capacity == 0 {
            return None;
        }
        let mut index = Self::bucket(id, capacity);
        for _ in 0..capacity {
            if self.slots.is_vacant(index) {
                return Some(Probe::Vacant(index));
            }
            if self.slots.id_bytes(index) == id.as_bytes() {
                return Some(Probe::Found(index));
            }
            index += 1;
            if index == capacity {
                index = 0;
            }
        }
        None
    }

    fn probe_for_insert(&self, id: &ObjectId) -> Probe {
        self.probe(id)
            .unwrap_or_else(|| panic!("BUG: decoration table has no free slot after growth"))
    }

    fn reserve_one(&mut self) {
        while self.len + 1 > self.capacity() * 2 / 3 {
            self.grow();
        }
    }

    fn grow(&mut self) {
        let old_capacity = self.capacity();
        let new_capacity = self.growth.next_capacity(old_capacity);
        let fresh = SlotBuffer::zeroed(new_capacity, self.width());
        let old = std::mem::replace(&mut self.slots, fresh);
        let old_len = self.len;

        self.len = 0;
        for index in 0..old.len() {
            let Some((id, payload)) = old.get(index) else {
                continue;
            };
            match self.probe_for_insert(&id) {
                Probe::Vacant(slot) => {
                    self.slots.occupy(slot, &id, payload);
                    self.len += 1;
                }
                Probe::Found(_) => panic!("BUG: duplicate id {id} found while rehashing"),
            }
        }

        assert_eq!(
            self.len, old_len,
            "BUG: decoration table lost entries while rehashing"
        );
        trace!(old_capacity, new_capacity, entries = self.len, "grew decoration table");
    }
}

impl std::fmt::Debug for ObjectHashTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectHashTable")
            .field("width", &self.width())
            .field("capacity", &self.capacity())
            .field("len", &self.len)
            .finish()
    }
}

/// Iterator over the occupied entries of an [`ObjectHashTable`].
pub struct Iter<'a> {
    slots: &'a SlotBuffer,
    index: usize,
}

impl<'a> Iterator for Iter<'a> {
    type Item = (ObjectId, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        while self.index < self.slots.len() {
            let index = self.index;
            self.index += 1;
            if let Some(entry) = self.slots.get(index) {
                return Some(entry);
            }
        }
        None
    }
}
