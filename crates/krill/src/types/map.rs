//! Map objects: open-addressed hash tables over `(Value, Value)` entries.
//!
//! Probing is linear. A vacant slot has an `Undefined` key with a `False`
//! value; a tombstone has an `Undefined` key with a `True` value so probe
//! chains survive deletion. Occupancy is capped at [`MAP_LOAD_PERCENT`] of
//! capacity; capacity grows by [`CAPACITY_GROW_FACTOR`] from
//! [`MIN_CAPACITY`].
//!
//! Key equality must chase strings and ranges through the heap, so the
//! mutating operations are heap-level functions: they detach the entry array
//! from the arena, probe with a shared heap borrow, and reattach.

use crate::{
    error::ObjectError,
    heap::{Heap, HeapId},
    types::{CAPACITY_GROW_FACTOR, MIN_CAPACITY},
    value::{Value, value_eq, value_hash},
};

/// Occupancy ceiling before the table grows.
pub const MAP_LOAD_PERCENT: f64 = 0.8;

/// One slot of the open-addressed table.
#[derive(Debug, Clone, Copy)]
pub struct MapEntry {
    pub key: Value,
    pub value: Value,
}

const VACANT: MapEntry = MapEntry {
    key: Value::Undefined,
    value: Value::False,
};

const TOMBSTONE: MapEntry = MapEntry {
    key: Value::Undefined,
    value: Value::True,
};

/// A map object. `count` tracks live entries; `entries.len()` is capacity.
#[derive(Debug, Default)]
pub struct ObjMap {
    entries: Vec<MapEntry>,
    count: usize,
}

impl ObjMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.count
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// Iterates live entries in slot order.
    pub fn iter(&self) -> impl Iterator<Item = &MapEntry> {
        self.entries.iter().filter(|e| !e.key.is_undefined())
    }
}

enum Probe {
    /// The key is present at this slot.
    Found(usize),
    /// The key is absent; this is the slot to insert into.
    Vacant(usize),
}

fn probe(heap: &Heap, entries: &[MapEntry], key: Value, hash: u32) -> Probe {
    debug_assert!(!entries.is_empty());
    let capacity = entries.len();
    let mut index = hash as usize % capacity;
    let mut first_tombstone = None;
    loop {
        let entry = &entries[index];
        if entry.key.is_undefined() {
            if matches!(entry.value, Value::True) {
                // Tombstone: remember it, keep probing.
                first_tombstone.get_or_insert(index);
            } else {
                // Truly vacant: the key is not in the table.
                return Probe::Vacant(first_tombstone.unwrap_or(index));
            }
        } else if value_eq(heap, entry.key, key) {
            return Probe::Found(index);
        }
        index = (index + 1) % capacity;
    }
}

fn grown_capacity(capacity: usize) -> usize {
    if capacity == 0 {
        MIN_CAPACITY
    } else {
        capacity * CAPACITY_GROW_FACTOR
    }
}

fn byte_size(entries: &[MapEntry]) -> usize {
    entries.len() * std::mem::size_of::<MapEntry>()
}

/// Rebuilds the table at `new_capacity`, rehashing every live entry.
fn resize(heap: &mut Heap, map_id: HeapId, new_capacity: usize) {
    let old_entries = std::mem::take(&mut heap.map_mut(map_id).entries);
    let mut new_entries = vec![VACANT; new_capacity];
    for entry in &old_entries {
        if entry.key.is_undefined() {
            continue;
        }
        let hash = value_hash(heap, entry.key).expect("stored map key must be hashable");
        match probe(heap, &new_entries, entry.key, hash) {
            Probe::Vacant(slot) => new_entries[slot] = *entry,
            Probe::Found(_) => unreachable!("duplicate key while rehashing"),
        }
    }
    heap.note_resize(byte_size(&old_entries), byte_size(&new_entries));
    heap.map_mut(map_id).entries = new_entries;
}

/// Inserts or overwrites `key`. Errors if the key is unhashable.
pub fn map_set(heap: &mut Heap, map_id: HeapId, key: Value, value: Value) -> Result<(), ObjectError> {
    let hash = value_hash(heap, key).ok_or(ObjectError::UnhashableKey)?;
    let (count, capacity) = {
        let map = heap.map(map_id);
        (map.count, map.capacity())
    };
    if (count + 1) as f64 > capacity as f64 * MAP_LOAD_PERCENT {
        resize(heap, map_id, grown_capacity(capacity));
    }

    let entries = std::mem::take(&mut heap.map_mut(map_id).entries);
    let slot = probe(heap, &entries, key, hash);
    let map = heap.map_mut(map_id);
    map.entries = entries;
    match slot {
        Probe::Found(index) => map.entries[index].value = value,
        Probe::Vacant(index) => {
            map.entries[index] = MapEntry { key, value };
            map.count += 1;
        }
    }
    Ok(())
}

/// Looks up `key`; `None` when absent or unhashable.
#[must_use]
pub fn map_get(heap: &Heap, map_id: HeapId, key: Value) -> Option<Value> {
    let map = heap.map(map_id);
    if map.is_empty() {
        return None;
    }
    let hash = value_hash(heap, key)?;
    match probe(heap, &map.entries, key, hash) {
        Probe::Found(index) => Some(map.entries[index].value),
        Probe::Vacant(_) => None,
    }
}

/// Removes `key`, returning its value. The slot becomes a tombstone; the
/// table shrinks once occupancy drops below a quarter of capacity.
pub fn map_remove(heap: &mut Heap, map_id: HeapId, key: Value) -> Option<Value> {
    if heap.map(map_id).is_empty() {
        return None;
    }
    let hash = value_hash(heap, key)?;
    let entries = std::mem::take(&mut heap.map_mut(map_id).entries);
    let slot = probe(heap, &entries, key, hash);
    let map = heap.map_mut(map_id);
    map.entries = entries;
    let value = match slot {
        Probe::Found(index) => {
            let value = map.entries[index].value;
            map.entries[index] = TOMBSTONE;
            map.count -= 1;
            value
        }
        Probe::Vacant(_) => return None,
    };
    let (count, capacity) = (map.count, map.capacity());
    let quarter = capacity / CAPACITY_GROW_FACTOR;
    if quarter > count && quarter >= MIN_CAPACITY {
        resize(heap, map_id, quarter);
    }
    Some(value)
}

/// Drops every entry and releases the backing store.
pub fn map_clear(heap: &mut Heap, map_id: HeapId) {
    let old = byte_size(&heap.map(map_id).entries);
    let map = heap.map_mut(map_id);
    map.entries = Vec::new();
    map.count = 0;
    heap.note_resize(old, 0);
}
