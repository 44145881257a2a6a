// Open-addressed, linear-probed hash table keyed by Value.
//
// Used both as the VM's global-variable table and as the string-intern
// table. Capacity is always a power of two; probe step is +1 mod capacity.
// An empty slot has `key = Meta`; a tombstone has `key = Meta, value =
// Bool(true)` and counts as occupied for probing but not for load factor.

use crate::object::Heap;
use crate::value::Value;

const MAX_LOAD_FACTOR: f64 = 0.75;
const INITIAL_CAPACITY: usize = 8;

#[derive(Clone, Copy)]
struct Entry {
    key: Value,
    value: Value,
}

impl Entry {
    fn empty() -> Self {
        Entry { key: Value::Meta, value: Value::Meta }
    }

    fn is_empty(&self) -> bool {
        matches!(self.key, Value::Meta) && !matches!(self.value, Value::Bool(true))
    }

    fn is_tombstone(&self) -> bool {
        matches!(self.key, Value::Meta) && matches!(self.value, Value::Bool(true))
    }
}

pub struct Table {
    entries: Vec<Entry>,
    /// Count of live entries plus tombstones (what load factor is measured
    /// against), matching the spec's "tombstones already count" rule.
    count: usize,
}

impl Default for Table {
    fn default() -> Self {
        Self::new()
    }
}

impl Table {
    pub fn new() -> Self {
        Table { entries: Vec::new(), count: 0 }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    fn capacity(&self) -> usize {
        self.entries.len()
    }

    fn find_entry_index(entries: &[Entry], key: &Value, heap: &Heap) -> usize {
        let cap = entries.len();
        let mut index = key.hash_bits(heap) as usize % cap;
        let mut tombstone: Option<usize> = None;
        loop {
            let entry = &entries[index];
            if entry.is_empty() {
                return tombstone.unwrap_or(index);
            } else if entry.is_tombstone() {
                if tombstone.is_none() {
                    tombstone = Some(index);
                }
            } else if entry.key.values_equal(key) {
                return index;
            }
            index = (index + 1) % cap;
        }
    }

    fn grow(&mut self, heap: &Heap) {
        let new_cap = if self.entries.is_empty() { INITIAL_CAPACITY } else { self.capacity() * 2 };
        let mut new_entries = vec![Entry::empty(); new_cap];
        let mut new_count = 0;
        for entry in &self.entries {
            if entry.is_empty() || entry.is_tombstone() {
                continue;
            }
            let idx = Self::find_entry_index(&new_entries, &entry.key, heap);
            new_entries[idx] = *entry;
            new_count += 1;
        }
        self.entries = new_entries;
        self.count = new_count;
    }

    /// Inserts `key -> value`. Returns true if `key` was not already present
    /// (counting tombstone reuse as "already present" per spec: the count
    /// only increments on an empty-slot insertion).
    pub fn set(&mut self, key: Value, value: Value, heap: &Heap) -> bool {
        if self.entries.is_empty() || (self.count + 1) as f64 > self.capacity() as f64 * MAX_LOAD_FACTOR {
            self.grow(heap);
        }
        let idx = Self::find_entry_index(&self.entries, &key, heap);
        let is_new = self.entries[idx].is_empty();
        if is_new {
            self.count += 1;
        }
        self.entries[idx] = Entry { key, value };
        is_new
    }

    pub fn get(&self, key: &Value, heap: &Heap) -> Option<Value> {
        if self.entries.is_empty() {
            return None;
        }
        let idx = Self::find_entry_index(&self.entries, key, heap);
        let entry = &self.entries[idx];
        if entry.is_empty() || entry.is_tombstone() {
            None
        } else {
            Some(entry.value)
        }
    }

    /// Deletes `key`, leaving a tombstone. Does not decrement `count`.
    pub fn delete(&mut self, key: &Value, heap: &Heap) -> bool {
        if self.entries.is_empty() {
            return false;
        }
        let idx = Self::find_entry_index(&self.entries, key, heap);
        let entry = &mut self.entries[idx];
        if entry.is_empty() || entry.is_tombstone() {
            false
        } else {
            *entry = Entry { key: Value::Meta, value: Value::Bool(true) };
            true
        }
    }

    /// Specialized intern-table probe: looks a candidate string up by its
    /// raw bytes and precomputed hash without constructing a `Value`, so a
    /// not-yet-interned string can be checked before it is allocated. This
    /// is the only way to find an un-interned candidate.
    pub fn find_string(&self, chars: &str, hash: u32, heap: &Heap) -> Option<crate::object::ObjRef> {
        if self.entries.is_empty() {
            return None;
        }
        let cap = self.capacity();
        let mut index = hash as usize % cap;
        loop {
            let entry = &self.entries[index];
            if entry.is_empty() {
                return None;
            } else if let Value::Obj(o) = entry.key {
                if let Some(s) = heap.as_string(o) {
                    if s.hash == hash && s.value.as_ref() == chars {
                        return Some(o);
                    }
                }
            }
            index = (index + 1) % cap;
        }
    }

    /// Weak-key pass: removes every entry whose key object was not marked
    /// by the current GC cycle. Called between mark and sweep so interned
    /// strings cannot keep themselves alive (see `gc.rs`).
    pub fn remove_unmarked_keys(&mut self, heap: &Heap) {
        for entry in &mut self.entries {
            if let Value::Obj(o) = entry.key {
                if !heap.is_marked(o) {
                    *entry = Entry { key: Value::Meta, value: Value::Bool(true) };
                }
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.entries
            .iter()
            .filter(|e| !e.is_empty() && !e.is_tombstone())
            .map(|e| (&e.key, &e.value))
    }
}
