use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Content-addressed table with explicit collision chains
///
/// Entries live in an arena (`entries`) and are never moved or removed, so the position of an
/// entry is a stable handle. Each bucket points at the most recently inserted entry hashing to
/// it, and each entry points at the next entry in the same bucket.
#[derive(Debug, Clone)]
pub struct InternTable<K, V> {
    entries: Vec<InternEntry<K, V>>,
    buckets: Vec<Option<usize>>,
}

#[derive(Debug, Clone)]
struct InternEntry<K, V> {
    key: K,
    value: V,
    hash: u32,
    next: Option<usize>,
}

const INITIAL_BUCKETS: usize = 256;

impl<K: Hash + Eq, V: Copy> InternTable<K, V> {
    pub fn new() -> InternTable<K, V> {
        InternTable {
            entries: vec![],
            buckets: vec![None; INITIAL_BUCKETS],
        }
    }

    /// Deterministic, non-negative hash of a key
    ///
    /// `DefaultHasher::new()` always uses the same keys, so equal inputs hash identically
    /// across sessions.
    pub fn hash_of(key: &K) -> u32 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as u32) & 0x7FFF_FFFF
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up the value associated with a key
    pub fn get(&self, key: &K) -> Option<V> {
        let hash = Self::hash_of(key);
        let mut cursor = self.buckets[hash as usize % self.buckets.len()];
        while let Some(entry_idx) = cursor {
            let entry = &self.entries[entry_idx];
            if entry.hash == hash && &entry.key == key {
                return Some(entry.value);
            }
            cursor = entry.next;
        }
        None
    }

    /// Insert a key, unless an equal key is already present
    ///
    /// Returns the value now associated with the key (which is the old value if the key was
    /// already there).
    pub fn insert(&mut self, key: K, value: V) -> V {
        if let Some(existing) = self.get(&key) {
            return existing;
        }
        if self.entries.len() * 4 >= self.buckets.len() * 3 {
            self.rehash(self.buckets.len() * 2 + 1);
        }

        let hash = Self::hash_of(&key);
        let bucket = hash as usize % self.buckets.len();
        let entry_idx = self.entries.len();
        self.entries.push(InternEntry {
            key,
            value,
            hash,
            next: self.buckets[bucket],
        });
        self.buckets[bucket] = Some(entry_idx);
        value
    }

    /// Find the value for a key, computing and inserting it if missing
    pub fn get_or_insert_with<E>(
        &mut self,
        key: K,
        make_value: impl FnOnce(&mut Self) -> Result<V, E>,
    ) -> Result<V, E> {
        if let Some(existing) = self.get(&key) {
            return Ok(existing);
        }
        let value = make_value(self)?;
        Ok(self.insert(key, value))
    }

    fn rehash(&mut self, bucket_count: usize) {
        self.buckets = vec![None; bucket_count];
        for entry_idx in 0..self.entries.len() {
            let bucket = self.entries[entry_idx].hash as usize % bucket_count;
            self.entries[entry_idx].next = self.buckets[bucket];
            self.buckets[bucket] = Some(entry_idx);
        }
    }
}

impl<K: Hash + Eq, V: Copy> Default for InternTable<K, V> {
    fn default() -> Self {
        InternTable::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn first_insert_wins() {
        let mut table = InternTable::new();
        assert_eq!(table.insert("a", 1), 1);
        assert_eq!(table.insert("b", 2), 2);
        assert_eq!(table.insert("a", 3), 1);
        assert_eq!(table.get(&"a"), Some(1));
        assert_eq!(table.get(&"c"), None);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn survives_growth() {
        let mut table = InternTable::new();
        for i in 0..2000u32 {
            table.insert(i, i * 2);
        }
        for i in 0..2000u32 {
            assert_eq!(table.get(&i), Some(i * 2));
        }
        assert_eq!(table.get(&2000), None);
    }

    #[test]
    fn get_or_insert_only_computes_once() {
        let mut table: InternTable<&str, usize> = InternTable::new();
        let mut calls = 0;
        for _ in 0..3 {
            let value = table
                .get_or_insert_with("key", |t| -> Result<usize, ()> {
                    calls += 1;
                    Ok(t.len() + 10)
                })
                .unwrap();
            assert_eq!(value, 10);
        }
        assert_eq!(calls, 1);
    }
}
