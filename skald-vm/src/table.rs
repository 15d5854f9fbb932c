//! The table aggregate: a separately-chained hash map keyed by strings or
//! integers.
//!
//! The two key namespaces are disjoint; the string `"7"` and the integer `7`
//! name different entries. The iteration order exposed by
//! [`Table::keys_snapshot`] is the internal chain order, which iterators
//! capture once and then walk while the table's lock counter keeps deletions
//! out.

use crate::value::Value;

/// A table key: an owned string or a signed integer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Key {
    /// String-keyed entry.
    Str(String),
    /// Integer-keyed entry.
    Int(i64),
}

impl Key {
    /// Hash of this key under the table's mixing function.
    pub fn hash(&self) -> u32 {
        match self {
            Key::Str(s) => hash_str(s),
            Key::Int(i) => hash_int(*i),
        }
    }
}

/// Per-byte mixing hash for string keys.
///
/// Precomputable, so hot opcodes can look strings up without rehashing.
pub fn hash_str(text: &str) -> u32 {
    let mut hash: u32 = 5381;
    for byte in text.bytes() {
        hash = hash.wrapping_mul(33) ^ u32::from(byte);
    }
    hash
}

/// Mixing hash for integer keys.
pub fn hash_int(key: i64) -> u32 {
    (key as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15).rotate_right(32) as u32
}

#[derive(Debug, Clone)]
struct Entry {
    hash: u32,
    key: Key,
    value: Value,
}

/// Hash table backing Skald's table values.
#[derive(Debug, Clone)]
pub struct Table {
    chains: Vec<Vec<Entry>>,
    len: usize,
    /// Non-zero while at least one live iterator walks this table;
    /// deletions are rejected meanwhile.
    pub lock: u32,
}

/// Entries per chain tolerated before the table grows.
const MAX_LOAD: usize = 2;

impl Table {
    /// Creates a table pre-sized for roughly `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            chains: vec![Vec::new(); capacity.max(1)],
            len: 0,
            lock: 0,
        }
    }

    /// Current chain count, stored back into call sites as a capacity hint.
    pub fn capacity(&self) -> usize {
        self.chains.len()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when the table has no entries.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn chain_of(&self, hash: u32) -> usize {
        hash as usize % self.chains.len()
    }

    /// Looks an entry up by key.
    pub fn get(&self, key: &Key) -> Option<&Value> {
        self.get_prehashed(key.hash(), key)
    }

    /// Looks an entry up with a precomputed hash.
    pub fn get_prehashed(&self, hash: u32, key: &Key) -> Option<&Value> {
        self.chains[self.chain_of(hash)]
            .iter()
            .find(|e| e.hash == hash && &e.key == key)
            .map(|e| &e.value)
    }

    /// Mutable lookup by key.
    pub fn get_mut(&mut self, key: &Key) -> Option<&mut Value> {
        let hash = key.hash();
        let chain = self.chain_of(hash);
        self.chains[chain]
            .iter_mut()
            .find(|e| e.hash == hash && &e.key == key)
            .map(|e| &mut e.value)
    }

    /// True when an entry with this key exists.
    pub fn exists(&self, key: &Key) -> bool {
        self.get(key).is_some()
    }

    /// Returns the entry for `key`, inserting an unset value if absent.
    pub fn entry_or_unset(&mut self, key: Key) -> &mut Value {
        self.entry_or_unset_prehashed(key.hash(), key)
    }

    /// Pre-hashed variant of [`Table::entry_or_unset`].
    pub fn entry_or_unset_prehashed(&mut self, hash: u32, key: Key) -> &mut Value {
        if self.len >= self.chains.len() * MAX_LOAD {
            self.grow();
        }
        let chain = self.chain_of(hash);
        let position = self.chains[chain]
            .iter()
            .position(|e| e.hash == hash && e.key == key);
        let index = match position {
            Some(index) => index,
            None => {
                self.chains[chain].push(Entry {
                    hash,
                    key,
                    value: Value::Unset,
                });
                self.len += 1;
                self.chains[chain].len() - 1
            }
        };
        &mut self.chains[chain][index].value
    }

    /// Writes `value` under `key`, creating the entry if needed.
    pub fn insert(&mut self, key: Key, value: Value) {
        *self.entry_or_unset(key) = value;
    }

    /// Removes the entry for `key`, returning its value.
    ///
    /// Lock enforcement is the caller's business; the opcode layer rejects
    /// deletion on a locked table before getting here.
    pub fn remove(&mut self, key: &Key) -> Option<Value> {
        let hash = key.hash();
        let chain = self.chain_of(hash);
        let position = self.chains[chain]
            .iter()
            .position(|e| e.hash == hash && &e.key == key)?;
        let entry = self.chains[chain].remove(position);
        self.len -= 1;
        Some(entry.value)
    }

    /// Drops every entry, keeping the chain array.
    pub fn clear(&mut self) {
        for chain in &mut self.chains {
            chain.clear();
        }
        self.len = 0;
    }

    /// Snapshot of all keys in internal order, as captured by iterators.
    pub fn keys_snapshot(&self) -> Vec<Key> {
        self.iter().map(|(key, _)| key.clone()).collect()
    }

    /// Iterates entries in internal order.
    pub fn iter(&self) -> impl Iterator<Item = (&Key, &Value)> {
        self.chains
            .iter()
            .flatten()
            .map(|entry| (&entry.key, &entry.value))
    }

    /// Iterates values in internal order.
    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.iter().map(|(_, value)| value)
    }

    fn grow(&mut self) {
        let new_len = self.chains.len() * 2;
        let mut chains: Vec<Vec<Entry>> = vec![Vec::new(); new_len];
        for entry in self.chains.drain(..).flatten() {
            chains[entry.hash as usize % new_len].push(entry);
        }
        self.chains = chains;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn str_key(s: &str) -> Key {
        Key::Str(s.into())
    }

    #[test]
    fn string_and_integer_namespaces_are_disjoint() {
        let mut table = Table::new(4);
        table.insert(str_key("7"), Value::Num(1.0));
        table.insert(Key::Int(7), Value::Num(2.0));
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(&str_key("7")), Some(&Value::Num(1.0)));
        assert_eq!(table.get(&Key::Int(7)), Some(&Value::Num(2.0)));
    }

    #[test]
    fn entry_or_unset_inserts_once() {
        let mut table = Table::new(1);
        assert_eq!(*table.entry_or_unset(str_key("x")), Value::Unset);
        *table.entry_or_unset(str_key("x")) = Value::Num(5.0);
        assert_eq!(*table.entry_or_unset(str_key("x")), Value::Num(5.0));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn prehashed_lookup_agrees_with_plain_lookup() {
        let mut table = Table::new(8);
        table.insert(str_key("player"), Value::Num(3.0));
        let hash = hash_str("player");
        assert_eq!(
            table.get_prehashed(hash, &str_key("player")),
            table.get(&str_key("player"))
        );
    }

    #[test]
    fn growth_keeps_all_entries_reachable() {
        let mut table = Table::new(1);
        for i in 0..64 {
            table.insert(Key::Int(i), Value::Num(i as f64));
        }
        assert_eq!(table.len(), 64);
        assert!(table.capacity() > 1);
        for i in 0..64 {
            assert_eq!(table.get(&Key::Int(i)), Some(&Value::Num(i as f64)));
        }
    }

    #[test]
    fn remove_and_clear() {
        let mut table = Table::new(2);
        table.insert(str_key("a"), Value::Num(1.0));
        table.insert(str_key("b"), Value::Num(2.0));
        assert_eq!(table.remove(&str_key("a")), Some(Value::Num(1.0)));
        assert_eq!(table.remove(&str_key("a")), None);
        table.clear();
        assert!(table.is_empty());
    }

    #[test]
    fn snapshot_order_is_stable_for_a_given_table() {
        let mut table = Table::new(8);
        for i in 0..10 {
            table.insert(Key::Int(i), Value::Num(i as f64));
        }
        assert_eq!(table.keys_snapshot(), table.keys_snapshot());
        assert_eq!(table.keys_snapshot().len(), 10);
    }
}
