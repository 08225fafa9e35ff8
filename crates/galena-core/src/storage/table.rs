//! Fixed-capacity chained hash table.
//!
//! The bucket count is fixed when the table is created and never changes;
//! collisions chain within a bucket. Iteration order is bucket-then-chain,
//! which is the order SHOW and backup serialization expose to users.

/// One key/value pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub key: String,
    pub value: String,
}

/// Chained hash table with a fixed bucket array.
#[derive(Debug)]
pub struct HashTable {
    buckets: Vec<Vec<Entry>>,
    len: usize,
}

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// FNV-1a over the full key bytes.
fn fnv1a(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .fold(FNV_OFFSET, |hash, b| (hash ^ u64::from(*b)).wrapping_mul(FNV_PRIME))
}

impl HashTable {
    /// Create a table with `buckets` chains. `buckets` must be nonzero;
    /// `bucket_of` reduces hashes modulo the bucket count.
    pub fn new(buckets: usize) -> Self {
        debug_assert!(buckets > 0, "hash table needs at least one bucket");
        Self {
            buckets: vec![Vec::new(); buckets],
            len: 0,
        }
    }

    fn bucket_of(&self, key: &str) -> usize {
        (fnv1a(key.as_bytes()) % self.buckets.len() as u64) as usize
    }

    /// Insert `key` or replace its value if already present.
    pub fn set(&mut self, key: &str, value: &str) {
        let idx = self.bucket_of(key);
        let chain = &mut self.buckets[idx];
        if let Some(entry) = chain.iter_mut().find(|e| e.key == key) {
            entry.value = value.to_string();
        } else {
            chain.push(Entry {
                key: key.to_string(),
                value: value.to_string(),
            });
            self.len += 1;
        }
    }

    /// Look up the value stored under `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        let idx = self.bucket_of(key);
        self.buckets[idx]
            .iter()
            .find(|e| e.key == key)
            .map(|e| e.value.as_str())
    }

    /// Remove `key`, reporting whether it was present.
    pub fn remove(&mut self, key: &str) -> bool {
        let idx = self.bucket_of(key);
        let chain = &mut self.buckets[idx];
        match chain.iter().position(|e| e.key == key) {
            Some(pos) => {
                chain.remove(pos);
                self.len -= 1;
                true
            }
            None => false,
        }
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when the table holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Owned copy of every entry in bucket-then-chain order.
    pub fn entries(&self) -> Vec<Entry> {
        let mut out = Vec::with_capacity(self.len);
        for chain in &self.buckets {
            out.extend(chain.iter().cloned());
        }
        out
    }
}
