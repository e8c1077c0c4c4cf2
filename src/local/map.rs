use super::bucket::{Bucket, ENTRIES_PER_BUCKET, Entry};

use parking_lot::Mutex;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Key equality predicate. A plain function pointer so the same callable can
/// be installed on every locality.
pub type KeyEq<K> = fn(&K, &K) -> bool;

/// Insertion policy: decides what happens to the stored value when a key is
/// inserted a second time. Invoked as `policy(existing, incoming)`.
pub type InsertPolicy<V> = fn(&mut V, V);

/// Default key equality: the key type's own `Eq`.
pub fn default_key_eq<K: Eq>(a: &K, b: &K) -> bool {
    a == b
}

/// Default insertion policy: a duplicate insert overwrites the stored value.
pub fn overwrite<V>(existing: &mut V, incoming: V) {
    *existing = incoming;
}

/// Hashes a key with the fixed map hash.
///
/// The same function drives both the owner-locality choice and the bucket
/// index, so placement is deterministic everywhere in the mesh for the
/// lifetime of a map.
pub(crate) fn hash_key<K: Hash + ?Sized>(key: &K) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}

/// One locality's share of the distributed map: a fixed table of bucket
/// chains, one mutex per chain, and an atomic entry counter.
///
/// The table never resizes. Capacity pressure is absorbed by overflow buckets
/// appended to individual chains, so every operation stays a single chain walk
/// under a single lock.
pub struct LocalMap<K, V> {
    chains: Box<[Mutex<Bucket<K, V>>]>,
    size: AtomicUsize,
    key_eq: KeyEq<K>,
    policy: InsertPolicy<V>,
}

impl<K, V> LocalMap<K, V>
where
    K: Hash + Eq,
{
    /// Creates a map sized for `expected_entries` with the default equality
    /// and overwrite policy.
    pub fn new(expected_entries: usize) -> Self {
        Self::with_policy(expected_entries, default_key_eq, overwrite)
    }
}

impl<K, V> LocalMap<K, V>
where
    K: Hash,
{
    /// Creates a map with custom key equality and insertion policy. The table
    /// holds one head bucket per `ENTRIES_PER_BUCKET` expected entries, never
    /// fewer than one.
    pub fn with_policy(expected_entries: usize, key_eq: KeyEq<K>, policy: InsertPolicy<V>) -> Self {
        let num_buckets = std::cmp::max(expected_entries / ENTRIES_PER_BUCKET, 1);
        let chains = (0..num_buckets)
            .map(|_| Mutex::new(Bucket::new()))
            .collect();

        Self {
            chains,
            size: AtomicUsize::new(0),
            key_eq,
            policy,
        }
    }

    fn bucket_index(&self, key: &K) -> usize {
        (hash_key(key) % self.chains.len() as u64) as usize
    }

    /// Inserts a key-value pair. A duplicate key is resolved by the insertion
    /// policy; a fresh key takes the first free slot of its chain, extending
    /// the chain when full. Duplicate detection always scans the whole chain,
    /// so a hole left by an earlier erase can never shadow a live entry.
    pub fn insert(&self, key: K, value: V) {
        let index = self.bucket_index(&key);
        let mut chain = self.chains[index].lock();
        if let Some(value) = chain.upsert(&key, value, self.key_eq, self.policy) {
            chain.place(Entry::new(key, value));
            self.size.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn lookup(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        let chain = self.chains[self.bucket_index(key)].lock();
        chain.find(key, self.key_eq).map(|entry| entry.value.clone())
    }

    /// Removes a key. Absent keys are a silent no-op.
    pub fn erase(&self, key: &K) {
        let mut chain = self.chains[self.bucket_index(key)].lock();
        if chain.remove(key, self.key_eq) {
            self.size.fetch_sub(1, Ordering::Relaxed);
        }
    }

    /// Runs `f` on the entry for `key` with the chain lock held; `f` must not
    /// reenter the map. Absent keys are a no-op and return `None`.
    pub fn apply<R>(&self, key: &K, f: impl FnOnce(&K, &mut V) -> R) -> Option<R> {
        let mut chain = self.chains[self.bucket_index(key)].lock();
        chain.update(key, self.key_eq, f)
    }

    /// Visits every occupied slot of one bucket chain. The chain lock is held
    /// for the duration of the visit, so the snapshot of that chain is
    /// consistent; there is no ordering between chains.
    pub fn visit_bucket(&self, index: usize, mut f: impl FnMut(&K, &V)) {
        let chain = self.chains[index].lock();
        chain.visit(&mut f);
    }

    pub fn for_each_entry(&self, mut f: impl FnMut(&K, &V)) {
        for index in 0..self.chains.len() {
            self.visit_bucket(index, &mut f);
        }
    }

    pub fn for_each_key(&self, mut f: impl FnMut(&K)) {
        self.for_each_entry(|key, _value| f(key));
    }

    /// Drops every entry and releases the overflow chains. The size counter
    /// is adjusted chain by chain, so inserts racing with a clear stay
    /// accounted for.
    pub fn clear(&self) {
        for chain in self.chains.iter() {
            let dropped = {
                let mut chain = chain.lock();
                let dropped = chain.len_chain();
                *chain = Bucket::new();
                dropped
            };
            self.size.fetch_sub(dropped, Ordering::Relaxed);
        }
    }

    pub fn len(&self) -> usize {
        self.size.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn num_buckets(&self) -> usize {
        self.chains.len()
    }
}
