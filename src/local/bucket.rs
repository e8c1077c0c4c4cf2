use super::map::{InsertPolicy, KeyEq};
use serde::{Deserialize, Serialize};

/// Inline slots per bucket. A chain grows by one overflow bucket at a time
/// once every slot of every bucket in the chain is taken.
pub const ENTRIES_PER_BUCKET: usize = 8;

/// A key-value pair as stored in a bucket slot and as shipped inside bulk
/// insert batches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry<K, V> {
    pub key: K,
    pub value: V,
}

impl<K, V> Entry<K, V> {
    pub fn new(key: K, value: V) -> Self {
        Self { key, value }
    }
}

/// One bucket in a chain: an inline slot array plus the link to the optional
/// overflow bucket. The head bucket lives in the map's bucket table; overflow
/// buckets are heap-allocated on demand and owned by their predecessor.
///
/// All chain operations run under the head bucket's lock, held by the caller.
pub(crate) struct Bucket<K, V> {
    slots: [Option<Entry<K, V>>; ENTRIES_PER_BUCKET],
    used: usize,
    next: Option<Box<Bucket<K, V>>>,
}

impl<K, V> Bucket<K, V> {
    pub(crate) fn new() -> Self {
        Self {
            slots: [const { None }; ENTRIES_PER_BUCKET],
            used: 0,
            next: None,
        }
    }

    /// Applies `policy` to the stored value if `key` is already present
    /// anywhere in the chain. Hands the incoming value back when the key is
    /// absent; the caller then places it as a fresh entry.
    pub(crate) fn upsert(
        &mut self,
        key: &K,
        value: V,
        eq: KeyEq<K>,
        policy: InsertPolicy<V>,
    ) -> Option<V> {
        for slot in self.slots.iter_mut().flatten() {
            if eq(&slot.key, key) {
                policy(&mut slot.value, value);
                return None;
            }
        }
        match self.next {
            Some(ref mut next) => next.upsert(key, value, eq, policy),
            None => Some(value),
        }
    }

    /// Stores `entry` in the first free slot of the chain, allocating an
    /// overflow bucket when the chain is full. Must only be called after
    /// duplicate detection ruled the key absent.
    pub(crate) fn place(&mut self, entry: Entry<K, V>) {
        if self.used < ENTRIES_PER_BUCKET {
            for slot in self.slots.iter_mut() {
                if slot.is_none() {
                    *slot = Some(entry);
                    self.used += 1;
                    return;
                }
            }
        }
        match self.next {
            Some(ref mut next) => next.place(entry),
            None => {
                let mut overflow = Box::new(Bucket::new());
                overflow.slots[0] = Some(entry);
                overflow.used = 1;
                self.next = Some(overflow);
            }
        }
    }

    pub(crate) fn find(&self, key: &K, eq: KeyEq<K>) -> Option<&Entry<K, V>> {
        for slot in self.slots.iter().flatten() {
            if eq(&slot.key, key) {
                return Some(slot);
            }
        }
        self.next.as_deref()?.find(key, eq)
    }

    /// Runs `f` on the entry for `key` if present.
    pub(crate) fn update<R>(
        &mut self,
        key: &K,
        eq: KeyEq<K>,
        f: impl FnOnce(&K, &mut V) -> R,
    ) -> Option<R> {
        for slot in self.slots.iter_mut().flatten() {
            if eq(&slot.key, key) {
                return Some(f(&slot.key, &mut slot.value));
            }
        }
        match self.next {
            Some(ref mut next) => next.update(key, eq, f),
            None => None,
        }
    }

    /// Removes `key` from the chain. The freed slot is refilled by the last
    /// occupied slot of the same bucket, so the occupied slots of each bucket
    /// stay packed at the front. Emptied overflow buckets are left in place;
    /// they are only released by a full reset of the chain.
    pub(crate) fn remove(&mut self, key: &K, eq: KeyEq<K>) -> bool {
        let mut found = None;
        for (index, slot) in self.slots.iter().enumerate() {
            if let Some(entry) = slot
                && eq(&entry.key, key)
            {
                found = Some(index);
                break;
            }
        }

        match found {
            Some(index) => {
                if let Some(last) = self.slots.iter().rposition(|slot| slot.is_some()) {
                    self.slots.swap(index, last);
                    self.slots[last] = None;
                }
                self.used -= 1;
                true
            }
            None => match self.next {
                Some(ref mut next) => next.remove(key, eq),
                None => false,
            },
        }
    }

    /// Visits every occupied slot of the chain in bucket order.
    pub(crate) fn visit(&self, f: &mut impl FnMut(&K, &V)) {
        let mut bucket = Some(self);
        while let Some(current) = bucket {
            for slot in current.slots.iter().flatten() {
                f(&slot.key, &slot.value);
            }
            bucket = current.next.as_deref();
        }
    }

    /// Occupied slots across the whole chain.
    pub(crate) fn len_chain(&self) -> usize {
        self.used + self.next.as_deref().map_or(0, |next| next.len_chain())
    }
}
