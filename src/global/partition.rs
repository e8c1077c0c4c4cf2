//! Key Partitioner
//!
//! Maps keys to their owning locality. The assignment is pure arithmetic over
//! the key hash, so every locality computes the same owner for the same key
//! with no coordination.

use crate::cluster::types::LocalityId;
use crate::local::map::hash_key;
use std::hash::Hash;

/// Owner assignment for a map instance. The locality count is captured when
/// the map is created and never changes; the map does not support
/// reconfiguration.
#[derive(Debug, Clone, Copy)]
pub struct Partitioner {
    num_localities: usize,
}

impl Partitioner {
    pub fn new(num_localities: usize) -> Self {
        Self { num_localities }
    }

    /// The locality that owns `key`: `hash(key) mod L`.
    pub fn owner_of<K: Hash>(&self, key: &K) -> LocalityId {
        LocalityId((hash_key(key) % self.num_localities as u64) as u32)
    }

    pub fn num_localities(&self) -> usize {
        self.num_localities
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owner_is_deterministic() {
        let partitioner = Partitioner::new(4);

        let first = partitioner.owner_of(&"entry_100");
        let second = partitioner.owner_of(&"entry_100");

        assert_eq!(first, second);
    }

    #[test]
    fn test_owner_is_within_range() {
        let partitioner = Partitioner::new(3);

        for key in 0..1000u64 {
            let owner = partitioner.owner_of(&key);
            assert!((owner.0 as usize) < partitioner.num_localities());
        }
    }

    #[test]
    fn test_single_locality_owns_everything() {
        let partitioner = Partitioner::new(1);

        for key in 0..100u64 {
            assert_eq!(partitioner.owner_of(&key), LocalityId(0));
        }
    }
}
