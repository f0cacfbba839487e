//! Defines partitioners for distributing elements and rows in an exchange.

use std::collections::hash_map::DefaultHasher;
use std::fmt::Debug;
use std::hash::{Hash, Hasher};

/// Maps a key to one of `num_partitions` output partitions.
pub trait Partitioner<K: ?Sized>: Send + Sync + Debug {
    fn num_partitions(&self) -> usize;

    fn get_partition(&self, key: &K) -> usize;
}

/// A partitioner that uses the hash of the key to distribute data.
///
/// `DefaultHasher::new()` uses fixed keys, so a given key lands in the same
/// bucket on every worker.
#[derive(Clone, Debug)]
pub struct HashPartitioner {
    num_partitions: usize,
    seed: u64,
}

impl HashPartitioner {
    pub fn new(num_partitions: usize) -> Self {
        Self::with_seed(num_partitions, 0)
    }

    pub fn with_seed(num_partitions: usize, seed: u64) -> Self {
        Self {
            num_partitions: num_partitions.max(1),
            seed,
        }
    }
}

impl<K: Hash + ?Sized> Partitioner<K> for HashPartitioner {
    fn num_partitions(&self) -> usize {
        self.num_partitions
    }

    fn get_partition(&self, key: &K) -> usize {
        let mut s = DefaultHasher::new();
        self.seed.hash(&mut s);
        key.hash(&mut s);
        (s.finish() % self.num_partitions as u64) as usize
    }
}

/// Deals elements out by their global position.
#[derive(Clone, Debug)]
pub struct RoundRobinPartitioner {
    num_partitions: usize,
}

impl RoundRobinPartitioner {
    pub fn new(num_partitions: usize) -> Self {
        Self {
            num_partitions: num_partitions.max(1),
        }
    }
}

impl Partitioner<usize> for RoundRobinPartitioner {
    fn num_partitions(&self) -> usize {
        self.num_partitions
    }

    fn get_partition(&self, position: &usize) -> usize {
        position % self.num_partitions
    }
}

/// Sizes of `parts` contiguous runs covering `total` items, the first
/// `total % parts` runs one item longer than the rest.
pub fn even_split_sizes(total: usize, parts: usize) -> Vec<usize> {
    let parts = parts.max(1);
    let base = total / parts;
    let extra = total % parts;
    (0..parts).map(|i| base + usize::from(i < extra)).collect()
}

/// The contiguous `[start, end)` ranges matching [`even_split_sizes`].
pub fn even_split_ranges(total: usize, parts: usize) -> Vec<std::ops::Range<usize>> {
    let mut start = 0;
    even_split_sizes(total, parts)
        .into_iter()
        .map(|size| {
            let range = start..start + size;
            start += size;
            range
        })
        .collect()
}

/// Groups `parent` partitions into `target` adjacent runs without a shuffle.
pub fn coalesce_groups(parent: usize, target: usize) -> Vec<std::ops::Range<usize>> {
    let target = target.max(1);
    (0..target)
        .map(|g| (g * parent / target)..((g + 1) * parent / target))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_partitioner_is_stable() {
        let p = HashPartitioner::new(4);
        let a = Partitioner::<str>::get_partition(&p, "alpha");
        for _ in 0..10 {
            assert_eq!(Partitioner::<str>::get_partition(&p, "alpha"), a);
        }
        assert!(a < 4);
    }

    #[test]
    fn test_hash_partitioner_seed_changes_layout() {
        let keys: Vec<u64> = (0..64).collect();
        let a = HashPartitioner::with_seed(8, 1);
        let b = HashPartitioner::with_seed(8, 2);
        let differs = keys
            .iter()
            .any(|k| Partitioner::<u64>::get_partition(&a, k) != Partitioner::<u64>::get_partition(&b, k));
        assert!(differs);
    }

    #[test]
    fn test_round_robin() {
        let p = RoundRobinPartitioner::new(3);
        let assigned: Vec<usize> = (0..7).map(|i| p.get_partition(&i)).collect();
        assert_eq!(assigned, vec![0, 1, 2, 0, 1, 2, 0]);
    }

    #[test]
    fn test_even_split() {
        assert_eq!(even_split_sizes(10, 3), vec![4, 3, 3]);
        assert_eq!(even_split_sizes(2, 4), vec![1, 1, 0, 0]);
        assert_eq!(even_split_ranges(5, 2), vec![0..3, 3..5]);
    }

    #[test]
    fn test_coalesce_groups_cover_parent() {
        let groups = coalesce_groups(5, 2);
        assert_eq!(groups, vec![0..2, 2..5]);
        let groups = coalesce_groups(4, 4);
        assert_eq!(groups, vec![0..1, 1..2, 2..3, 3..4]);
        let groups = coalesce_groups(1, 3);
        assert_eq!(groups.iter().map(|r| r.len()).sum::<usize>(), 1);
    }
}
