//! Partitioning strategies for change routing

use crate::types::PartitionKey;

/// Partitioning strategy
pub trait PartitioningStrategy: Send + Sync {
    /// Compute partition number for given key
    fn partition(&self, key: &PartitionKey) -> u32;

    /// Total number of partitions
    fn num_partitions(&self) -> u32;
}

/// Hash-based partitioning (default). Deterministic: the same account key
/// always maps to the same partition, which is what serializes an
/// account's mutations.
#[derive(Debug, Clone)]
pub struct HashPartitioning {
    num_partitions: u32,
}

impl HashPartitioning {
    /// Create new hash-based partitioning with given partition count
    pub fn new(num_partitions: u32) -> Self {
        assert!(num_partitions > 0, "num_partitions must be > 0");
        Self { num_partitions }
    }
}

impl Default for HashPartitioning {
    fn default() -> Self {
        Self::new(16)
    }
}

impl PartitioningStrategy for HashPartitioning {
    fn partition(&self, key: &PartitionKey) -> u32 {
        key.partition_number(self.num_partitions)
    }

    fn num_partitions(&self) -> u32 {
        self.num_partitions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_partitioning() {
        let strategy = HashPartitioning::new(8);
        let key = PartitionKey::new("acct-1001");

        let p1 = strategy.partition(&key);
        let p2 = strategy.partition(&key);

        assert_eq!(p1, p2); // Same key -> same partition
        assert!(p1 < 8);
    }

    #[test]
    fn test_default_partition_count() {
        let strategy = HashPartitioning::default();
        assert_eq!(strategy.num_partitions(), 16);
    }
}
