//! Subjects, streams, and partition keys

use std::hash::{Hash, Hasher};

/// JetStream stream holding all balance-change records
pub const CHANGES_STREAM: &str = "BALANCES";

/// JetStream stream holding dead-lettered records
pub const DLQ_STREAM: &str = "BALANCES_DLQ";

/// Subject for one partition of the balance-changes topic
pub fn changes_subject(partition: u32) -> String {
    format!("balances.changes.{}", partition)
}

/// Wildcard matching every partition subject
pub fn changes_wildcard() -> String {
    "balances.changes.*".to_string()
}

/// Subject for the dead-letter topic (single partition by default)
pub const DLQ_SUBJECT: &str = "balances.dlq";

/// Stable per-account routing key.
///
/// All mutations for one account carry the same key and therefore land on
/// the same partition, which is what serializes them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PartitionKey(String);

impl PartitionKey {
    /// Create a partition key
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Compute the partition this key maps to
    pub fn partition_number(&self, num_partitions: u32) -> u32 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.0.hash(&mut hasher);
        (hasher.finish() % num_partitions as u64) as u32
    }
}

impl From<String> for PartitionKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for PartitionKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subjects() {
        assert_eq!(changes_subject(3), "balances.changes.3");
        assert_eq!(changes_wildcard(), "balances.changes.*");
    }

    #[test]
    fn test_partition_stability() {
        let key = PartitionKey::new("acct-42");
        let p1 = key.partition_number(16);
        let p2 = key.partition_number(16);
        assert_eq!(p1, p2);
        assert!(p1 < 16);
    }

    #[test]
    fn test_partition_spread() {
        // Not a uniformity test, just that more than one partition is used
        let partitions: std::collections::HashSet<u32> = (0..64)
            .map(|i| PartitionKey::new(format!("acct-{}", i)).partition_number(8))
            .collect();
        assert!(partitions.len() > 1);
    }
}
