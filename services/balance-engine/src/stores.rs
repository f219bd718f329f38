//! Capability traits at the consumer's seams
//!
//! The partition consumer depends on these narrow traits instead of the
//! concrete Postgres / lease / cache types, which keeps the dependency
//! graph acyclic and lets tests inject in-memory fakes.

use async_trait::async_trait;
use balance_core::{AccountId, Balance, Currency, LedgerEntry};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::errors::Result;

/// Read/commit access to balances, the ledger, and the offset advance.
#[async_trait]
pub trait BalanceStore: Send + Sync {
    /// Load one committed balance, None if the pair has never been touched
    async fn load_balance(
        &self,
        account_id: AccountId,
        currency: &Currency,
    ) -> Result<Option<Balance>>;

    /// Of the given transaction ids, return those that already have a
    /// terminal ledger row (the dedupe set)
    async fn terminal_transactions(&self, transaction_ids: &[String]) -> Result<HashSet<String>>;

    /// Commit a whole batch in one fenced transaction: lease fence,
    /// balance upserts, ledger inserts, offset advance.
    async fn commit_batch(&self, commit: BatchCommit<'_>) -> Result<()>;
}

/// Committed consume cursor per (group, topic, partition)
#[async_trait]
pub trait OffsetStore: Send + Sync {
    /// Last committed offset; 0 if the partition has never committed
    async fn committed_offset(&self, group: &str, topic: &str, partition: u32) -> Result<u64>;
}

/// Fenced lease operations for one consumer identity
#[async_trait]
pub trait LeaseGuard: Send + Sync {
    /// Try to take the lease for a partition. True when this holder owns
    /// it after the call.
    async fn acquire(&self, partition: u32) -> Result<bool>;

    /// Extend the lease. False means it expired and may have a new owner.
    async fn renew(&self, partition: u32) -> Result<bool>;

    /// Release the lease if still held (graceful shutdown path)
    async fn release(&self, partition: u32) -> Result<()>;

    /// Identity used in lease rows and fence checks
    fn holder_id(&self) -> &str;
}

/// Sink for freshly-committed balances, fanned out to the external cache
/// with last-writer-wins semantics. Best effort by contract.
pub trait SnapshotSink: Send + Sync {
    /// Offer one committed balance; never blocks the commit path
    fn offer(&self, snapshot: CommittedBalance);
}

/// A committed (account, currency, after-state, logical timestamp) tuple
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommittedBalance {
    pub account_id: i64,
    pub currency: String,
    pub available: Decimal,
    pub frozen: Decimal,
    /// Monotonic per (account, currency); the LWW comparison key
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

impl CommittedBalance {
    pub fn from_balance(balance: &Balance) -> Self {
        Self {
            account_id: balance.account_id.value(),
            currency: balance.currency.as_str().to_string(),
            available: balance.available,
            frozen: balance.frozen,
            version: balance.version,
            updated_at: balance.updated_at,
        }
    }
}

/// Everything one batch writes, handed to the store as a unit
#[derive(Debug)]
pub struct BatchCommit<'a> {
    /// Partition being committed
    pub partition: u32,
    /// Fence identity; the commit fails unless the lease row still names
    /// this holder with an unexpired lease
    pub holder_id: &'a str,
    /// Consumer group for the offset row
    pub group: &'a str,
    /// Topic for the offset row
    pub topic: &'a str,
    /// Highest offset covered by this batch
    pub offset: u64,
    /// Absolute after-values for every balance the batch touched
    pub balances: &'a [Balance],
    /// Terminal ledger entries (success and failed)
    pub entries: &'a [LedgerEntry],
}
