//! Per-partition working set
//!
//! A write-through read cache of recently-touched balances. A partition is
//! served by exactly one worker at a time (lease-fenced), so the set needs
//! no interior locking. It is authoritative only transiently between batch
//! commits: on lease loss or batch rollback it is released and repopulated
//! from the store on demand.

use std::collections::HashMap;

use crate::types::{AccountId, Balance, Currency};

/// Bounded (account, currency) -> Balance map with LRU eviction
#[derive(Debug)]
pub struct WorkingSet {
    entries: HashMap<(AccountId, Currency), (Balance, u64)>,
    capacity: usize,
    tick: u64,
}

impl WorkingSet {
    /// Create a working set bounded at `capacity` entries
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "capacity must be > 0");
        Self {
            entries: HashMap::new(),
            capacity,
            tick: 0,
        }
    }

    /// Look up a balance, refreshing its recency
    pub fn get(&mut self, account_id: AccountId, currency: &Currency) -> Option<&Balance> {
        self.tick += 1;
        let tick = self.tick;
        self.entries
            .get_mut(&(account_id, currency.clone()))
            .map(|(balance, last_used)| {
                *last_used = tick;
                &*balance
            })
    }

    /// Write-through after a successful commit
    pub fn put(&mut self, balance: Balance) {
        self.tick += 1;
        let key = (balance.account_id, balance.currency.clone());
        self.entries.insert(key, (balance, self.tick));

        if self.entries.len() > self.capacity {
            self.evict_oldest();
        }
    }

    /// Drop everything; used on batch rollback and lease loss so stale
    /// uncommitted state can never leak into the next batch
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of cached balances
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict_oldest(&mut self) {
        if let Some(key) = self
            .entries
            .iter()
            .min_by_key(|(_, (_, last_used))| *last_used)
            .map(|(key, _)| key.clone())
        {
            self.entries.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn balance(account: i64, currency: &str, available: rust_decimal::Decimal) -> Balance {
        Balance {
            account_id: AccountId(account),
            currency: Currency::new(currency).unwrap(),
            available,
            frozen: dec!(0),
            version: 1,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_put_get() {
        let mut set = WorkingSet::new(8);
        set.put(balance(1, "USDT", dec!(100)));

        let usdt = Currency::new("USDT").unwrap();
        let got = set.get(AccountId(1), &usdt).unwrap();
        assert_eq!(got.available, dec!(100));

        let eth = Currency::new("ETH").unwrap();
        assert!(set.get(AccountId(1), &eth).is_none());
    }

    #[test]
    fn test_put_overwrites() {
        let mut set = WorkingSet::new(8);
        set.put(balance(1, "USDT", dec!(100)));
        set.put(balance(1, "USDT", dec!(250)));

        assert_eq!(set.len(), 1);
        let usdt = Currency::new("USDT").unwrap();
        assert_eq!(set.get(AccountId(1), &usdt).unwrap().available, dec!(250));
    }

    #[test]
    fn test_lru_eviction_prefers_stale() {
        let mut set = WorkingSet::new(2);
        set.put(balance(1, "USDT", dec!(1)));
        set.put(balance(2, "USDT", dec!(2)));

        // Touch account 1 so account 2 is the eviction candidate
        let usdt = Currency::new("USDT").unwrap();
        set.get(AccountId(1), &usdt);

        set.put(balance(3, "USDT", dec!(3)));

        assert_eq!(set.len(), 2);
        assert!(set.get(AccountId(1), &usdt).is_some());
        assert!(set.get(AccountId(2), &usdt).is_none());
        assert!(set.get(AccountId(3), &usdt).is_some());
    }

    #[test]
    fn test_clear() {
        let mut set = WorkingSet::new(4);
        set.put(balance(1, "USDT", dec!(1)));
        set.clear();
        assert!(set.is_empty());
    }
}
