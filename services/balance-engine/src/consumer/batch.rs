//! In-batch processing
//!
//! Pure planning over an already-parsed batch: collapse batch-local
//! duplicates, drop records with terminal ledger rows, resolve balances
//! (working set, then store, then lazy zero-create for deposits), apply
//! the arithmetic, and stage absolute after-values for the commit.
//!
//! Later records in a batch chain off earlier ones through a pending
//! overlay; the working set itself is only written through after the
//! commit succeeds, so a rolled-back batch leaves no trace.

use balance_core::{
    Balance, CoreError, Currency, LedgerEntry, MutationRequest, WorkingSet,
};
use chrono::Utc;
use message_bus::ChangeRecord;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

use crate::errors::Result;
use crate::metrics::RECORDS_PROCESSED_TOTAL;
use crate::stores::{BalanceStore, CommittedBalance};

type PairKey = (balance_core::AccountId, Currency);

/// Everything one planned batch will write
#[derive(Debug, Default)]
pub struct BatchPlan {
    /// Absolute after-values, one per (account, currency) the batch touched
    pub balances: Vec<Balance>,

    /// Terminal ledger entries, success and failed
    pub entries: Vec<LedgerEntry>,

    /// Snapshots to fan out once the commit lands
    pub snapshots: Vec<CommittedBalance>,

    /// Records that must be dead-lettered (transient exhaustion); the
    /// offset still advances past them
    pub dead_letters: Vec<(ChangeRecord, CoreError)>,
}

impl BatchPlan {
    /// True when the commit transaction would write nothing
    pub fn is_empty(&self) -> bool {
        self.balances.is_empty() && self.entries.is_empty()
    }
}

/// Plan a batch of parsed records.
///
/// `records` must all belong to one partition. Balance loads on working-set
/// miss go through `store`; a load that keeps failing turns the record into
/// a dead letter rather than blocking the partition.
pub async fn plan_batch(
    records: Vec<ChangeRecord>,
    working_set: &mut WorkingSet,
    store: &dyn BalanceStore,
    retry: &crate::config::RetryConfig,
) -> Result<BatchPlan> {
    let mut plan = BatchPlan::default();

    // Collapse batch-local duplicates: two records with the same
    // transaction id become one, keeping the first (log order)
    let mut seen: HashSet<String> = HashSet::new();
    let mut unique: Vec<ChangeRecord> = Vec::with_capacity(records.len());
    for record in records {
        if seen.insert(record.request.transaction_id.to_string()) {
            unique.push(record);
        } else {
            debug!(
                transaction_id = %record.request.transaction_id,
                "Collapsed batch-local duplicate"
            );
            RECORDS_PROCESSED_TOTAL
                .with_label_values(&["duplicate"])
                .inc();
        }
    }

    // Drop records whose transaction id already reached a terminal ledger
    // row; they are already observable, replay is a no-op
    let ids: Vec<String> = unique
        .iter()
        .map(|r| r.request.transaction_id.to_string())
        .collect();
    let terminal = store.terminal_transactions(&ids).await?;
    for id in &terminal {
        debug!(transaction_id = %id, "Dropped already-terminal record");
        RECORDS_PROCESSED_TOTAL
            .with_label_values(&["duplicate"])
            .inc();
    }
    unique.retain(|r| !terminal.contains(r.request.transaction_id.as_str()));

    // Apply in log order against the pending overlay
    let mut pending: HashMap<PairKey, Balance> = HashMap::new();

    for record in unique {
        let request = &record.request;
        let key = (request.account_id, request.currency.clone());

        let current = match resolve_balance(&pending, working_set, store, retry, request).await {
            Resolved::Balance(balance) => Some(balance),
            Resolved::Unknown => None,
            Resolved::Exhausted(err) => {
                RECORDS_PROCESSED_TOTAL
                    .with_label_values(&["dead_lettered"])
                    .inc();
                plan.dead_letters.push((record, err));
                continue;
            }
        };

        let now = Utc::now();
        let current = match current {
            Some(balance) => balance,
            None if request.kind.creates_balance() => {
                Balance::zero(request.account_id, request.currency.clone(), now)
            }
            None => {
                let err = CoreError::UnknownBalance {
                    account: request.account_id.value(),
                    currency: request.currency.to_string(),
                };
                plan.entries.push(LedgerEntry::failed(request, None, &err, now));
                RECORDS_PROCESSED_TOTAL
                    .with_label_values(&["rejected"])
                    .inc();
                continue;
            }
        };

        match current.apply(&request.kind, request.amount, now) {
            Ok(applied) => {
                plan.entries
                    .push(LedgerEntry::success(request, &applied, now));
                pending.insert(key, applied.after);
                RECORDS_PROCESSED_TOTAL.with_label_values(&["applied"]).inc();
            }
            Err(err) if err.is_terminal() => {
                plan.entries
                    .push(LedgerEntry::failed(request, Some(&current), &err, now));
                RECORDS_PROCESSED_TOTAL
                    .with_label_values(&["rejected"])
                    .inc();
            }
            Err(err) => {
                // Arithmetic itself never yields non-terminal kinds
                warn!(
                    transaction_id = %request.transaction_id,
                    "Unexpected non-terminal apply error: {}",
                    err
                );
                plan.dead_letters.push((record, err));
            }
        }
    }

    plan.snapshots = pending.values().map(CommittedBalance::from_balance).collect();
    plan.balances = pending.into_values().collect();

    Ok(plan)
}

enum Resolved {
    Balance(Balance),
    Unknown,
    Exhausted(CoreError),
}

/// Lookup order: pending overlay (same batch), working set (previous
/// commits), store (cold). Store loads retry with backoff; exhaustion
/// demotes the record, never the partition.
async fn resolve_balance(
    pending: &HashMap<PairKey, Balance>,
    working_set: &mut WorkingSet,
    store: &dyn BalanceStore,
    retry: &crate::config::RetryConfig,
    request: &MutationRequest,
) -> Resolved {
    let key = (request.account_id, request.currency.clone());

    if let Some(balance) = pending.get(&key) {
        return Resolved::Balance(balance.clone());
    }

    if let Some(balance) = working_set.get(request.account_id, &request.currency) {
        return Resolved::Balance(balance.clone());
    }

    let mut attempt = 0u32;
    loop {
        match store.load_balance(request.account_id, &request.currency).await {
            Ok(Some(balance)) => {
                working_set.put(balance.clone());
                return Resolved::Balance(balance);
            }
            Ok(None) => return Resolved::Unknown,
            Err(e) => {
                attempt += 1;
                if attempt > retry.max_retries {
                    return Resolved::Exhausted(e.into_core());
                }
                warn!(
                    transaction_id = %request.transaction_id,
                    attempt,
                    "Balance load failed, retrying: {}",
                    e
                );
                tokio::time::sleep(retry.delay_for(attempt - 1)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::stores::BatchCommit;
    use balance_core::{AccountId, LedgerStatus, MutationKind, TransactionId};
    use rust_decimal_macros::dec;
    use std::sync::Mutex;
    use uuid::Uuid;

    /// In-memory store: preloaded balances plus a terminal-id set
    struct FakeStore {
        balances: Mutex<HashMap<(i64, String), Balance>>,
        terminal: HashSet<String>,
    }

    impl FakeStore {
        fn new() -> Self {
            Self {
                balances: Mutex::new(HashMap::new()),
                terminal: HashSet::new(),
            }
        }

        fn with_balance(self, balance: Balance) -> Self {
            self.balances.lock().unwrap().insert(
                (
                    balance.account_id.value(),
                    balance.currency.as_str().to_string(),
                ),
                balance,
            );
            self
        }

        fn with_terminal(mut self, id: &str) -> Self {
            self.terminal.insert(id.to_string());
            self
        }
    }

    #[async_trait::async_trait]
    impl BalanceStore for FakeStore {
        async fn load_balance(
            &self,
            account_id: AccountId,
            currency: &Currency,
        ) -> Result<Option<Balance>> {
            Ok(self
                .balances
                .lock()
                .unwrap()
                .get(&(account_id.value(), currency.as_str().to_string()))
                .cloned())
        }

        async fn terminal_transactions(
            &self,
            transaction_ids: &[String],
        ) -> Result<HashSet<String>> {
            Ok(transaction_ids
                .iter()
                .filter(|id| self.terminal.contains(*id))
                .cloned()
                .collect())
        }

        async fn commit_batch(&self, _commit: BatchCommit<'_>) -> Result<()> {
            unreachable!("planning never commits")
        }
    }

    fn record(tx: &str, kind: MutationKind, amount: rust_decimal::Decimal, offset: u64) -> ChangeRecord {
        ChangeRecord {
            event_id: Uuid::new_v4(),
            partition: 0,
            offset,
            request: MutationRequest {
                transaction_id: TransactionId::new(tx).unwrap(),
                account_id: AccountId(1),
                partition_key: "acct-1".to_string(),
                currency: Currency::new("USDT").unwrap(),
                kind,
                amount,
                description: None,
                metadata: serde_json::Value::Null,
            },
        }
    }

    fn retry() -> RetryConfig {
        RetryConfig {
            max_retries: 1,
            initial_interval_ms: 1,
            backoff: 1.0,
            dlq_topic: "balances.dlq".to_string(),
        }
    }

    #[tokio::test]
    async fn test_first_deposit_creates_balance() {
        let store = FakeStore::new();
        let mut ws = WorkingSet::new(16);

        let plan = plan_batch(
            vec![record("t1", MutationKind::Deposit, dec!(100.00), 1)],
            &mut ws,
            &store,
            &retry(),
        )
        .await
        .unwrap();

        assert_eq!(plan.balances.len(), 1);
        assert_eq!(plan.balances[0].available, dec!(100.00));
        assert_eq!(plan.balances[0].frozen, dec!(0));
        assert_eq!(plan.balances[0].version, 1);
        assert_eq!(plan.entries.len(), 1);
        assert_eq!(plan.entries[0].status, LedgerStatus::Success);
        assert_eq!(plan.entries[0].available_before, dec!(0));
        assert_eq!(plan.entries[0].available_after, dec!(100.00));
    }

    #[tokio::test]
    async fn test_terminal_duplicate_is_noop() {
        let store = FakeStore::new().with_terminal("t1");
        let mut ws = WorkingSet::new(16);

        let plan = plan_batch(
            vec![record("t1", MutationKind::Deposit, dec!(100), 1)],
            &mut ws,
            &store,
            &retry(),
        )
        .await
        .unwrap();

        assert!(plan.is_empty());
    }

    #[tokio::test]
    async fn test_batch_local_duplicates_collapse() {
        let store = FakeStore::new();
        let mut ws = WorkingSet::new(16);

        let plan = plan_batch(
            vec![
                record("t1", MutationKind::Deposit, dec!(100), 1),
                record("t1", MutationKind::Deposit, dec!(100), 2),
            ],
            &mut ws,
            &store,
            &retry(),
        )
        .await
        .unwrap();

        // One ledger row, one balance change
        assert_eq!(plan.entries.len(), 1);
        assert_eq!(plan.balances[0].available, dec!(100));
    }

    #[tokio::test]
    async fn test_withdraw_unknown_balance_fails_terminally() {
        let store = FakeStore::new();
        let mut ws = WorkingSet::new(16);

        let plan = plan_batch(
            vec![record("t2", MutationKind::Withdraw, dec!(50), 1)],
            &mut ws,
            &store,
            &retry(),
        )
        .await
        .unwrap();

        assert!(plan.balances.is_empty());
        assert_eq!(plan.entries.len(), 1);
        assert_eq!(plan.entries[0].status, LedgerStatus::Failed);
        assert!(plan.entries[0]
            .error_message
            .as_ref()
            .unwrap()
            .contains("unknown balance"));
    }

    #[tokio::test]
    async fn test_insufficient_funds_rejected_balance_unchanged() {
        let now = Utc::now();
        let store = FakeStore::new().with_balance(Balance {
            account_id: AccountId(1),
            currency: Currency::new("USDT").unwrap(),
            available: dec!(100),
            frozen: dec!(0),
            version: 1,
            updated_at: now,
        });
        let mut ws = WorkingSet::new(16);

        let plan = plan_batch(
            vec![record("t2", MutationKind::Withdraw, dec!(150), 1)],
            &mut ws,
            &store,
            &retry(),
        )
        .await
        .unwrap();

        assert!(plan.balances.is_empty());
        assert_eq!(plan.entries[0].status, LedgerStatus::Failed);
        assert_eq!(plan.entries[0].available_before, dec!(100));
        assert_eq!(plan.entries[0].available_after, dec!(100));
    }

    #[tokio::test]
    async fn test_chaining_within_batch() {
        let store = FakeStore::new();
        let mut ws = WorkingSet::new(16);

        let plan = plan_batch(
            vec![
                record("t1", MutationKind::Deposit, dec!(100), 1),
                record("t3", MutationKind::Freeze, dec!(40), 2),
                record("t4", MutationKind::Unfreeze, dec!(40), 3),
            ],
            &mut ws,
            &store,
            &retry(),
        )
        .await
        .unwrap();

        assert_eq!(plan.entries.len(), 3);
        // Chaining: each before equals the previous after
        assert_eq!(plan.entries[1].available_before, plan.entries[0].available_after);
        assert_eq!(plan.entries[2].available_before, plan.entries[1].available_after);
        assert_eq!(plan.entries[2].frozen_before, dec!(40));
        assert_eq!(plan.entries[2].frozen_after, dec!(0));

        // Final state: one balance row, back to (100, 0), version 3
        assert_eq!(plan.balances.len(), 1);
        assert_eq!(plan.balances[0].available, dec!(100));
        assert_eq!(plan.balances[0].frozen, dec!(0));
        assert_eq!(plan.balances[0].version, 3);
    }

    #[tokio::test]
    async fn test_working_set_untouched_until_commit() {
        let store = FakeStore::new();
        let mut ws = WorkingSet::new(16);

        let _plan = plan_batch(
            vec![record("t1", MutationKind::Deposit, dec!(100), 1)],
            &mut ws,
            &store,
            &retry(),
        )
        .await
        .unwrap();

        // The planner stages the new balance in the plan only; a rollback
        // must leave the working set clean
        let usdt = Currency::new("USDT").unwrap();
        assert!(ws.get(AccountId(1), &usdt).is_none());
    }
}
