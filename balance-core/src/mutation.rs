//! Balance arithmetic
//!
//! All five mutation kinds reduce to signed deltas on (available, frozen)
//! with non-negativity enforced on the results. Rejections are terminal:
//! they become failed ledger rows, never retries.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::error::CoreError;
use crate::types::{Balance, LedgerEntry, LedgerStatus, MutationKind, MutationRequest};

/// Outcome of applying one mutation to a balance
#[derive(Debug, Clone)]
pub struct AppliedMutation {
    /// State before the mutation
    pub before: Balance,
    /// State after the mutation (version incremented)
    pub after: Balance,
}

impl Balance {
    /// Apply a mutation, producing the after-state.
    ///
    /// deposit:  available += amount
    /// withdraw: available -= amount           (reject if result < 0)
    /// freeze:   available -= amount, frozen += amount (reject if available < 0)
    /// unfreeze: available += amount, frozen -= amount (reject if frozen < 0)
    /// transfer: withdraw on this account; the counter-deposit is a
    ///           separate mutation on the target partition
    pub fn apply(
        &self,
        kind: &MutationKind,
        amount: Decimal,
        now: DateTime<Utc>,
    ) -> Result<AppliedMutation, CoreError> {
        let (available, frozen) = match kind {
            MutationKind::Deposit => (self.available + amount, self.frozen),
            MutationKind::Withdraw | MutationKind::Transfer { .. } => {
                let available = self.available - amount;
                if available < Decimal::ZERO {
                    return Err(CoreError::InsufficientFunds {
                        available: self.available,
                        requested: amount,
                    });
                }
                (available, self.frozen)
            }
            MutationKind::Freeze => {
                let available = self.available - amount;
                if available < Decimal::ZERO {
                    return Err(CoreError::InsufficientFunds {
                        available: self.available,
                        requested: amount,
                    });
                }
                (available, self.frozen + amount)
            }
            MutationKind::Unfreeze => {
                let frozen = self.frozen - amount;
                if frozen < Decimal::ZERO {
                    return Err(CoreError::InsufficientFunds {
                        available: self.frozen,
                        requested: amount,
                    });
                }
                (self.available + amount, frozen)
            }
        };

        let after = Balance {
            account_id: self.account_id,
            currency: self.currency.clone(),
            available,
            frozen,
            version: self.version + 1,
            updated_at: now,
        };

        Ok(AppliedMutation {
            before: self.clone(),
            after,
        })
    }
}

impl LedgerEntry {
    /// Entry for a successfully-applied mutation
    pub fn success(req: &MutationRequest, applied: &AppliedMutation, now: DateTime<Utc>) -> Self {
        Self {
            transaction_id: req.transaction_id.clone(),
            account_id: req.account_id,
            currency: req.currency.clone(),
            kind: req.kind.as_str().to_string(),
            amount: req.amount,
            available_before: applied.before.available,
            available_after: applied.after.available,
            frozen_before: applied.before.frozen,
            frozen_after: applied.after.frozen,
            status: LedgerStatus::Success,
            error_message: None,
            created_at: now,
        }
    }

    /// Entry for a terminally-rejected mutation. Before == after: the
    /// balance did not move.
    pub fn failed(
        req: &MutationRequest,
        current: Option<&Balance>,
        error: &CoreError,
        now: DateTime<Utc>,
    ) -> Self {
        let (available, frozen) = current
            .map(|b| (b.available, b.frozen))
            .unwrap_or((Decimal::ZERO, Decimal::ZERO));
        Self {
            transaction_id: req.transaction_id.clone(),
            account_id: req.account_id,
            currency: req.currency.clone(),
            kind: req.kind.as_str().to_string(),
            amount: req.amount,
            available_before: available,
            available_after: available,
            frozen_before: frozen,
            frozen_after: frozen,
            status: LedgerStatus::Failed,
            error_message: Some(error.to_string()),
            created_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AccountId, Currency};
    use rust_decimal_macros::dec;

    fn balance(available: Decimal, frozen: Decimal) -> Balance {
        Balance {
            account_id: AccountId(1),
            currency: Currency::new("USDT").unwrap(),
            available,
            frozen,
            version: 3,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_deposit_adds_available() {
        let b = balance(dec!(100), dec!(0));
        let applied = b
            .apply(&MutationKind::Deposit, dec!(25.50), Utc::now())
            .unwrap();
        assert_eq!(applied.after.available, dec!(125.50));
        assert_eq!(applied.after.frozen, dec!(0));
        assert_eq!(applied.after.version, 4);
    }

    #[test]
    fn test_withdraw_exact_boundary() {
        let b = balance(dec!(100), dec!(0));

        // amount == available succeeds and leaves zero
        let applied = b
            .apply(&MutationKind::Withdraw, dec!(100), Utc::now())
            .unwrap();
        assert_eq!(applied.after.available, dec!(0));

        // one cent over fails
        let err = b
            .apply(&MutationKind::Withdraw, dec!(100.01), Utc::now())
            .unwrap_err();
        assert!(matches!(err, CoreError::InsufficientFunds { .. }));
    }

    #[test]
    fn test_freeze_moves_to_frozen() {
        let b = balance(dec!(100), dec!(0));
        let applied = b.apply(&MutationKind::Freeze, dec!(40), Utc::now()).unwrap();
        assert_eq!(applied.after.available, dec!(60));
        assert_eq!(applied.after.frozen, dec!(40));
    }

    #[test]
    fn test_unfreeze_returns_to_available() {
        let b = balance(dec!(60), dec!(40));
        let applied = b
            .apply(&MutationKind::Unfreeze, dec!(40), Utc::now())
            .unwrap();
        assert_eq!(applied.after.available, dec!(100));
        assert_eq!(applied.after.frozen, dec!(0));
    }

    #[test]
    fn test_unfreeze_more_than_frozen_rejected() {
        let b = balance(dec!(60), dec!(40));
        let err = b
            .apply(&MutationKind::Unfreeze, dec!(40.01), Utc::now())
            .unwrap_err();
        assert!(matches!(err, CoreError::InsufficientFunds { .. }));
    }

    #[test]
    fn test_transfer_applies_as_withdraw() {
        let b = balance(dec!(100), dec!(0));
        let applied = b
            .apply(
                &MutationKind::Transfer {
                    to_account: AccountId(2),
                },
                dec!(30),
                Utc::now(),
            )
            .unwrap();
        assert_eq!(applied.after.available, dec!(70));
        assert_eq!(applied.after.frozen, dec!(0));
    }

    #[test]
    fn test_failed_entry_does_not_move_balance() {
        let b = balance(dec!(10), dec!(5));
        let req = MutationRequest {
            transaction_id: crate::types::TransactionId::new("t2").unwrap(),
            account_id: AccountId(1),
            partition_key: "acct-1".to_string(),
            currency: Currency::new("USDT").unwrap(),
            kind: MutationKind::Withdraw,
            amount: dec!(150),
            description: None,
            metadata: serde_json::Value::Null,
        };
        let err = b.apply(&req.kind, req.amount, Utc::now()).unwrap_err();
        let entry = LedgerEntry::failed(&req, Some(&b), &err, Utc::now());

        assert_eq!(entry.status, LedgerStatus::Failed);
        assert_eq!(entry.available_before, entry.available_after);
        assert_eq!(entry.frozen_before, entry.frozen_after);
        assert!(entry.error_message.unwrap().contains("insufficient funds"));
    }
}
