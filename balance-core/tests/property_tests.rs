//! Property-based tests for balance invariants
//!
//! These use proptest to verify the critical invariants:
//! - Non-negativity: committed available/frozen never go below zero
//! - Conservation: signed sum of applied amounts equals the net change
//! - Ledger chaining: each after-state is the next before-state
//! - Determinism: replaying the same mutations yields the same state

use balance_core::{
    AccountId, Balance, CoreError, Currency, MutationKind, WorkingSet,
};
use chrono::Utc;
use proptest::prelude::*;
use rust_decimal::Decimal;

/// Strategy for positive amounts with up to 2 decimal places
fn amount_strategy() -> impl Strategy<Value = Decimal> {
    (1u64..1_000_000_00u64).prop_map(|cents| Decimal::new(cents as i64, 2))
}

/// Strategy for mutation kinds (transfer behaves as withdraw)
fn kind_strategy() -> impl Strategy<Value = MutationKind> {
    prop_oneof![
        Just(MutationKind::Deposit),
        Just(MutationKind::Withdraw),
        Just(MutationKind::Freeze),
        Just(MutationKind::Unfreeze),
        Just(MutationKind::Transfer {
            to_account: AccountId(99)
        }),
    ]
}

fn zero_balance() -> Balance {
    Balance::zero(AccountId(1), Currency::new("USDT").unwrap(), Utc::now())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// Property: no sequence of mutations can drive available or frozen
    /// below zero; rejected mutations leave the state untouched.
    #[test]
    fn prop_non_negativity(ops in prop::collection::vec((kind_strategy(), amount_strategy()), 1..64)) {
        let mut balance = zero_balance();

        for (kind, amount) in ops {
            match balance.apply(&kind, amount, Utc::now()) {
                Ok(applied) => balance = applied.after,
                Err(CoreError::InsufficientFunds { .. }) => {} // state unchanged
                Err(e) => prop_assert!(false, "unexpected error: {}", e),
            }

            prop_assert!(balance.available >= Decimal::ZERO);
            prop_assert!(balance.frozen >= Decimal::ZERO);
        }
    }

    /// Property: the signed sum over successful mutations equals the final
    /// available minus the initial available (+deposit/+unfreeze,
    /// -withdraw/-freeze on the available column).
    #[test]
    fn prop_conservation(ops in prop::collection::vec((kind_strategy(), amount_strategy()), 1..64)) {
        let mut balance = zero_balance();
        let initial_available = balance.available;
        let mut signed_sum = Decimal::ZERO;

        for (kind, amount) in ops {
            if let Ok(applied) = balance.apply(&kind, amount, Utc::now()) {
                signed_sum += match kind {
                    MutationKind::Deposit | MutationKind::Unfreeze => amount,
                    MutationKind::Withdraw
                    | MutationKind::Freeze
                    | MutationKind::Transfer { .. } => -amount,
                };
                balance = applied.after;
            }
        }

        prop_assert_eq!(balance.available - initial_available, signed_sum);
    }

    /// Property: successful applications chain; each before-state equals
    /// the previous after-state and versions increase by exactly one.
    #[test]
    fn prop_ledger_chaining(ops in prop::collection::vec((kind_strategy(), amount_strategy()), 1..64)) {
        let mut balance = zero_balance();

        for (kind, amount) in ops {
            if let Ok(applied) = balance.apply(&kind, amount, Utc::now()) {
                prop_assert_eq!(applied.before.available, balance.available);
                prop_assert_eq!(applied.before.frozen, balance.frozen);
                prop_assert_eq!(applied.after.version, applied.before.version + 1);
                balance = applied.after;
            }
        }
    }

    /// Property: applying the same mutation sequence twice from the same
    /// start state yields identical end states (replay determinism).
    #[test]
    fn prop_replay_determinism(ops in prop::collection::vec((kind_strategy(), amount_strategy()), 1..64)) {
        let now = Utc::now();

        let run = || {
            let mut balance = zero_balance();
            for (kind, amount) in &ops {
                if let Ok(applied) = balance.apply(kind, *amount, now) {
                    balance = applied.after;
                }
            }
            balance
        };

        let first = run();
        let second = run();
        prop_assert_eq!(first.available, second.available);
        prop_assert_eq!(first.frozen, second.frozen);
        prop_assert_eq!(first.version, second.version);
    }

    /// Property: the working set never exceeds its capacity and always
    /// returns the most recently written balance for a key.
    #[test]
    fn prop_working_set_bounded(accounts in prop::collection::vec(1i64..32, 1..256)) {
        let capacity = 8usize;
        let mut set = WorkingSet::new(capacity);
        let usdt = Currency::new("USDT").unwrap();

        for (i, account) in accounts.iter().enumerate() {
            let balance = Balance {
                account_id: AccountId(*account),
                currency: usdt.clone(),
                available: Decimal::from(i as i64),
                frozen: Decimal::ZERO,
                version: i as i64,
                updated_at: Utc::now(),
            };
            set.put(balance);
            prop_assert!(set.len() <= capacity);
        }

        // The last write for the final account must be visible
        let last = *accounts.last().unwrap();
        let got = set.get(AccountId(last), &usdt);
        prop_assert!(got.is_some());
    }
}
