//! Domain core for the account-balance service
//!
//! Pure types and arithmetic, no I/O:
//! - Exact-decimal balances with non-negativity enforcement
//! - Mutation requests keyed by client transaction id
//! - Ledger entries (the idempotency substrate)
//! - The per-partition working set

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod error;
pub mod mutation;
pub mod types;
pub mod working_set;

pub use error::{CoreError, Result};
pub use mutation::AppliedMutation;
pub use types::{
    AccountId, Balance, Currency, LedgerEntry, LedgerStatus, MutationKind, MutationRequest,
    TransactionId,
};
pub use working_set::WorkingSet;
