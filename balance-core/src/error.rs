//! Tagged error kinds for the balance pipeline

use thiserror::Error;

/// Error kinds surfaced by the core.
///
/// The first four are terminal at the record level: they produce a failed
/// ledger row (where applicable) and the offset advances. `Transient` is
/// retryable, `LeaseLost` aborts the batch without an offset advance, and
/// `Dlq` marks a record demoted to the dead-letter topic.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Transaction id already has a terminal ledger row
    #[error("duplicate transaction: {0}")]
    Duplicate(String),

    /// Withdraw/freeze would take available below zero
    #[error("insufficient funds: available {available}, requested {requested}")]
    InsufficientFunds {
        /// Available amount at time of the attempt
        available: rust_decimal::Decimal,
        /// Amount the mutation asked for
        requested: rust_decimal::Decimal,
    },

    /// Non-deposit mutation against a (account, currency) with no balance row
    #[error("unknown balance: account {account} currency {currency}")]
    UnknownBalance {
        /// Account the mutation targeted
        account: i64,
        /// Currency code the mutation targeted
        currency: String,
    },

    /// Request failed validation before reaching the pipeline
    #[error("validation error: {0}")]
    Validation(String),

    /// Infrastructure hiccup; safe to retry with the same transaction id
    #[error("transient error: {0}")]
    Transient(String),

    /// The worker's lease was lost; the in-flight batch must roll back
    #[error("lease lost for partition {0}")]
    LeaseLost(u32),

    /// Record demoted to the dead-letter topic after retry exhaustion
    #[error("routed to dead-letter queue: {0}")]
    Dlq(String),
}

impl CoreError {
    /// True for kinds that terminate the record (failed ledger row, offset
    /// advances); false for kinds that must not advance the offset.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CoreError::Duplicate(_)
                | CoreError::InsufficientFunds { .. }
                | CoreError::UnknownBalance { .. }
                | CoreError::Validation(_)
        )
    }

    /// Stable lower-case label, used in ledger rows and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::Duplicate(_) => "duplicate",
            CoreError::InsufficientFunds { .. } => "insufficient_funds",
            CoreError::UnknownBalance { .. } => "unknown_balance",
            CoreError::Validation(_) => "validation",
            CoreError::Transient(_) => "transient",
            CoreError::LeaseLost(_) => "lease_lost",
            CoreError::Dlq(_) => "dlq",
        }
    }
}

/// Result type for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn test_terminal_classification() {
        assert!(CoreError::Duplicate("t1".into()).is_terminal());
        assert!(CoreError::InsufficientFunds {
            available: Decimal::ZERO,
            requested: Decimal::ONE,
        }
        .is_terminal());
        assert!(!CoreError::Transient("db down".into()).is_terminal());
        assert!(!CoreError::LeaseLost(3).is_terminal());
    }

    #[test]
    fn test_kind_labels() {
        assert_eq!(CoreError::Validation("x".into()).kind(), "validation");
        assert_eq!(CoreError::LeaseLost(0).kind(), "lease_lost");
    }
}
