//! Core types for the balance service
//!
//! All types are designed for:
//! - Exact arithmetic (Decimal for money, DECIMAL(36,18) in the store)
//! - Self-describing serialization (serde_json payloads on the log)
//! - Idempotency (client-supplied transaction ids, unique in the ledger)

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CoreError;

/// Numeric internal account identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(pub i64);

impl AccountId {
    /// Get the raw id
    pub fn value(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Currency code (upper-case, e.g. "USDT")
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Currency(String);

impl Currency {
    /// Create a currency code, normalizing to upper-case.
    pub fn new(code: impl Into<String>) -> Result<Self, CoreError> {
        let code: String = code.into();
        if code.is_empty() || code.len() > 16 || !code.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(CoreError::Validation(format!(
                "invalid currency code: {:?}",
                code
            )));
        }
        Ok(Self(code.to_ascii_uppercase()))
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Client-supplied, globally-unique transaction identifier.
///
/// This is the idempotency key: the ledger holds at most one terminal row
/// per transaction id, ever.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(String);

impl TransactionId {
    /// Create a transaction id
    pub fn new(id: impl Into<String>) -> Result<Self, CoreError> {
        let id: String = id.into();
        if id.is_empty() || id.len() > 128 {
            return Err(CoreError::Validation(format!(
                "invalid transaction id length: {}",
                id.len()
            )));
        }
        Ok(Self(id))
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Mutation kind discriminant
///
/// Transfer is applied as a withdraw on the source partition; the
/// counter-deposit is an independent mutation on the target partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MutationKind {
    /// available += amount
    Deposit,
    /// available -= amount, rejected if the result is negative
    Withdraw,
    /// available -= amount, frozen += amount
    Freeze,
    /// available += amount, frozen -= amount
    Unfreeze,
    /// Withdraw on the source account; the target receives its own deposit
    Transfer {
        /// Account credited by the independent counter-deposit
        to_account: AccountId,
    },
}

impl MutationKind {
    /// Stable lower-case label for ledger rows and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationKind::Deposit => "deposit",
            MutationKind::Withdraw => "withdraw",
            MutationKind::Freeze => "freeze",
            MutationKind::Unfreeze => "unfreeze",
            MutationKind::Transfer { .. } => "transfer",
        }
    }

    /// Deposits may lazily create a zero balance on first touch
    pub fn creates_balance(&self) -> bool {
        matches!(self, MutationKind::Deposit)
    }
}

/// A validated monetary mutation submitted by a client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutationRequest {
    /// Idempotency key (client-supplied, globally unique)
    pub transaction_id: TransactionId,

    /// Target account
    pub account_id: AccountId,

    /// Stable per-account routing key; all mutations for one account map
    /// to one log partition
    pub partition_key: String,

    /// Currency of the mutation
    pub currency: Currency,

    /// Mutation kind
    #[serde(flatten)]
    pub kind: MutationKind,

    /// Exact-decimal amount, strictly positive
    pub amount: Decimal,

    /// Optional human-readable description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Reserved opaque extension field
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub metadata: serde_json::Value,
}

impl MutationRequest {
    /// Validate the invariants a request must satisfy before it reaches
    /// the outbox: positive amount, sane scale.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.amount <= Decimal::ZERO {
            return Err(CoreError::Validation(format!(
                "amount must be positive, got {}",
                self.amount
            )));
        }
        if self.amount.scale() > 18 {
            return Err(CoreError::Validation(format!(
                "amount scale {} exceeds 18",
                self.amount.scale()
            )));
        }
        if self.partition_key.is_empty() {
            return Err(CoreError::Validation("empty partition key".to_string()));
        }
        Ok(())
    }
}

/// Committed balance state for one (account, currency)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    /// Account
    pub account_id: AccountId,

    /// Currency
    pub currency: Currency,

    /// Spendable amount, never negative
    pub available: Decimal,

    /// Frozen amount, never negative
    pub frozen: Decimal,

    /// Monotonic version, incremented on every successful mutation
    pub version: i64,

    /// Last mutation timestamp
    pub updated_at: DateTime<Utc>,
}

impl Balance {
    /// Zero balance created lazily on the first deposit touching a
    /// previously-unknown (account, currency)
    pub fn zero(account_id: AccountId, currency: Currency, now: DateTime<Utc>) -> Self {
        Self {
            account_id,
            currency,
            available: Decimal::ZERO,
            frozen: Decimal::ZERO,
            version: 0,
            updated_at: now,
        }
    }
}

/// Terminal outcome of one mutation, uniquely keyed by transaction id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerStatus {
    /// Row created, not yet processed
    Init,
    /// Row picked up by a worker
    Processing,
    /// Mutation applied (terminal)
    Success,
    /// Mutation rejected (terminal)
    Failed,
}

impl LedgerStatus {
    /// Stable lower-case label, matches the `ledger.status` column
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerStatus::Init => "init",
            LedgerStatus::Processing => "processing",
            LedgerStatus::Success => "success",
            LedgerStatus::Failed => "failed",
        }
    }

    /// Parse from the column value
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "init" => Some(LedgerStatus::Init),
            "processing" => Some(LedgerStatus::Processing),
            "success" => Some(LedgerStatus::Success),
            "failed" => Some(LedgerStatus::Failed),
            _ => None,
        }
    }

    /// Success or Failed
    pub fn is_terminal(&self) -> bool {
        matches!(self, LedgerStatus::Success | LedgerStatus::Failed)
    }
}

/// One row per processed mutation with before/after snapshots.
///
/// Chaining invariant: for two successful entries of the same
/// (account, currency) in commit order, the later entry's before-state
/// equals the earlier entry's after-state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Idempotency key
    pub transaction_id: TransactionId,

    /// Account
    pub account_id: AccountId,

    /// Currency
    pub currency: Currency,

    /// Mutation kind label
    pub kind: String,

    /// Mutation amount
    pub amount: Decimal,

    /// Available before the mutation
    pub available_before: Decimal,

    /// Available after the mutation
    pub available_after: Decimal,

    /// Frozen before the mutation
    pub frozen_before: Decimal,

    /// Frozen after the mutation
    pub frozen_after: Decimal,

    /// Terminal status
    pub status: LedgerStatus,

    /// Rejection reason when status is Failed
    pub error_message: Option<String>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_currency_normalizes_case() {
        let c = Currency::new("usdt").unwrap();
        assert_eq!(c.as_str(), "USDT");
    }

    #[test]
    fn test_currency_rejects_garbage() {
        assert!(Currency::new("").is_err());
        assert!(Currency::new("US DT").is_err());
        assert!(Currency::new("X".repeat(17)).is_err());
    }

    #[test]
    fn test_transaction_id_bounds() {
        assert!(TransactionId::new("t1").is_ok());
        assert!(TransactionId::new("").is_err());
        assert!(TransactionId::new("x".repeat(129)).is_err());
    }

    #[test]
    fn test_request_validation() {
        let req = MutationRequest {
            transaction_id: TransactionId::new("t1").unwrap(),
            account_id: AccountId(1),
            partition_key: "acct-1".to_string(),
            currency: Currency::new("USDT").unwrap(),
            kind: MutationKind::Deposit,
            amount: dec!(100.00),
            description: None,
            metadata: serde_json::Value::Null,
        };
        assert!(req.validate().is_ok());

        let mut bad = req.clone();
        bad.amount = dec!(0);
        assert!(bad.validate().is_err());

        let mut bad = req.clone();
        bad.amount = dec!(-5);
        assert!(bad.validate().is_err());

        let mut bad = req;
        bad.partition_key = String::new();
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_mutation_kind_roundtrip() {
        let req = MutationRequest {
            transaction_id: TransactionId::new("t9").unwrap(),
            account_id: AccountId(7),
            partition_key: "acct-7".to_string(),
            currency: Currency::new("BTC").unwrap(),
            kind: MutationKind::Transfer {
                to_account: AccountId(8),
            },
            amount: dec!(0.5),
            description: Some("payout".to_string()),
            metadata: serde_json::Value::Null,
        };

        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"kind\":\"transfer\""));

        let back: MutationRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back.kind, req.kind);
        assert_eq!(back.amount, req.amount);
    }

    #[test]
    fn test_ledger_status_parse() {
        assert_eq!(LedgerStatus::parse("success"), Some(LedgerStatus::Success));
        assert_eq!(LedgerStatus::parse("bogus"), None);
        assert!(LedgerStatus::Failed.is_terminal());
        assert!(!LedgerStatus::Processing.is_terminal());
    }
}
