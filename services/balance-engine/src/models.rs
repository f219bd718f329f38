use balance_core::{
    AccountId, Balance, CoreError, Currency, LedgerEntry, LedgerStatus, MutationRequest,
    TransactionId,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Row of the `balances` table
#[derive(Debug, Clone, FromRow)]
pub struct BalanceRow {
    pub account_id: i64,
    pub currency_code: String,
    pub available: Decimal,
    pub frozen: Decimal,
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

impl BalanceRow {
    pub fn into_balance(self) -> Result<Balance, CoreError> {
        Ok(Balance {
            account_id: AccountId(self.account_id),
            currency: Currency::new(self.currency_code)?,
            available: self.available,
            frozen: self.frozen,
            version: self.version,
            updated_at: self.updated_at,
        })
    }
}

/// Row of the `ledger` table
#[derive(Debug, Clone, FromRow)]
pub struct LedgerRow {
    pub transaction_id: String,
    pub account_id: i64,
    pub currency_code: String,
    pub kind: String,
    pub amount: Decimal,
    pub available_before: Decimal,
    pub available_after: Decimal,
    pub frozen_before: Decimal,
    pub frozen_after: Decimal,
    pub status: String,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl LedgerRow {
    pub fn into_entry(self) -> Result<LedgerEntry, CoreError> {
        let status = LedgerStatus::parse(&self.status).ok_or_else(|| {
            CoreError::Validation(format!("unknown ledger status: {}", self.status))
        })?;
        Ok(LedgerEntry {
            transaction_id: TransactionId::new(self.transaction_id)?,
            account_id: AccountId(self.account_id),
            currency: Currency::new(self.currency_code)?,
            kind: self.kind,
            amount: self.amount,
            available_before: self.available_before,
            available_after: self.available_after,
            frozen_before: self.frozen_before,
            frozen_after: self.frozen_after,
            status,
            error_message: self.error_message,
            created_at: self.created_at,
        })
    }
}

/// Row of the `outbox` table
#[derive(Debug, Clone, FromRow)]
pub struct OutboxRow {
    pub event_id: Uuid,
    pub topic: String,
    pub partition_key: String,
    pub transaction_id: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub retry_count: i32,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

impl OutboxRow {
    pub fn request(&self) -> Result<MutationRequest, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}

/// Outbox row lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    Pending,
    Sent,
    Failed,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::Sent => "sent",
            OutboxStatus::Failed => "failed",
        }
    }
}

/// Row of the `leader_lease` table
#[derive(Debug, Clone, FromRow)]
pub struct LeaseRow {
    pub partition_id: i32,
    pub holder_id: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Row of the `consumer_offset` table
#[derive(Debug, Clone, FromRow)]
pub struct OffsetRow {
    pub group_name: String,
    pub topic: String,
    pub partition_id: i32,
    pub last_offset: i64,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_balance_row_conversion() {
        let row = BalanceRow {
            account_id: 1,
            currency_code: "USDT".to_string(),
            available: dec!(100.00),
            frozen: dec!(0),
            version: 1,
            updated_at: Utc::now(),
        };
        let balance = row.into_balance().unwrap();
        assert_eq!(balance.account_id, AccountId(1));
        assert_eq!(balance.available, dec!(100.00));
    }

    #[test]
    fn test_ledger_row_rejects_unknown_status() {
        let row = LedgerRow {
            transaction_id: "t1".to_string(),
            account_id: 1,
            currency_code: "USDT".to_string(),
            kind: "deposit".to_string(),
            amount: dec!(1),
            available_before: dec!(0),
            available_after: dec!(1),
            frozen_before: dec!(0),
            frozen_after: dec!(0),
            status: "limbo".to_string(),
            error_message: None,
            created_at: Utc::now(),
        };
        assert!(row.into_entry().is_err());
    }

    #[test]
    fn test_outbox_status_labels() {
        assert_eq!(OutboxStatus::Pending.as_str(), "pending");
        assert_eq!(OutboxStatus::Sent.as_str(), "sent");
        assert_eq!(OutboxStatus::Failed.as_str(), "failed");
    }
}
