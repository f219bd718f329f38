//! Wire format for balance-change records
//!
//! The message value is the mutation request itself, serialized as a
//! self-describing JSON object with a `kind` discriminant. Event id and
//! transaction id also travel in NATS headers so operators can trace a
//! record without parsing the body.

use async_nats::HeaderMap;
use balance_core::MutationRequest;
use bytes::Bytes;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Header carrying the outbox event id
pub const HEADER_EVENT_ID: &str = "Balances-Event-Id";

/// Header carrying the client transaction id
pub const HEADER_TRANSACTION_ID: &str = "Balances-Transaction-Id";

/// One record on the balance-changes log, as seen by a consumer
#[derive(Debug, Clone)]
pub struct ChangeRecord {
    /// Outbox event id that published this record
    pub event_id: Uuid,

    /// Partition the record was routed to
    pub partition: u32,

    /// Stream sequence; this is the offset the consumer commits
    pub offset: u64,

    /// The mutation itself
    pub request: MutationRequest,
}

impl ChangeRecord {
    /// Encode a request for publication: JSON body plus tracing headers
    pub fn encode(event_id: Uuid, request: &MutationRequest) -> Result<(Bytes, HeaderMap)> {
        let body = serde_json::to_vec(request)?;

        let mut headers = HeaderMap::new();
        headers.insert(HEADER_EVENT_ID, event_id.to_string().as_str());
        headers.insert(
            HEADER_TRANSACTION_ID,
            request.transaction_id.as_str(),
        );

        Ok((Bytes::from(body), headers))
    }

    /// Decode a consumed message. `offset` is the JetStream stream
    /// sequence, `subject` the partition subject the record arrived on.
    pub fn decode(
        payload: &[u8],
        headers: Option<&HeaderMap>,
        subject: &str,
        offset: u64,
    ) -> Result<Self> {
        let request: MutationRequest =
            serde_json::from_slice(payload).map_err(|e| Error::Malformed {
                offset,
                reason: e.to_string(),
            })?;

        let event_id = headers
            .and_then(|h| h.get(HEADER_EVENT_ID))
            .and_then(|v| Uuid::parse_str(v.as_str()).ok())
            .ok_or_else(|| Error::Malformed {
                offset,
                reason: format!("missing or invalid {} header", HEADER_EVENT_ID),
            })?;

        let partition = subject
            .rsplit('.')
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| Error::Malformed {
                offset,
                reason: format!("subject {} has no partition segment", subject),
            })?;

        Ok(Self {
            event_id,
            partition,
            offset,
            request,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use balance_core::{AccountId, Currency, MutationKind, TransactionId};
    use rust_decimal_macros::dec;

    fn request() -> MutationRequest {
        MutationRequest {
            transaction_id: TransactionId::new("t1").unwrap(),
            account_id: AccountId(1),
            partition_key: "acct-1".to_string(),
            currency: Currency::new("USDT").unwrap(),
            kind: MutationKind::Deposit,
            amount: dec!(100.00),
            description: None,
            metadata: serde_json::Value::Null,
        }
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let event_id = Uuid::new_v4();
        let req = request();
        let (body, headers) = ChangeRecord::encode(event_id, &req).unwrap();

        let record =
            ChangeRecord::decode(&body, Some(&headers), "balances.changes.5", 42).unwrap();

        assert_eq!(record.event_id, event_id);
        assert_eq!(record.partition, 5);
        assert_eq!(record.offset, 42);
        assert_eq!(record.request.transaction_id, req.transaction_id);
        assert_eq!(record.request.amount, req.amount);
    }

    #[test]
    fn test_decode_malformed_body() {
        let err = ChangeRecord::decode(b"not json", None, "balances.changes.0", 7).unwrap_err();
        assert!(matches!(err, Error::Malformed { offset: 7, .. }));
    }

    #[test]
    fn test_decode_missing_event_header() {
        let req = request();
        let body = serde_json::to_vec(&req).unwrap();
        let err =
            ChangeRecord::decode(&body, None, "balances.changes.0", 9).unwrap_err();
        assert!(matches!(err, Error::Malformed { offset: 9, .. }));
    }
}
