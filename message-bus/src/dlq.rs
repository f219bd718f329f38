//! Dead-letter routing
//!
//! Records that cannot be applied (parse failures, retry-exhausted
//! transients) are wrapped with failure metadata and published to the DLQ
//! stream; the partition then advances past them so one poison record can
//! never block an account's mutations.

use crate::{
    client::NatsClient,
    metrics::DLQ_ROUTED_TOTAL,
    types::DLQ_SUBJECT,
    Error, Result,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

/// DLQ wrapper around an unprocessable record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetter {
    /// Topic/subject the record originally arrived on
    pub original_topic: String,

    /// Stream sequence of the original record
    pub original_offset: u64,

    /// Partition key of the original record, when known
    pub original_key: Option<String>,

    /// Raw bytes of the original record
    pub original_value_bytes: Vec<u8>,

    /// When the record was given up on
    pub failed_at: DateTime<Utc>,

    /// Number of processing attempts made
    pub retry_count: u32,

    /// Stable error kind label
    pub error_kind: String,

    /// Human-readable failure detail
    pub error_message: String,
}

/// Publishes dead letters to the DLQ stream
pub struct DlqPublisher {
    client: Arc<NatsClient>,
    subject: String,
}

impl DlqPublisher {
    /// Create a DLQ publisher for the default subject
    pub fn new(client: Arc<NatsClient>) -> Self {
        Self::with_subject(client, DLQ_SUBJECT)
    }

    /// Create a DLQ publisher for a configured subject
    pub fn with_subject(client: Arc<NatsClient>, subject: impl Into<String>) -> Self {
        Self {
            client,
            subject: subject.into(),
        }
    }

    /// Route a record to the dead-letter topic
    pub async fn route(&self, letter: DeadLetter) -> Result<()> {
        warn!(
            original_topic = %letter.original_topic,
            original_offset = letter.original_offset,
            error_kind = %letter.error_kind,
            retry_count = letter.retry_count,
            "Routing record to DLQ: {}",
            letter.error_message
        );

        let payload = serde_json::to_vec(&letter)?;

        let js = self.client.jetstream().await?;
        js.publish(self.subject.clone(), Bytes::from(payload))
            .await
            .map_err(|e| Error::Publish(e.to_string()))?
            .await
            .map_err(|e| Error::JetStream(format!("DLQ publish ack failed: {}", e)))?;

        DLQ_ROUTED_TOTAL
            .with_label_values(&[&letter.error_kind])
            .inc();

        Ok(())
    }
}

impl DeadLetter {
    /// Wrapper for a record that failed to parse
    pub fn parse_failure(
        subject: impl Into<String>,
        offset: u64,
        payload: &[u8],
        reason: impl Into<String>,
    ) -> Self {
        Self {
            original_topic: subject.into(),
            original_offset: offset,
            original_key: None,
            original_value_bytes: payload.to_vec(),
            failed_at: Utc::now(),
            retry_count: 0,
            error_kind: "parse_error".to_string(),
            error_message: reason.into(),
        }
    }

    /// Wrapper for a record dropped after retry exhaustion
    pub fn retry_exhausted(
        subject: impl Into<String>,
        offset: u64,
        key: Option<String>,
        payload: &[u8],
        retry_count: u32,
        error_kind: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            original_topic: subject.into(),
            original_offset: offset,
            original_key: key,
            original_value_bytes: payload.to_vec(),
            failed_at: Utc::now(),
            retry_count,
            error_kind: error_kind.into(),
            error_message: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dead_letter_roundtrip() {
        let letter = DeadLetter::parse_failure("balances.changes.1", 44, b"\xffgarbage", "bad json");

        let json = serde_json::to_string(&letter).unwrap();
        let back: DeadLetter = serde_json::from_str(&json).unwrap();

        assert_eq!(back.original_offset, 44);
        assert_eq!(back.original_value_bytes, b"\xffgarbage".to_vec());
        assert_eq!(back.error_kind, "parse_error");
        assert_eq!(back.retry_count, 0);
    }

    #[test]
    fn test_retry_exhausted_metadata() {
        let letter = DeadLetter::retry_exhausted(
            "balances.changes.0",
            9,
            Some("acct-1".to_string()),
            b"{}",
            3,
            "transient",
            "db unreachable",
        );
        assert_eq!(letter.retry_count, 3);
        assert_eq!(letter.error_kind, "transient");
        assert_eq!(letter.original_key.as_deref(), Some("acct-1"));
    }
}
