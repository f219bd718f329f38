//! Change record publisher with retry logic
//!
//! Publications are idempotent at the consumer (ledger transaction-id
//! dedupe), so a retry that double-delivers is harmless.

use crate::{
    client::NatsClient,
    message::ChangeRecord,
    metrics::{RECORD_PUBLISH_DURATION, RECORD_PUBLISH_TOTAL},
    types::changes_subject,
    Error, Result,
};
use async_nats::HeaderMap;
use balance_core::MutationRequest;
use bytes::Bytes;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, warn};
use uuid::Uuid;

/// Publisher configuration
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// Max retry attempts per publish
    pub max_retry_attempts: u32,

    /// Initial retry delay
    pub initial_retry_delay: Duration,

    /// Max retry delay
    pub max_retry_delay: Duration,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            max_retry_attempts: 3,
            initial_retry_delay: Duration::from_millis(100),
            max_retry_delay: Duration::from_secs(2),
        }
    }
}

/// Change record publisher
pub struct Publisher {
    client: Arc<NatsClient>,
    config: PublisherConfig,
}

impl Publisher {
    /// Create new publisher
    pub fn new(client: Arc<NatsClient>, config: PublisherConfig) -> Self {
        Self { client, config }
    }

    /// Publish a mutation to its partition subject, waiting for the
    /// JetStream acknowledgment. Returns the stream sequence assigned.
    pub async fn publish(
        &self,
        event_id: Uuid,
        partition: u32,
        request: &MutationRequest,
    ) -> Result<u64> {
        let start = Instant::now();
        let subject = changes_subject(partition);

        let (body, headers) = ChangeRecord::encode(event_id, request)?;

        let result = self
            .publish_with_retry(&subject, body, headers)
            .await;

        let duration = start.elapsed().as_secs_f64();
        RECORD_PUBLISH_DURATION
            .with_label_values(&[&subject])
            .observe(duration);

        let status = if result.is_ok() { "success" } else { "error" };
        RECORD_PUBLISH_TOTAL
            .with_label_values(&[&subject, status])
            .inc();

        result
    }

    /// Publish with exponential backoff retry
    async fn publish_with_retry(
        &self,
        subject: &str,
        body: Bytes,
        headers: HeaderMap,
    ) -> Result<u64> {
        let mut attempts = 0;
        let mut delay = self.config.initial_retry_delay;

        loop {
            attempts += 1;

            match self.publish_once(subject, body.clone(), headers.clone()).await {
                Ok(sequence) => return Ok(sequence),
                Err(e) => {
                    if attempts >= self.config.max_retry_attempts {
                        error!(
                            subject,
                            attempts, "Failed to publish change record: {}", e
                        );
                        return Err(e);
                    }

                    warn!(
                        subject,
                        attempts,
                        retry_in_ms = delay.as_millis() as u64,
                        "Publish failed, retrying: {}",
                        e
                    );
                    tokio::time::sleep(delay).await;

                    delay = (delay * 2).min(self.config.max_retry_delay);
                }
            }
        }
    }

    async fn publish_once(
        &self,
        subject: &str,
        body: Bytes,
        headers: HeaderMap,
    ) -> Result<u64> {
        let js = self.client.jetstream().await?;

        let ack = js
            .publish_with_headers(subject.to_string(), headers, body)
            .await
            .map_err(|e| Error::Publish(e.to_string()))?;

        let ack = ack
            .await
            .map_err(|e| Error::JetStream(format!("Publish ack failed: {}", e)))?;

        Ok(ack.sequence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::NatsConfig;

    #[tokio::test]
    async fn test_publisher_config_default() {
        let config = PublisherConfig::default();
        assert_eq!(config.max_retry_attempts, 3);
        assert_eq!(config.initial_retry_delay, Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_publish_without_connection_fails() {
        let client = Arc::new(NatsClient::new(NatsConfig::default()));
        let publisher = Publisher::new(client, PublisherConfig::default());

        let request = balance_core::MutationRequest {
            transaction_id: balance_core::TransactionId::new("t1").unwrap(),
            account_id: balance_core::AccountId(1),
            partition_key: "acct-1".to_string(),
            currency: balance_core::Currency::new("USDT").unwrap(),
            kind: balance_core::MutationKind::Deposit,
            amount: rust_decimal_macros::dec!(1),
            description: None,
            metadata: serde_json::Value::Null,
        };

        let result = publisher.publish(Uuid::new_v4(), 0, &request).await;
        assert!(result.is_err());
    }
}
