//! Offset-addressed batch reader for partition consumers
//!
//! The relational `consumer_offset` table is the only consume cursor: the
//! reader is an ephemeral pull consumer created at (committed offset + 1)
//! with no acknowledgments, so the log may re-deliver records at-least-once
//! after a crash and the ledger index absorbs the duplicates.

use crate::{
    client::NatsClient,
    message::ChangeRecord,
    metrics::BATCH_SIZE,
    types::{changes_subject, CHANGES_STREAM},
    Error, Result,
};
use async_nats::jetstream::consumer;
use async_nats::HeaderMap;
use bytes::Bytes;
use futures::StreamExt;
use std::time::Duration;
use tracing::debug;

/// Batch accumulation tunables
#[derive(Debug, Clone)]
pub struct BatchReaderConfig {
    /// Flush when this many records have accumulated
    pub max_records: usize,

    /// Short poll while the buffer is non-empty; expiry flushes the batch
    pub max_latency: Duration,

    /// Long poll while idle; expiry yields an empty batch
    pub long_poll: Duration,
}

impl Default for BatchReaderConfig {
    fn default() -> Self {
        Self {
            max_records: 200,
            max_latency: Duration::from_millis(100),
            long_poll: Duration::from_millis(1000),
        }
    }
}

/// A consumed record before parsing. Kept raw so malformed payloads can be
/// routed to the dead-letter topic byte-for-byte.
#[derive(Debug, Clone)]
pub struct RawRecord {
    /// Subject the record arrived on
    pub subject: String,

    /// Stream sequence (the offset the consumer commits)
    pub offset: u64,

    /// NATS headers, if any
    pub headers: Option<HeaderMap>,

    /// Raw message bytes
    pub payload: Bytes,
}

impl RawRecord {
    /// Parse into a typed change record
    pub fn decode(&self) -> Result<ChangeRecord> {
        ChangeRecord::decode(
            &self.payload,
            self.headers.as_ref(),
            &self.subject,
            self.offset,
        )
    }
}

/// Pull-based batch reader for one partition
pub struct BatchReader {
    consumer: consumer::PullConsumer,
    partition: u32,
    config: BatchReaderConfig,
}

impl BatchReader {
    /// Create a reader for `partition` resuming after `committed_offset`
    /// (0 means read from the beginning of the partition subject).
    pub async fn for_partition(
        client: &NatsClient,
        partition: u32,
        committed_offset: u64,
        config: BatchReaderConfig,
    ) -> Result<Self> {
        let js = client.jetstream().await?;

        let stream = js
            .get_stream(CHANGES_STREAM)
            .await
            .map_err(|e| Error::JetStream(e.to_string()))?;

        let deliver_policy = if committed_offset == 0 {
            consumer::DeliverPolicy::All
        } else {
            consumer::DeliverPolicy::ByStartSequence {
                start_sequence: committed_offset + 1,
            }
        };

        // Ephemeral and unacknowledged: the DB offset is the cursor
        let consumer = stream
            .create_consumer(consumer::pull::Config {
                deliver_policy,
                ack_policy: consumer::AckPolicy::None,
                filter_subject: changes_subject(partition),
                ..Default::default()
            })
            .await
            .map_err(|e| Error::Consume(e.to_string()))?;

        debug!(partition, committed_offset, "Batch reader created");

        Ok(Self {
            consumer,
            partition,
            config,
        })
    }

    /// Accumulate the next batch.
    ///
    /// Polls with the long timeout while idle and the short timeout once
    /// records have accumulated; returns on `max_records`, on short-poll
    /// expiry with a non-empty buffer, or on long-poll expiry with an
    /// empty one (the caller treats that as a no-op flush).
    pub async fn next_batch(&mut self) -> Result<Vec<RawRecord>> {
        let mut buffer: Vec<RawRecord> = Vec::new();

        loop {
            let timeout = if buffer.is_empty() {
                self.config.long_poll
            } else {
                self.config.max_latency
            };
            let want = self.config.max_records - buffer.len();

            let mut messages = self
                .consumer
                .fetch()
                .max_messages(want)
                .expires(timeout)
                .messages()
                .await
                .map_err(|e| Error::Consume(e.to_string()))?;

            let before = buffer.len();

            while let Some(message) = messages.next().await {
                let message = message.map_err(|e| Error::Consume(e.to_string()))?;
                let info = message
                    .info()
                    .map_err(|e| Error::Consume(e.to_string()))?;

                buffer.push(RawRecord {
                    subject: message.subject.to_string(),
                    offset: info.stream_sequence,
                    headers: message.headers.clone(),
                    payload: message.payload.clone(),
                });
            }

            // Fetch expired without progress: flush whatever accumulated
            if buffer.len() == before || buffer.len() >= self.config.max_records {
                break;
            }
        }

        if !buffer.is_empty() {
            BATCH_SIZE
                .with_label_values(&[&self.partition.to_string()])
                .observe(buffer.len() as f64);
        }

        Ok(buffer)
    }

    /// Partition this reader serves
    pub fn partition(&self) -> u32 {
        self.partition
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_config_default() {
        let config = BatchReaderConfig::default();
        assert_eq!(config.max_records, 200);
        assert_eq!(config.max_latency, Duration::from_millis(100));
        assert_eq!(config.long_poll, Duration::from_millis(1000));
    }

    #[test]
    fn test_raw_record_decode_malformed() {
        let raw = RawRecord {
            subject: "balances.changes.2".to_string(),
            offset: 11,
            headers: None,
            payload: Bytes::from_static(b"{broken"),
        };
        assert!(matches!(
            raw.decode().unwrap_err(),
            Error::Malformed { offset: 11, .. }
        ));
    }
}
