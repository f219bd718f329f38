//! NATS client wrapper with connection management

use crate::error::{Error, Result};
use crate::types::{changes_wildcard, CHANGES_STREAM, DLQ_STREAM, DLQ_SUBJECT};
use async_nats::jetstream::{self, stream::Config as StreamConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::info;

/// NATS client configuration
#[derive(Debug, Clone)]
pub struct NatsConfig {
    /// NATS server URLs
    pub urls: Vec<String>,

    /// Connection name
    pub name: String,

    /// Connection timeout
    pub connection_timeout: Duration,

    /// Retention for the changes stream
    pub changes_max_age: Duration,

    /// Retention for the DLQ stream
    pub dlq_max_age: Duration,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            urls: vec!["nats://localhost:4222".to_string()],
            name: "balance-engine".to_string(),
            connection_timeout: Duration::from_secs(5),
            changes_max_age: Duration::from_secs(7 * 24 * 60 * 60),
            dlq_max_age: Duration::from_secs(30 * 24 * 60 * 60),
        }
    }
}

/// NATS client wrapper
pub struct NatsClient {
    config: NatsConfig,
    client: Arc<RwLock<Option<async_nats::Client>>>,
    jetstream: Arc<RwLock<Option<jetstream::Context>>>,
}

impl NatsClient {
    /// Create new NATS client (not yet connected)
    pub fn new(config: NatsConfig) -> Self {
        Self {
            config,
            client: Arc::new(RwLock::new(None)),
            jetstream: Arc::new(RwLock::new(None)),
        }
    }

    /// Connect to NATS and initialize JetStream
    pub async fn connect(&self) -> Result<()> {
        info!("Connecting to NATS servers: {:?}", self.config.urls);

        let options = async_nats::ConnectOptions::new()
            .name(&self.config.name)
            .connection_timeout(self.config.connection_timeout)
            .retry_on_initial_connect();

        let client = async_nats::connect_with_options(self.config.urls.join(","), options)
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;

        info!("Connected to NATS");

        *self.client.write().await = Some(client.clone());
        *self.jetstream.write().await = Some(jetstream::new(client));

        Ok(())
    }

    /// Get underlying NATS client
    pub async fn client(&self) -> Result<async_nats::Client> {
        self.client
            .read()
            .await
            .clone()
            .ok_or_else(|| Error::Connection("Not connected".to_string()))
    }

    /// Get JetStream context
    pub async fn jetstream(&self) -> Result<jetstream::Context> {
        self.jetstream
            .read()
            .await
            .clone()
            .ok_or_else(|| Error::JetStream("JetStream not initialized".to_string()))
    }

    /// Check if connected
    pub async fn is_connected(&self) -> bool {
        self.client.read().await.is_some()
    }

    /// Ensure the balance-changes stream exists (all partition subjects)
    pub async fn ensure_changes_stream(&self) -> Result<jetstream::stream::Stream> {
        self.get_or_create_stream(
            CHANGES_STREAM,
            vec![changes_wildcard()],
            self.config.changes_max_age,
        )
        .await
    }

    /// Ensure the dead-letter stream exists
    pub async fn ensure_dlq_stream(&self) -> Result<jetstream::stream::Stream> {
        self.get_or_create_stream(
            DLQ_STREAM,
            vec![DLQ_SUBJECT.to_string()],
            self.config.dlq_max_age,
        )
        .await
    }

    async fn get_or_create_stream(
        &self,
        stream_name: &str,
        subjects: Vec<String>,
        max_age: Duration,
    ) -> Result<jetstream::stream::Stream> {
        let js = self.jetstream().await?;

        match js.get_stream(stream_name).await {
            Ok(stream) => {
                info!("Using existing JetStream stream: {}", stream_name);
                Ok(stream)
            }
            Err(_) => {
                info!("Creating JetStream stream: {}", stream_name);

                let config = StreamConfig {
                    name: stream_name.to_string(),
                    subjects,
                    max_age,
                    retention: jetstream::stream::RetentionPolicy::Limits,
                    storage: jetstream::stream::StorageType::File,
                    num_replicas: 1,
                    ..Default::default()
                };

                js.create_stream(config)
                    .await
                    .map_err(|e| Error::JetStream(e.to_string()))
            }
        }
    }

    /// Disconnect, flushing pending messages
    pub async fn disconnect(&self) -> Result<()> {
        if let Some(client) = self.client.write().await.take() {
            client
                .flush()
                .await
                .map_err(|e| Error::Connection(e.to_string()))?;
            info!("Disconnected from NATS");
        }

        *self.jetstream.write().await = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_nats_config_default() {
        let config = NatsConfig::default();
        assert_eq!(config.urls.len(), 1);
        assert_eq!(config.name, "balance-engine");
    }

    #[tokio::test]
    async fn test_client_starts_disconnected() {
        let client = NatsClient::new(NatsConfig::default());
        assert!(!client.is_connected().await);
        assert!(client.client().await.is_err());
    }
}
