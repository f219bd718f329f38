use balance_core::{CoreError, MutationRequest};
use chrono::Utc;
use message_bus::{
    changes_subject,
    partitioning::{HashPartitioning, PartitioningStrategy},
    PartitionKey, Publisher,
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::errors::{EngineError, Result};
use crate::metrics::OUTBOX_SUBMIT_TOTAL;
use crate::models::OutboxStatus;

/// Unique index guarding one outbox row per transaction id
const OUTBOX_TX_CONSTRAINT: &str = "outbox_transaction_id_key";

/// Bridges a client request into the durable log without dual-write
/// anomalies: the row commits first, the publish follows, and the sweeper
/// repairs any publish the process did not live to finish.
pub struct OutboxWriter {
    pool: PgPool,
    publisher: Arc<Publisher>,
    partitioning: HashPartitioning,
}

impl OutboxWriter {
    pub fn new(pool: PgPool, publisher: Arc<Publisher>, partitions: u32) -> Self {
        Self {
            pool,
            publisher,
            partitioning: HashPartitioning::new(partitions),
        }
    }

    /// Accept a validated mutation. Returns the minted event id.
    ///
    /// `Duplicate` when the transaction id already exists in the ledger or
    /// the outbox; `Transient` when the database is unavailable (the
    /// caller retries with the same transaction id). A publish failure
    /// after commit is NOT surfaced: the row is durable and the sweeper
    /// will publish it later.
    pub async fn submit(&self, request: &MutationRequest) -> Result<Uuid> {
        request.validate().map_err(|e| {
            OUTBOX_SUBMIT_TOTAL.with_label_values(&["invalid"]).inc();
            EngineError::Core(e)
        })?;

        // A transaction id with a terminal ledger row is already
        // observable; reject before touching the outbox.
        let terminal: (bool,) = sqlx::query_as(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM ledger
                WHERE transaction_id = $1 AND status IN ('success', 'failed')
            )
            "#,
        )
        .bind(request.transaction_id.as_str())
        .fetch_one(&self.pool)
        .await?;

        if terminal.0 {
            OUTBOX_SUBMIT_TOTAL.with_label_values(&["duplicate"]).inc();
            return Err(EngineError::Core(CoreError::Duplicate(
                request.transaction_id.to_string(),
            )));
        }

        let event_id = Uuid::new_v4();
        let partition = self
            .partitioning
            .partition(&PartitionKey::new(request.partition_key.clone()));
        let topic = changes_subject(partition);
        let payload = serde_json::to_value(request)?;

        let insert = sqlx::query(
            r#"
            INSERT INTO outbox (
                event_id, topic, partition_key, transaction_id,
                payload, status, retry_count, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, 0, $7)
            "#,
        )
        .bind(event_id)
        .bind(&topic)
        .bind(&request.partition_key)
        .bind(request.transaction_id.as_str())
        .bind(&payload)
        .bind(OutboxStatus::Pending.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await;

        if let Err(e) = insert {
            let err = EngineError::from(e);
            if err.is_unique_violation(OUTBOX_TX_CONSTRAINT) {
                OUTBOX_SUBMIT_TOTAL.with_label_values(&["duplicate"]).inc();
                return Err(EngineError::Core(CoreError::Duplicate(
                    request.transaction_id.to_string(),
                )));
            }
            OUTBOX_SUBMIT_TOTAL.with_label_values(&["transient"]).inc();
            return Err(err);
        }

        debug!(
            event_id = %event_id,
            transaction_id = %request.transaction_id,
            partition,
            "Outbox row committed"
        );

        // Post-commit publish. The consumer dedupes on transaction id, so
        // a publish that succeeded but whose status update is lost only
        // costs a redundant re-publish by the sweeper.
        match self.publisher.publish(event_id, partition, request).await {
            Ok(_) => {
                self.mark(event_id, OutboxStatus::Sent).await;
                OUTBOX_SUBMIT_TOTAL.with_label_values(&["accepted"]).inc();
            }
            Err(e) => {
                warn!(event_id = %event_id, "Publish failed, leaving row for sweeper: {}", e);
                self.mark(event_id, OutboxStatus::Failed).await;
                OUTBOX_SUBMIT_TOTAL
                    .with_label_values(&["publish_deferred"])
                    .inc();
            }
        }

        Ok(event_id)
    }

    async fn mark(&self, event_id: Uuid, status: OutboxStatus) {
        let sent_at = (status == OutboxStatus::Sent).then(Utc::now);
        let result = sqlx::query(
            r#"
            UPDATE outbox SET status = $1, sent_at = $2 WHERE event_id = $3
            "#,
        )
        .bind(status.as_str())
        .bind(sent_at)
        .bind(event_id)
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            warn!(event_id = %event_id, status = status.as_str(), "Failed to update outbox status: {}", e);
        }
    }
}
