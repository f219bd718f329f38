use chrono::{Duration as ChronoDuration, Utc};
use message_bus::{DeadLetter, DlqPublisher, Publisher};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::{OutboxConfig, RetryConfig};
use crate::errors::Result;
use crate::metrics::OUTBOX_SWEEP_TOTAL;
use crate::models::OutboxRow;

/// Background reconciliation of the outbox.
///
/// Re-publishes rows stuck in `pending` past the stuck threshold (the
/// process died between commit and publish) and `failed` rows with retries
/// remaining, preserving the original event id. Retries are bounded:
/// exhaustion escalates the payload to the dead-letter topic and parks the
/// row so it is never selected again.
pub struct OutboxSweeper {
    pool: PgPool,
    publisher: Arc<Publisher>,
    dlq: Arc<DlqPublisher>,
    config: OutboxConfig,
    retry: RetryConfig,
    shutdown: watch::Receiver<bool>,
}

impl OutboxSweeper {
    pub fn new(
        pool: PgPool,
        publisher: Arc<Publisher>,
        dlq: Arc<DlqPublisher>,
        config: OutboxConfig,
        retry: RetryConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            pool,
            publisher,
            dlq,
            config,
            retry,
            shutdown,
        }
    }

    /// Run until shutdown
    pub async fn run(self) {
        let mut interval =
            tokio::time::interval(Duration::from_millis(self.config.sweep_interval_ms));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut shutdown = self.shutdown.clone();

        info!("Outbox sweeper started");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.sweep().await {
                        warn!("Outbox sweep failed: {}", e);
                    }
                }
                _ = shutdown.changed() => {
                    info!("Outbox sweeper stopping");
                    return;
                }
            }
        }
    }

    /// One sweep pass
    pub async fn sweep(&self) -> Result<u64> {
        let stuck_before = Utc::now()
            - ChronoDuration::milliseconds(self.config.stuck_after_ms as i64);

        let rows: Vec<OutboxRow> = sqlx::query_as(
            r#"
            SELECT event_id, topic, partition_key, transaction_id,
                   payload, status, retry_count, created_at, sent_at
            FROM outbox
            WHERE (status = 'pending' AND created_at < $1)
               OR (status = 'failed' AND retry_count < $2)
            ORDER BY created_at
            LIMIT $3
            "#,
        )
        .bind(stuck_before)
        .bind(self.retry.max_retries as i32)
        .bind(self.config.sweep_batch)
        .fetch_all(&self.pool)
        .await?;

        let mut republished = 0u64;
        for row in rows {
            match self.republish(&row).await {
                Ok(()) => republished += 1,
                Err(e) => warn!(event_id = %row.event_id, "Sweeper republish failed: {}", e),
            }
        }

        if republished > 0 {
            info!(republished, "Outbox sweep republished rows");
        }

        Ok(republished)
    }

    async fn republish(&self, row: &OutboxRow) -> Result<()> {
        let request = match row.request() {
            Ok(request) => request,
            Err(e) => {
                // An unreadable payload can never publish; escalate it now
                self.escalate(row, &format!("unreadable outbox payload: {}", e))
                    .await?;
                return Ok(());
            }
        };

        let partition = row
            .topic
            .rsplit('.')
            .next()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);

        match self.publisher.publish(row.event_id, partition, &request).await {
            Ok(_) => {
                sqlx::query(
                    r#"
                    UPDATE outbox SET status = 'sent', sent_at = $1 WHERE event_id = $2
                    "#,
                )
                .bind(Utc::now())
                .bind(row.event_id)
                .execute(&self.pool)
                .await?;

                OUTBOX_SWEEP_TOTAL
                    .with_label_values(&["republished"])
                    .inc();
                Ok(())
            }
            Err(e) => {
                let attempts = row.retry_count + 1;
                if attempts >= self.retry.max_retries as i32 {
                    self.escalate(row, &e.to_string()).await?;
                } else {
                    sqlx::query(
                        r#"
                        UPDATE outbox SET status = 'failed', retry_count = $1 WHERE event_id = $2
                        "#,
                    )
                    .bind(attempts)
                    .bind(row.event_id)
                    .execute(&self.pool)
                    .await?;

                    OUTBOX_SWEEP_TOTAL.with_label_values(&["retried"]).inc();
                }
                Ok(())
            }
        }
    }

    /// Bounded-retry exhaustion: route to DLQ and park the row at the
    /// retry cap so the sweep predicate never selects it again.
    async fn escalate(&self, row: &OutboxRow, reason: &str) -> Result<()> {
        let payload = serde_json::to_vec(&row.payload)?;

        self.dlq
            .route(DeadLetter::retry_exhausted(
                row.topic.clone(),
                0, // never reached the log
                Some(row.partition_key.clone()),
                &payload,
                row.retry_count as u32,
                "publish_failed",
                reason,
            ))
            .await?;

        sqlx::query(
            r#"
            UPDATE outbox SET status = 'failed', retry_count = $1 WHERE event_id = $2
            "#,
        )
        .bind(self.retry.max_retries as i32)
        .bind(row.event_id)
        .execute(&self.pool)
        .await?;

        OUTBOX_SWEEP_TOTAL.with_label_values(&["escalated"]).inc();
        warn!(event_id = %row.event_id, "Outbox row escalated to DLQ: {}", reason);
        Ok(())
    }
}
