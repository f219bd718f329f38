//! Leader election over the relational store
//!
//! One row per partition in `leader_lease`. Acquisition is an upsert whose
//! conflict arm takes ownership only from an expired holder; renewal is a
//! conditional update that returns zero rows once the lease has rolled to
//! someone else. The commit-time fence check lives in the batch commit
//! (`PgStore::commit_batch`) and is unconditional: any worker that has
//! ever been leader commits through it.

use chrono::{Duration as ChronoDuration, Utc};
use sqlx::PgPool;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::LeaseConfig;
use crate::errors::Result;
use crate::metrics::LEASE_TRANSITIONS_TOTAL;
use crate::stores::LeaseGuard;

/// Postgres-backed lease elector for one consumer identity
pub struct LeaseElector {
    pool: PgPool,
    holder_id: String,
    config: LeaseConfig,
}

impl LeaseElector {
    pub fn new(pool: PgPool, holder_id: String, config: LeaseConfig) -> Self {
        Self {
            pool,
            holder_id,
            config,
        }
    }

    fn ttl(&self) -> ChronoDuration {
        ChronoDuration::milliseconds(self.config.ttl_ms as i64)
    }
}

#[async_trait::async_trait]
impl LeaseGuard for LeaseElector {
    /// Upsert that only steals from an expired holder. The RETURNING row
    /// tells us who owns the lease after the statement; ownership is ours
    /// exactly when that is us.
    async fn acquire(&self, partition: u32) -> Result<bool> {
        let now = Utc::now();
        let expires_at = now + self.ttl();

        let row: Option<(String,)> = sqlx::query_as(
            r#"
            INSERT INTO leader_lease (partition_id, holder_id, acquired_at, expires_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (partition_id) DO UPDATE SET
                holder_id = EXCLUDED.holder_id,
                acquired_at = EXCLUDED.acquired_at,
                expires_at = EXCLUDED.expires_at
            WHERE leader_lease.expires_at < $3
               OR leader_lease.holder_id = EXCLUDED.holder_id
            RETURNING holder_id
            "#,
        )
        .bind(partition as i32)
        .bind(&self.holder_id)
        .bind(now)
        .bind(expires_at)
        .fetch_optional(&self.pool)
        .await?;

        let granted = row.map(|(holder,)| holder == self.holder_id).unwrap_or(false);

        if granted {
            info!(partition, holder = %self.holder_id, "Lease acquired");
            LEASE_TRANSITIONS_TOTAL
                .with_label_values(&["acquired"])
                .inc();
        }

        Ok(granted)
    }

    /// Conditional extension. Zero rows updated means the lease expired
    /// under us and may already belong to another worker.
    async fn renew(&self, partition: u32) -> Result<bool> {
        let now = Utc::now();
        let expires_at = now + self.ttl();

        let result = sqlx::query(
            r#"
            UPDATE leader_lease
            SET expires_at = $1
            WHERE partition_id = $2 AND holder_id = $3 AND expires_at > $4
            "#,
        )
        .bind(expires_at)
        .bind(partition as i32)
        .bind(&self.holder_id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let renewed = result.rows_affected() > 0;
        if !renewed {
            warn!(partition, holder = %self.holder_id, "Lease renewal failed; lease lost");
            LEASE_TRANSITIONS_TOTAL.with_label_values(&["lost"]).inc();
        }

        Ok(renewed)
    }

    /// Delete only while still held; a stolen lease is left alone
    async fn release(&self, partition: u32) -> Result<()> {
        sqlx::query(
            r#"
            DELETE FROM leader_lease
            WHERE partition_id = $1 AND holder_id = $2
            "#,
        )
        .bind(partition as i32)
        .bind(&self.holder_id)
        .execute(&self.pool)
        .await?;

        info!(partition, holder = %self.holder_id, "Lease released");
        LEASE_TRANSITIONS_TOTAL
            .with_label_values(&["released"])
            .inc();
        Ok(())
    }

    fn holder_id(&self) -> &str {
        &self.holder_id
    }
}

/// Background renewal for one held partition.
///
/// Renews at `renew_ms` (well under TTL). The first failed renewal flips
/// the watch channel; the worker treats that as a hard cancellation of the
/// in-flight batch. The task exits once it has signalled loss or once the
/// receiver side is dropped (worker left the Leader state).
pub fn spawn_renewer(
    guard: std::sync::Arc<dyn LeaseGuard>,
    partition: u32,
    config: LeaseConfig,
) -> (watch::Receiver<bool>, tokio::task::JoinHandle<()>) {
    let (lost_tx, lost_rx) = watch::channel(false);

    let handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(config.renew_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // First tick fires immediately; skip it, the lease was just acquired
        interval.tick().await;

        loop {
            interval.tick().await;

            if lost_tx.is_closed() {
                return;
            }

            match guard.renew(partition).await {
                Ok(true) => {}
                Ok(false) => {
                    let _ = lost_tx.send(true);
                    return;
                }
                Err(e) => {
                    // A renew we cannot confirm is a renew that failed:
                    // the commit-time fence stays authoritative either way
                    warn!(partition, "Lease renew errored: {}", e);
                    let _ = lost_tx.send(true);
                    return;
                }
            }
        }
    });

    (lost_rx, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LeaseConfig;

    #[tokio::test]
    async fn test_ttl_conversion() {
        let elector = LeaseElector {
            pool: PgPool::connect_lazy("postgresql://localhost/test").unwrap(),
            holder_id: "worker-a".to_string(),
            config: LeaseConfig {
                ttl_ms: 5000,
                renew_ms: 2000,
            },
        };
        assert_eq!(elector.ttl(), ChronoDuration::milliseconds(5000));
        assert_eq!(elector.holder_id(), "worker-a");
    }
}
