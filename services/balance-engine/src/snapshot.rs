//! Snapshot updater
//!
//! Best-effort fan-out of freshly-committed balances to Redis under
//! last-writer-wins semantics. Work is sharded by account id so one worker
//! owns each key; each worker batches over a short interval and flushes
//! through a pipelined compare-and-set script keyed on the balance
//! version (monotonic per key). A lost update is acceptable: Postgres is
//! authoritative and readers fall back to it.

use redis::aio::ConnectionManager;
use redis::Script;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::SnapshotConfig;
use crate::metrics::{SNAPSHOT_FLUSH_SIZE, SNAPSHOT_FLUSH_TOTAL};
use crate::stores::{CommittedBalance, SnapshotSink};

/// Overwrite value and timestamp only when strictly newer
const LWW_SCRIPT: &str = r#"
local stored = redis.call('HGET', KEYS[1], 'ts')
if stored and tonumber(stored) >= tonumber(ARGV[1]) then
  return 0
end
redis.call('HSET', KEYS[1], 'value', ARGV[2], 'ts', ARGV[1])
return 1
"#;

/// Handle the consumers hold; fans snapshots out to the shard workers
pub struct SnapshotUpdater {
    senders: Vec<mpsc::UnboundedSender<CommittedBalance>>,
}

impl SnapshotUpdater {
    /// Spawn `worker_count` shard workers over one Redis connection
    /// manager. Returns the sink handle and the worker join handles.
    pub fn spawn(
        redis: ConnectionManager,
        config: SnapshotConfig,
        shutdown: watch::Receiver<bool>,
    ) -> (Arc<Self>, Vec<JoinHandle<()>>) {
        let mut senders = Vec::with_capacity(config.worker_count as usize);
        let mut handles = Vec::with_capacity(config.worker_count as usize);

        for shard in 0..config.worker_count {
            let (tx, rx) = mpsc::unbounded_channel();
            senders.push(tx);

            let worker = ShardWorker {
                shard,
                redis: redis.clone(),
                namespace: config.namespace.clone(),
                flush_interval: Duration::from_millis(config.flush_interval_ms),
                rx,
                shutdown: shutdown.clone(),
            };
            handles.push(tokio::spawn(worker.run()));
        }

        info!(
            workers = config.worker_count,
            flush_interval_ms = config.flush_interval_ms,
            "Snapshot updater started"
        );

        (Arc::new(Self { senders }), handles)
    }
}

impl SnapshotSink for SnapshotUpdater {
    /// Never blocks the commit path; a send to a stopped worker is a
    /// dropped snapshot, which the best-effort contract allows
    fn offer(&self, snapshot: CommittedBalance) {
        let shard = (snapshot.account_id.rem_euclid(self.senders.len() as i64)) as usize;
        let _ = self.senders[shard].send(snapshot);
    }
}

struct ShardWorker {
    shard: u32,
    redis: ConnectionManager,
    namespace: String,
    flush_interval: Duration,
    rx: mpsc::UnboundedReceiver<CommittedBalance>,
    shutdown: watch::Receiver<bool>,
}

impl ShardWorker {
    async fn run(self) {
        let ShardWorker {
            shard,
            mut redis,
            namespace,
            flush_interval,
            mut rx,
            mut shutdown,
        } = self;

        let script = Script::new(LWW_SCRIPT);
        // Load once so the pipelined EVALSHA calls never see NOSCRIPT
        if let Err(e) = script.prepare_invoke().load_async(&mut redis).await {
            warn!(shard, "Snapshot script load failed: {}", e);
        }

        let mut interval = tokio::time::interval(flush_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        // Coalesce by key between flushes, keeping the highest version
        let mut buffer: HashMap<(i64, String), CommittedBalance> = HashMap::new();

        loop {
            tokio::select! {
                maybe = rx.recv() => {
                    match maybe {
                        Some(snapshot) => coalesce(&mut buffer, snapshot),
                        None => {
                            flush(shard, &mut redis, &namespace, &script, &mut buffer).await;
                            return;
                        }
                    }
                }
                _ = interval.tick() => {
                    flush(shard, &mut redis, &namespace, &script, &mut buffer).await;
                }
                _ = shutdown.changed() => {
                    // Drain whatever is queued, flush once, exit
                    while let Ok(snapshot) = rx.try_recv() {
                        coalesce(&mut buffer, snapshot);
                    }
                    flush(shard, &mut redis, &namespace, &script, &mut buffer).await;
                    debug!(shard, "Snapshot shard worker stopped");
                    return;
                }
            }
        }
    }
}

fn coalesce(buffer: &mut HashMap<(i64, String), CommittedBalance>, snapshot: CommittedBalance) {
    let key = (snapshot.account_id, snapshot.currency.clone());
    match buffer.get(&key) {
        Some(existing) if existing.version >= snapshot.version => {}
        _ => {
            buffer.insert(key, snapshot);
        }
    }
}

/// Pipelined CAS writes; errors are logged and the batch dropped
async fn flush(
    shard: u32,
    redis: &mut ConnectionManager,
    namespace: &str,
    script: &Script,
    buffer: &mut HashMap<(i64, String), CommittedBalance>,
) {
    if buffer.is_empty() {
        return;
    }

    let size = buffer.len();
    let mut pipe = redis::pipe();

    for ((account_id, currency), snapshot) in buffer.iter() {
        let key = format!("{}:{}:{}", namespace, account_id, currency);
        let value = match serde_json::to_string(snapshot) {
            Ok(value) => value,
            Err(e) => {
                warn!(shard, "Snapshot serialization failed: {}", e);
                continue;
            }
        };

        pipe.invoke_script(&script.key(key).arg(snapshot.version).arg(value));
    }

    let result: redis::RedisResult<Vec<i64>> = pipe.query_async(redis).await;
    match result {
        Ok(results) => {
            let written = results.iter().filter(|&&r| r == 1).count();
            debug!(shard, keys = size, written, "Snapshot flush complete");
            SNAPSHOT_FLUSH_TOTAL.with_label_values(&["success"]).inc();
            SNAPSHOT_FLUSH_SIZE
                .with_label_values(&[&shard.to_string()])
                .observe(size as f64);
        }
        Err(e) => {
            // Best effort by contract: drop the batch, the store is
            // authoritative and a later commit re-offers the keys
            warn!(shard, "Snapshot flush failed: {}", e);
            SNAPSHOT_FLUSH_TOTAL.with_label_values(&["error"]).inc();
        }
    }

    buffer.clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn snapshot(account: i64, version: i64) -> CommittedBalance {
        CommittedBalance {
            account_id: account,
            currency: "USDT".to_string(),
            available: dec!(100),
            frozen: dec!(0),
            version,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_coalesce_keeps_highest_version() {
        let mut buffer = HashMap::new();
        coalesce(&mut buffer, snapshot(1, 5));
        coalesce(&mut buffer, snapshot(1, 3));
        coalesce(&mut buffer, snapshot(1, 7));

        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer[&(1, "USDT".to_string())].version, 7);
    }

    #[test]
    fn test_sharding_is_stable() {
        let (tx_a, _rx_a) = mpsc::unbounded_channel();
        let (tx_b, _rx_b) = mpsc::unbounded_channel();
        let updater = SnapshotUpdater {
            senders: vec![tx_a, tx_b],
        };

        // Same account always routes to the same shard; this only checks
        // the modulo stays in range for negative ids too
        updater.offer(snapshot(-3, 1));
        updater.offer(snapshot(7, 1));
    }
}
