//! Runtime assembly and ordered teardown
//!
//! The root object owns every handle (DB pool, NATS client, Redis
//! connection, worker tasks) and injects them into the components; nothing
//! reaches for process-wide state. Teardown is one ordered routine:
//! workers drain and release leases, the sweeper stops, snapshot shards
//! flush, the ingress server stops, then the transports close.

use message_bus::{DlqPublisher, NatsClient, NatsConfig, Publisher, PublisherConfig};
use redis::aio::ConnectionManager;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::consumer::PartitionWorker;
use crate::database::{create_pool, DbPool, PgStore};
use crate::errors::Result;
use crate::ingress::{self, AppState};
use crate::leader::LeaseElector;
use crate::outbox::{OutboxSweeper, OutboxWriter};
use crate::snapshot::SnapshotUpdater;
use crate::stores::{BalanceStore, LeaseGuard, OffsetStore, SnapshotSink};

/// Balances cached per partition worker between commits
const WORKING_SET_CAPACITY: usize = 10_000;

pub struct Runtime {
    config: Config,
    pool: DbPool,
    nats: Arc<NatsClient>,
    shutdown_tx: watch::Sender<bool>,
    worker_handles: Vec<JoinHandle<()>>,
    sweeper_handle: JoinHandle<()>,
    snapshot_handles: Vec<JoinHandle<()>>,
    server: actix_web::dev::Server,
}

impl Runtime {
    /// Construct every component and start the background tasks.
    /// Failures here are startup failures (exit code 1).
    pub async fn build(config: Config) -> Result<Self> {
        let holder_id = format!(
            "{}-{}",
            hostname(),
            Uuid::new_v4().simple()
        );
        info!(holder_id = %holder_id, "Building balance-engine runtime");

        // Transports
        let pool = create_pool(&config.database).await?;

        let nats = Arc::new(NatsClient::new(NatsConfig {
            urls: vec![config.nats.url.clone()],
            name: format!("balance-engine-{}", holder_id),
            ..NatsConfig::default()
        }));
        nats.connect().await?;
        nats.ensure_changes_stream().await?;
        nats.ensure_dlq_stream().await?;

        let redis_client = redis::Client::open(config.redis.url.as_str())?;
        let redis_conn = ConnectionManager::new(redis_client).await?;

        // Core components, construction-injected
        let publisher = Arc::new(Publisher::new(nats.clone(), PublisherConfig::default()));
        let dlq = Arc::new(DlqPublisher::with_subject(
            nats.clone(),
            config.retry.dlq_topic.clone(),
        ));
        let store = Arc::new(PgStore::new(pool.clone()));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let outbox = Arc::new(OutboxWriter::new(
            pool.clone(),
            publisher.clone(),
            config.nats.partitions,
        ));

        let sweeper = OutboxSweeper::new(
            pool.clone(),
            publisher.clone(),
            dlq.clone(),
            config.outbox.clone(),
            config.retry.clone(),
            shutdown_rx.clone(),
        );
        let sweeper_handle = tokio::spawn(sweeper.run());

        let (snapshots, snapshot_handles) = SnapshotUpdater::spawn(
            redis_conn,
            config.snapshot.clone(),
            shutdown_rx.clone(),
        );

        let lease: Arc<dyn LeaseGuard> = Arc::new(LeaseElector::new(
            pool.clone(),
            holder_id,
            config.lease.clone(),
        ));

        // One worker per partition; the lease decides who actually leads
        let mut worker_handles = Vec::with_capacity(config.nats.partitions as usize);
        for partition in 0..config.nats.partitions {
            let worker = PartitionWorker::new(
                partition,
                config.nats.consumer_group.clone(),
                nats.clone(),
                store.clone() as Arc<dyn BalanceStore>,
                store.clone() as Arc<dyn OffsetStore>,
                lease.clone(),
                snapshots.clone() as Arc<dyn SnapshotSink>,
                dlq.clone(),
                config.batch.clone(),
                config.lease.clone(),
                config.retry.clone(),
                WORKING_SET_CAPACITY,
                shutdown_rx.clone(),
            );
            worker_handles.push(tokio::spawn(worker.run()));
        }

        // Ingress last: do not accept requests before the pipeline exists
        let state = Arc::new(AppState {
            outbox,
            store: store.clone(),
        });
        let server = ingress::run_server(&config.server, state)
            .map_err(|e| crate::errors::EngineError::Configuration(e.to_string()))?;

        info!(
            partitions = config.nats.partitions,
            http_port = config.server.http_port,
            "Balance engine started"
        );

        Ok(Self {
            config,
            pool,
            nats,
            shutdown_tx,
            worker_handles,
            sweeper_handle,
            snapshot_handles,
            server,
        })
    }

    /// Run until interrupted or until a critical resource is lost.
    /// Returns Ok on graceful shutdown; Err means exit code 2.
    pub async fn run(self) -> Result<()> {
        let server_handle = self.server.handle();
        let mut server_task = tokio::spawn(self.server);
        let mut fatal = false;

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
            }
            result = &mut server_task => {
                error!("Ingress server exited unexpectedly: {:?}", result);
                fatal = true;
            }
        }

        // Ordered teardown
        let _ = self.shutdown_tx.send(true);

        // 1. Workers drain: finish/roll back in-flight batches, release leases
        for handle in self.worker_handles {
            if let Err(e) = handle.await {
                warn!("Worker task join failed: {}", e);
            }
        }

        // 2. Sweeper stops
        if let Err(e) = self.sweeper_handle.await {
            warn!("Sweeper task join failed: {}", e);
        }

        // 3. Snapshot shards flush and stop
        for handle in self.snapshot_handles {
            if let Err(e) = handle.await {
                warn!("Snapshot task join failed: {}", e);
            }
        }

        // 4. Ingress stops accepting
        server_handle.stop(true).await;
        if !fatal {
            let _ = tokio::time::timeout(Duration::from_secs(5), &mut server_task).await;
        }

        // 5. Transports close
        if let Err(e) = self.nats.disconnect().await {
            warn!("NATS disconnect failed: {}", e);
        }
        self.pool.close().await;

        info!("Balance engine stopped");

        if fatal {
            Err(crate::errors::EngineError::CriticalResourceLost(
                "ingress server exited".to_string(),
            ))
        } else {
            Ok(())
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "balance-engine".to_string())
}
