//! Partition worker state machine
//!
//! {follower -> candidate -> leader -> draining -> stopped}. A worker
//! becomes leader by winning the lease, consumes from the committed offset
//! + 1, and falls back to follower on lease loss (renew failure or
//! commit-time fence). Transient batch errors also demote to follower: the
//! offset never advanced, so re-acquisition resumes exactly where the last
//! commit left off.

use balance_core::WorkingSet;
use message_bus::{changes_subject, BatchReader, DeadLetter, DlqPublisher, NatsClient, RawRecord};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::{BatchConfig, LeaseConfig, RetryConfig};
use crate::consumer::batch::plan_batch;
use crate::errors::{EngineError, Result};
use crate::leader::spawn_renewer;
use crate::metrics::{LEASE_TRANSITIONS_TOTAL, RECORDS_PROCESSED_TOTAL};
use crate::stores::{BalanceStore, BatchCommit, LeaseGuard, OffsetStore, SnapshotSink};

/// Worker lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Not leading; periodically attempts the lease
    Follower,
    /// Lease attempt in flight
    Candidate,
    /// Holds the lease; consuming and committing
    Leader,
    /// Graceful shutdown: finish up and release
    Draining,
    /// Terminal
    Stopped,
}

/// How one leadership stint ended
enum LeadExit {
    LeaseLost,
    Shutdown,
    Transient,
}

/// One logical worker for one partition
pub struct PartitionWorker {
    partition: u32,
    group: String,
    topic: String,
    nats: Arc<NatsClient>,
    store: Arc<dyn BalanceStore>,
    offsets: Arc<dyn OffsetStore>,
    lease: Arc<dyn LeaseGuard>,
    snapshots: Arc<dyn SnapshotSink>,
    dlq: Arc<DlqPublisher>,
    batch_config: BatchConfig,
    lease_config: LeaseConfig,
    retry: RetryConfig,
    working_set: WorkingSet,
    shutdown: watch::Receiver<bool>,
    state: WorkerState,
}

#[allow(clippy::too_many_arguments)]
impl PartitionWorker {
    pub fn new(
        partition: u32,
        group: String,
        nats: Arc<NatsClient>,
        store: Arc<dyn BalanceStore>,
        offsets: Arc<dyn OffsetStore>,
        lease: Arc<dyn LeaseGuard>,
        snapshots: Arc<dyn SnapshotSink>,
        dlq: Arc<DlqPublisher>,
        batch_config: BatchConfig,
        lease_config: LeaseConfig,
        retry: RetryConfig,
        working_set_capacity: usize,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let topic = changes_subject(partition);
        Self {
            partition,
            group,
            topic,
            nats,
            store,
            offsets,
            lease,
            snapshots,
            dlq,
            batch_config,
            lease_config,
            retry,
            working_set: WorkingSet::new(working_set_capacity),
            shutdown,
            state: WorkerState::Follower,
        }
    }

    /// Drive the state machine to completion
    pub async fn run(mut self) {
        info!(partition = self.partition, "Partition worker started");

        loop {
            match self.state {
                WorkerState::Follower => {
                    if *self.shutdown.borrow() {
                        self.state = WorkerState::Draining;
                        continue;
                    }
                    self.state = WorkerState::Candidate;
                }
                WorkerState::Candidate => {
                    match self.lease.acquire(self.partition).await {
                        Ok(true) => {
                            self.state = WorkerState::Leader;
                        }
                        Ok(false) => {
                            self.state = WorkerState::Follower;
                            self.idle_wait().await;
                        }
                        Err(e) => {
                            warn!(
                                partition = self.partition,
                                "Lease acquisition errored: {}", e
                            );
                            self.state = WorkerState::Follower;
                            self.idle_wait().await;
                        }
                    }
                }
                WorkerState::Leader => {
                    let exit = self.lead().await;
                    // Any exit invalidates the working set: the next
                    // leadership stint repopulates from the store
                    self.working_set.clear();
                    self.state = match exit {
                        LeadExit::Shutdown => WorkerState::Draining,
                        LeadExit::LeaseLost => {
                            LEASE_TRANSITIONS_TOTAL
                                .with_label_values(&["demoted"])
                                .inc();
                            WorkerState::Follower
                        }
                        LeadExit::Transient => WorkerState::Follower,
                    };
                }
                WorkerState::Draining => {
                    if let Err(e) = self.lease.release(self.partition).await {
                        warn!(partition = self.partition, "Lease release failed: {}", e);
                    }
                    self.state = WorkerState::Stopped;
                }
                WorkerState::Stopped => break,
            }
        }

        info!(partition = self.partition, "Partition worker stopped");
    }

    /// One leadership stint: recover the offset, consume, commit.
    async fn lead(&mut self) -> LeadExit {
        let committed = match self
            .offsets
            .committed_offset(&self.group, &self.topic, self.partition)
            .await
        {
            Ok(offset) => offset,
            Err(e) => {
                warn!(partition = self.partition, "Offset recovery failed: {}", e);
                return LeadExit::Transient;
            }
        };

        let mut reader = match BatchReader::for_partition(
            &self.nats,
            self.partition,
            committed,
            self.batch_config.reader_config(),
        )
        .await
        {
            Ok(reader) => reader,
            Err(e) => {
                warn!(partition = self.partition, "Reader creation failed: {}", e);
                return LeadExit::Transient;
            }
        };

        info!(
            partition = self.partition,
            resume_offset = committed + 1,
            "Leading partition"
        );

        let (mut lost_rx, renew_handle) =
            spawn_renewer(self.lease.clone(), self.partition, self.lease_config.clone());

        let deadline = self.batch_config.deadline();
        // Cloned receiver: the select below must not hold a borrow of self
        // while the batch handler mutates it
        let mut shutdown = self.shutdown.clone();

        let exit = loop {
            tokio::select! {
                biased;

                _ = shutdown.changed() => break LeadExit::Shutdown,

                // Lease loss is a hard cancellation: no further batch may
                // start, and the in-flight one (if any) was already fenced
                _ = lost_rx.changed() => break LeadExit::LeaseLost,

                batch = reader.next_batch() => {
                    let records = match batch {
                        Ok(records) => records,
                        Err(e) => {
                            warn!(partition = self.partition, "Batch read failed: {}", e);
                            break LeadExit::Transient;
                        }
                    };

                    // Long-poll expiry with nothing buffered: no records
                    // were consumed, nothing to flush
                    if records.is_empty() {
                        continue;
                    }

                    match tokio::time::timeout(deadline, self.process_batch(records)).await {
                        Ok(Ok(())) => {}
                        Ok(Err(EngineError::LeaseLost(_))) => break LeadExit::LeaseLost,
                        Ok(Err(e)) => {
                            warn!(
                                partition = self.partition,
                                "Batch processing failed, resuming from committed offset: {}",
                                e
                            );
                            break LeadExit::Transient;
                        }
                        Err(_) => {
                            error!(
                                partition = self.partition,
                                deadline_ms = self.batch_config.deadline_ms,
                                "Batch deadline exceeded, rolling back"
                            );
                            break LeadExit::Transient;
                        }
                    }
                }
            }
        };

        renew_handle.abort();
        exit
    }

    /// Process one non-empty batch end to end.
    ///
    /// The offset advances to the batch's highest consumed offset whether
    /// records applied, failed terminally, were duplicates, or went to the
    /// DLQ; it does not advance on transient errors (this function returns
    /// Err and nothing was committed).
    async fn process_batch(&mut self, raw: Vec<RawRecord>) -> Result<()> {
        let max_offset = raw.iter().map(|r| r.offset).max().unwrap_or(0);

        // Parse, routing malformed records to the DLQ. A DLQ publish
        // failure fails the batch: advancing past an unrouted record
        // would lose it.
        let mut parsed = Vec::with_capacity(raw.len());
        for record in raw {
            match record.decode() {
                Ok(change) => parsed.push(change),
                Err(e) => {
                    RECORDS_PROCESSED_TOTAL
                        .with_label_values(&["parse_error"])
                        .inc();
                    self.dlq
                        .route(DeadLetter::parse_failure(
                            record.subject.clone(),
                            record.offset,
                            &record.payload,
                            e.to_string(),
                        ))
                        .await?;
                }
            }
        }

        let plan = plan_batch(
            parsed,
            &mut self.working_set,
            self.store.as_ref(),
            &self.retry,
        )
        .await?;

        // Retry-exhausted records: wrap and route before the offset moves
        for (record, err) in &plan.dead_letters {
            let payload = serde_json::to_vec(&record.request)?;
            self.dlq
                .route(DeadLetter::retry_exhausted(
                    self.topic.clone(),
                    record.offset,
                    Some(record.request.partition_key.clone()),
                    &payload,
                    self.retry.max_retries,
                    err.kind(),
                    err.to_string(),
                ))
                .await?;
        }

        // Commit, retrying transients. The fence inside the transaction is
        // authoritative: LeaseLost propagates immediately.
        let mut attempt = 0u32;
        loop {
            let commit = BatchCommit {
                partition: self.partition,
                holder_id: self.lease.holder_id(),
                group: &self.group,
                topic: &self.topic,
                offset: max_offset,
                balances: &plan.balances,
                entries: &plan.entries,
            };

            match self.store.commit_batch(commit).await {
                Ok(()) => break,
                Err(EngineError::LeaseLost(p)) => return Err(EngineError::LeaseLost(p)),
                Err(e) => {
                    attempt += 1;
                    if attempt > self.retry.max_retries {
                        return Err(e);
                    }
                    warn!(
                        partition = self.partition,
                        attempt, "Batch commit failed, retrying: {}", e
                    );
                    tokio::time::sleep(self.retry.delay_for(attempt - 1)).await;
                }
            }
        }

        // Post-commit: write through the working set and fan out snapshots
        for balance in &plan.balances {
            self.working_set.put(balance.clone());
        }
        for snapshot in plan.snapshots {
            self.snapshots.offer(snapshot);
        }

        Ok(())
    }

    /// Follower backoff between lease attempts, interruptible by shutdown
    async fn idle_wait(&mut self) {
        let wait = Duration::from_millis(self.lease_config.renew_ms);
        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = self.shutdown.changed() => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_machine_labels() {
        assert_ne!(WorkerState::Follower, WorkerState::Leader);
        assert_eq!(WorkerState::Stopped, WorkerState::Stopped);
    }
}
