//! Prometheus metrics for the balance engine

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram, register_histogram_vec, CounterVec, Histogram,
    HistogramVec,
};

lazy_static! {
    /// Mutations accepted into the outbox, by outcome
    pub static ref OUTBOX_SUBMIT_TOTAL: CounterVec = register_counter_vec!(
        "balance_outbox_submit_total",
        "Mutations submitted to the outbox",
        &["outcome"]
    )
    .unwrap();

    /// Sweeper activity, by action taken
    pub static ref OUTBOX_SWEEP_TOTAL: CounterVec = register_counter_vec!(
        "balance_outbox_sweep_total",
        "Outbox sweeper actions",
        &["action"]
    )
    .unwrap();

    /// Records processed by partition workers, by result
    pub static ref RECORDS_PROCESSED_TOTAL: CounterVec = register_counter_vec!(
        "balance_records_processed_total",
        "Change records processed",
        &["result"]
    )
    .unwrap();

    /// Batch commit transaction duration (target p95 < 50ms)
    pub static ref BATCH_COMMIT_DURATION: Histogram = register_histogram!(
        "balance_batch_commit_duration_seconds",
        "Batch commit transaction duration in seconds",
        vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .unwrap();

    /// Batch commits, by outcome
    pub static ref BATCH_COMMIT_TOTAL: CounterVec = register_counter_vec!(
        "balance_batch_commit_total",
        "Batch commit outcomes",
        &["status"]
    )
    .unwrap();

    /// Lease lifecycle transitions
    pub static ref LEASE_TRANSITIONS_TOTAL: CounterVec = register_counter_vec!(
        "balance_lease_transitions_total",
        "Lease transitions",
        &["transition"]
    )
    .unwrap();

    /// Snapshot flushes to the external cache, by status
    pub static ref SNAPSHOT_FLUSH_TOTAL: CounterVec = register_counter_vec!(
        "balance_snapshot_flush_total",
        "Snapshot cache flushes",
        &["status"]
    )
    .unwrap();

    /// Keys written per snapshot flush
    pub static ref SNAPSHOT_FLUSH_SIZE: HistogramVec = register_histogram_vec!(
        "balance_snapshot_flush_size",
        "Keys per snapshot flush",
        &["shard"],
        vec![1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0]
    )
    .unwrap();
}
