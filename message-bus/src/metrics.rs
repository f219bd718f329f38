//! Prometheus metrics for the message bus

use lazy_static::lazy_static;
use prometheus::{register_counter_vec, register_histogram_vec, CounterVec, HistogramVec};

lazy_static! {
    /// Total records published, by subject and status
    pub static ref RECORD_PUBLISH_TOTAL: CounterVec = register_counter_vec!(
        "balance_bus_publish_total",
        "Total change records published",
        &["subject", "status"]
    )
    .unwrap();

    /// Publish duration
    pub static ref RECORD_PUBLISH_DURATION: HistogramVec = register_histogram_vec!(
        "balance_bus_publish_duration_seconds",
        "Change record publish duration in seconds",
        &["subject"]
    )
    .unwrap();

    /// Total records read by partition consumers
    pub static ref RECORD_READ_TOTAL: CounterVec = register_counter_vec!(
        "balance_bus_read_total",
        "Total change records read",
        &["partition", "status"]
    )
    .unwrap();

    /// Batch sizes delivered to consumers
    pub static ref BATCH_SIZE: HistogramVec = register_histogram_vec!(
        "balance_bus_batch_size",
        "Records per delivered batch",
        &["partition"],
        vec![1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 200.0, 400.0]
    )
    .unwrap();

    /// Records routed to the dead-letter topic
    pub static ref DLQ_ROUTED_TOTAL: CounterVec = register_counter_vec!(
        "balance_bus_dlq_total",
        "Records routed to the dead-letter topic",
        &["error_kind"]
    )
    .unwrap();
}
