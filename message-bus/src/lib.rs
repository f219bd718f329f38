//! Message bus for the balance-changes log
//!
//! NATS JetStream transport with:
//! - Stable hash partitioning by account key (one subject per partition)
//! - Durable, acknowledged publication with bounded retry
//! - Offset-addressed batch reads for partition consumers
//! - Dead-letter routing with failure metadata
//! - Observability via Prometheus metrics

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod client;
pub mod dlq;
pub mod error;
pub mod message;
pub mod metrics;
pub mod partitioning;
pub mod publisher;
pub mod reader;
pub mod types;

pub use client::{NatsClient, NatsConfig};
pub use dlq::{DeadLetter, DlqPublisher};
pub use error::{Error, Result};
pub use message::ChangeRecord;
pub use publisher::{Publisher, PublisherConfig};
pub use reader::{BatchReader, BatchReaderConfig, RawRecord};
pub use types::{changes_subject, changes_wildcard, PartitionKey, CHANGES_STREAM, DLQ_STREAM};
