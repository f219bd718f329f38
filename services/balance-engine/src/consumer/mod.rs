//! Partition-serialized batch consumer
//!
//! One logical worker per partition: poll the log, aggregate into batches,
//! deduplicate by transaction id, compute against the working set, commit
//! the whole batch under the leader fence.

pub mod batch;
pub mod worker;

pub use batch::{plan_batch, BatchPlan};
pub use worker::{PartitionWorker, WorkerState};
