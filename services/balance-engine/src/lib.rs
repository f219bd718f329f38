//! Account-balance engine
//!
//! The write pipeline: transactional outbox -> partitioned JetStream log ->
//! lease-fenced batch consumer -> single relational commit -> best-effort
//! snapshot fan-out. Postgres is the source of truth; the ledger's unique
//! transaction-id index is the idempotency substrate.

pub mod config;
pub mod consumer;
pub mod database;
pub mod errors;
pub mod ingress;
pub mod leader;
pub mod metrics;
pub mod models;
pub mod outbox;
pub mod runtime;
pub mod snapshot;
pub mod stores;

pub use config::Config;
pub use errors::{EngineError, Result};
pub use runtime::Runtime;
