//! Transactional outbox
//!
//! The database is the single source of truth for "the request exists":
//! the outbox row commits before any log publication, and lost publishes
//! are reconciled by the sweeper. Duplicated deliveries are absorbed
//! downstream by the ledger's transaction-id index.

pub mod sweeper;
pub mod writer;

pub use sweeper::OutboxSweeper;
pub use writer::OutboxWriter;
