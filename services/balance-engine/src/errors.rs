use balance_core::CoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Message bus error: {0}")]
    Bus(#[from] message_bus::Error),

    #[error("Cache error: {0}")]
    Cache(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Lease lost for partition {0}")]
    LeaseLost(u32),

    #[error("Batch deadline exceeded after {0}ms")]
    DeadlineExceeded(u64),

    #[error("Critical resource lost: {0}")]
    CriticalResourceLost(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    /// Collapse infrastructure errors into the record-level kinds the
    /// pipeline propagates (everything non-core is Transient).
    pub fn into_core(self) -> CoreError {
        match self {
            EngineError::Core(e) => e,
            EngineError::LeaseLost(partition) => CoreError::LeaseLost(partition),
            other => CoreError::Transient(other.to_string()),
        }
    }

    /// True when a unique-constraint violation on the given constraint
    /// name caused this error.
    pub fn is_unique_violation(&self, constraint: &str) -> bool {
        match self {
            EngineError::Database(sqlx::Error::Database(db)) => {
                db.code().as_deref() == Some("23505")
                    && db.constraint().is_some_and(|c| c == constraint)
            }
            _ => false,
        }
    }
}
