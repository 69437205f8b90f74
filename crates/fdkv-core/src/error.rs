//! Error types for fdkv-core

use thiserror::Error;

/// Errors that can occur while operating the engine.
#[derive(Error, Debug)]
pub enum CoreError {
    /// An operation referenced a table that is not in the catalog.
    #[error("invalid table descriptor: {0}")]
    InvalidDescriptor(String),

    /// An insert would violate a declared functional dependency.
    #[error("dependency broken: {determinants}=>{dependent} for table {table}")]
    DependencyBroken {
        /// Underlying table name.
        table: String,
        /// Determinant field names, joined with "&".
        determinants: String,
        /// Dependent field name.
        dependent: String,
    },

    /// The optimistic retry budget for a TRANSACTIONAL insert was exhausted.
    #[error("transaction interrupted after {attempts} attempts")]
    TransactionInterrupted {
        /// Number of attempts made before giving up.
        attempts: u32,
    },

    /// A network or protocol error occurred talking to the backend.
    #[error("backend connection error: {0}")]
    BackendConnection(String),

    /// A value could not be encoded under the configured key policy.
    #[error("key-policy serialization failed: {0}")]
    Serialization(String),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, CoreError>;

impl From<redis::RedisError> for CoreError {
    fn from(err: redis::RedisError) -> Self {
        CoreError::BackendConnection(err.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Serialization(err.to_string())
    }
}
