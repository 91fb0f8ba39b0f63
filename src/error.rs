//! Error types for the SQL isolation layer
//!
//! Errors are grouped into a small set of kinds so the retry executor can tell
//! transient infrastructure failures apart from integrity violations.

use thiserror::Error;
use uuid::Uuid;

/// Result type alias for storage operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Coarse classification of a [`StoreError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Connection drops, serialization conflicts, pool exhaustion
    Transient,
    /// Constraint violations and missing required parents
    Integrity,
    /// Failed to install or remove an isolation policy
    Policy,
    /// Row does not exist (only raised when the caller needs prior state)
    NotFound,
    /// Invalid configuration or usage
    Config,
    /// Anything else
    Other,
}

/// Storage error types
#[derive(Debug, Error)]
pub enum StoreError {
    /// Error reported by the database driver
    #[cfg(feature = "native")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Transient failure raised outside the driver
    #[error("Transient failure: {0}")]
    Transient(String),

    /// Integrity violation, never retried
    #[error("Integrity violation: {0}")]
    Integrity(String),

    /// Row vanished while the caller needed it
    #[error("Not found: {0}")]
    NotFound(String),

    /// A nested isolation context tried to rebind the entity
    #[error("Isolation context already bound to entity {bound:?}, refusing to rebind to {requested:?}")]
    IsolationConflict {
        /// Entity bound by the enclosing context
        bound: Option<Uuid>,
        /// Entity requested by the nested call
        requested: Option<Uuid>,
    },

    /// Embedding width is not one of the supported dimensions
    #[error("Unsupported embedding dimension: {0}")]
    InvalidDimension(usize),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Policy installation failure on one table
    #[error("Policy error on table {table}: {reason}")]
    Policy {
        /// Table name
        table: String,
        /// Failure reason
        reason: String,
    },

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Migration failure
    #[error("Migration error: {0}")]
    Migration(#[from] anyhow::Error),

    /// Failure annotated with the operation name and attempt count
    #[error("{operation} failed after {attempts} attempt(s): {source}")]
    Operation {
        /// Operation name
        operation: String,
        /// Number of attempts made
        attempts: u32,
        /// Underlying error
        #[source]
        source: Box<StoreError>,
    },
}

impl StoreError {
    /// Classify the error. Annotated errors report the kind of their source.
    pub fn kind(&self) -> ErrorKind {
        match self {
            #[cfg(feature = "native")]
            StoreError::Database(e) => classify_sqlx(e),
            StoreError::Transient(_) => ErrorKind::Transient,
            StoreError::Integrity(_) => ErrorKind::Integrity,
            StoreError::NotFound(_) => ErrorKind::NotFound,
            StoreError::IsolationConflict { .. }
            | StoreError::InvalidDimension(_)
            | StoreError::Config(_) => ErrorKind::Config,
            StoreError::Policy { .. } => ErrorKind::Policy,
            StoreError::Serialization(_) | StoreError::Migration(_) => ErrorKind::Other,
            StoreError::Operation { source, .. } => source.kind(),
        }
    }

    /// Check if the error is worth retrying
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    /// Innermost error, skipping operation annotations
    pub fn root(&self) -> &StoreError {
        match self {
            StoreError::Operation { source, .. } => source.root(),
            other => other,
        }
    }

    /// Annotate with operation name and attempt count
    pub fn with_operation(self, operation: impl Into<String>, attempts: u32) -> Self {
        StoreError::Operation {
            operation: operation.into(),
            attempts,
            source: Box::new(self),
        }
    }

    /// Shorthand for an integrity violation
    pub fn integrity(message: impl Into<String>) -> Self {
        StoreError::Integrity(message.into())
    }

    /// Shorthand for a not-found condition
    pub fn not_found(message: impl Into<String>) -> Self {
        StoreError::NotFound(message.into())
    }
}

#[cfg(feature = "native")]
fn classify_sqlx(error: &sqlx::Error) -> ErrorKind {
    match error {
        sqlx::Error::Io(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed
        | sqlx::Error::Protocol(_) => ErrorKind::Transient,
        sqlx::Error::RowNotFound => ErrorKind::NotFound,
        sqlx::Error::Database(db) => db
            .code()
            .map(|code| classify_sqlstate(&code))
            .unwrap_or(ErrorKind::Other),
        _ => ErrorKind::Other,
    }
}

/// Map a PostgreSQL SQLSTATE code to an error kind.
pub fn classify_sqlstate(code: &str) -> ErrorKind {
    match code {
        "40001" | "40P01" | "57P01" | "57P02" | "57P03" | "53300" => ErrorKind::Transient,
        c if c.starts_with("08") => ErrorKind::Transient,
        c if c.starts_with("23") => ErrorKind::Integrity,
        "42501" => ErrorKind::Policy,
        _ => ErrorKind::Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlstate_classification() {
        assert_eq!(classify_sqlstate("40001"), ErrorKind::Transient);
        assert_eq!(classify_sqlstate("40P01"), ErrorKind::Transient);
        assert_eq!(classify_sqlstate("08006"), ErrorKind::Transient);
        assert_eq!(classify_sqlstate("23505"), ErrorKind::Integrity);
        assert_eq!(classify_sqlstate("23503"), ErrorKind::Integrity);
        assert_eq!(classify_sqlstate("42P01"), ErrorKind::Other);
    }

    #[test]
    fn test_operation_keeps_source_kind() {
        let err = StoreError::Transient("connection reset".to_string())
            .with_operation("memories.create", 3);
        assert_eq!(err.kind(), ErrorKind::Transient);
        assert!(err.is_retryable());
        assert!(matches!(err.root(), StoreError::Transient(_)));
        assert!(err.to_string().contains("memories.create failed after 3 attempt(s)"));

        let err = StoreError::integrity("task requires world_id").with_operation("tasks.create", 1);
        assert_eq!(err.kind(), ErrorKind::Integrity);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_conflict_is_not_retryable() {
        let err = StoreError::IsolationConflict {
            bound: Some(Uuid::nil()),
            requested: None,
        };
        assert_eq!(err.kind(), ErrorKind::Config);
        assert!(!err.is_retryable());
    }
}
