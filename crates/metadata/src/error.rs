//! Metadata store error types.

use thiserror::Error;

/// Metadata store operation errors.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("constraint violation: {0}")]
    Constraint(String),
}

impl MetadataError {
    /// Whether the error came from a lock or busy condition that a later retry may clear.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Database(sqlx::Error::Database(db)) => {
                let msg = db.message();
                msg.contains("database is locked") || msg.contains("database is busy")
            }
            Self::Database(sqlx::Error::PoolTimedOut) => true,
            _ => false,
        }
    }
}

/// Map a unique violation to `AlreadyExists` and a dangling foreign key
/// (e.g. a parent or storage id that does not exist) to `Constraint`.
pub(crate) fn map_constraint_violation(err: sqlx::Error, what: impl FnOnce() -> String) -> MetadataError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            MetadataError::AlreadyExists(what())
        }
        sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
            MetadataError::Constraint(format!("{}: {}", what(), db.message()))
        }
        _ => MetadataError::Database(err),
    }
}

/// Result type for metadata operations.
pub type MetadataResult<T> = std::result::Result<T, MetadataError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = MetadataError::NotFound("namespace acme".to_string());
        assert_eq!(err.to_string(), "not found: namespace acme");
        assert!(!err.is_transient());
    }

    #[test]
    fn test_pool_timeout_is_transient() {
        let err = MetadataError::Database(sqlx::Error::PoolTimedOut);
        assert!(err.is_transient());
    }
}
