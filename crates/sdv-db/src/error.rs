//! Error types for the persistence layer.

use thiserror::Error;

/// Errors from ledger and endpoint queries.
#[derive(Debug, Error)]
pub enum DbError {
    /// Underlying database failure.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A row carried a value the model cannot represent.
    #[error("Invalid column value for {column}: {reason}")]
    InvalidValue { column: String, reason: String },
}
