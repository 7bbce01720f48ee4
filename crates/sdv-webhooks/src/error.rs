//! Error types for the delivery engine.

use thiserror::Error;

/// Delivery engine error variants.
#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("Database error: {0}")]
    Database(#[from] sdv_db::DbError),

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Configuration invalid for {var}: {reason}")]
    ConfigInvalid { var: String, reason: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for WebhookError {
    fn from(e: sqlx::Error) -> Self {
        WebhookError::Database(sdv_db::DbError::Database(e))
    }
}
