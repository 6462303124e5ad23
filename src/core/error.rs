//! Errors raised by the sync engine

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    /// The market data source failed. Recoverable: the last known cache is served.
    #[error("failed to fetch market data: {0}")]
    Fetch(#[source] anyhow::Error),

    /// Persisting to the local cache failed. The in-memory view is still updated.
    #[error("failed to write coin cache: {0}")]
    CacheWrite(#[source] anyhow::Error),

    #[error("coin not found: {0}")]
    NotFound(String),

    #[error("invalid quantity {quantity} for coin {id}")]
    InvalidQuantity {
        id: String,
        quantity: rust_decimal::Decimal,
    },

    /// A newer refresh or shutdown took over before the batch was committed.
    #[error("operation cancelled")]
    Cancelled,
}

impl SyncError {
    /// Message shown to the user, if the error is meant to be seen at all.
    pub fn status_message(&self) -> Option<String> {
        match self {
            SyncError::Fetch(e) => Some(format!("Error: {e}")),
            _ => None,
        }
    }
}
