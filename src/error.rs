//! Error types for the trigger core.

use crate::subscriptions::DropReason;
use crate::types::DocPath;
use thiserror::Error;

/// Main error type for store, trigger, and handler operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Document not found: {0}")]
    NotFound(DocPath),

    #[error("Write failed: {0}")]
    Write(String),

    /// Conditional write lost a race with another writer.
    #[error("Write conflict at {0}")]
    Conflict(DocPath),

    #[error("Transaction exhausted at {path} after {attempts} attempts")]
    TransactionExhausted { path: String, attempts: u32 },

    #[error("Counter overflow at {path}: {value} + {delta}")]
    CounterOverflow { path: String, value: i64, delta: i64 },

    /// First failing child read of a fan-out aggregation.
    #[error("Aggregation failed on child {key}: {source}")]
    Aggregation {
        key: String,
        #[source]
        source: Box<StoreError>,
    },

    #[error("Delivery failed: {0}")]
    Delivery(String),

    /// The store stopped delivering events to a listener; later changes were
    /// never handled.
    #[error("Subscription dropped: {0:?}")]
    SubscriptionDropped(DropReason),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),

    #[error("Invalid reference: {0}")]
    InvalidReference(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Whether the platform may usefully redeliver the event that produced
    /// this error.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::Write(_) | StoreError::Conflict(_) | StoreError::Io(_)
        )
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
