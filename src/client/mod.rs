//! Capability interface to the document store.
//!
//! Every component in this crate talks to storage through [`StoreClient`]
//! and to the notification channel through [`Publisher`]. Both are object
//! safe so a single process-wide client can be shared as `Arc<dyn ...>`.
//!
//! Counters rely on [`StoreClient::transact`], which layers bounded
//! optimistic retries over the conditional write primitive
//! [`StoreClient::compare_and_set`].

mod memory;

pub use memory::{Fault, MemoryPublisher, MemoryStore, PublishedMessage};

use crate::error::{Result, StoreError};
use crate::types::{DocPath, Document, FieldRef, Fields, WriteMode};
use serde::{Deserialize, Serialize};

/// Retry policy for optimistic transactions.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionConfig {
    /// Attempts before giving up with `TransactionExhausted`.
    /// Default: 10
    pub max_attempts: u32,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self { max_attempts: 10 }
    }
}

/// Point reads, writes, and conditional writes against a path-addressed
/// document store.
pub trait StoreClient: Send + Sync {
    /// Read a document, `None` if absent.
    fn try_read(&self, path: &DocPath) -> Result<Option<Document>>;

    /// Write fields. `Merge` creates the document if it is missing.
    fn write(&self, path: &DocPath, fields: Fields, mode: WriteMode) -> Result<Document>;

    /// Delete a document. Returns the removed snapshot, if there was one.
    fn delete(&self, path: &DocPath) -> Result<Option<Document>>;

    /// Merge `fields` only if the stored version still equals `expected`
    /// (`None` meaning the document must not exist yet). Fails with
    /// [`StoreError::Conflict`] otherwise.
    fn compare_and_set(
        &self,
        path: &DocPath,
        expected: Option<u64>,
        fields: Fields,
    ) -> Result<Document>;

    /// Read a document that must exist.
    fn read(&self, path: &DocPath) -> Result<Document> {
        self.try_read(path)?
            .ok_or_else(|| StoreError::NotFound(path.clone()))
    }

    /// Optimistically transform a single field.
    ///
    /// `f` receives the current value (`None` if the field or document is
    /// missing) and returns the value to store. On conflict the field is
    /// re-read and `f` runs again, so it must be free of side effects. An
    /// error from `f` aborts the transaction without writing.
    fn transact(
        &self,
        target: &FieldRef,
        config: &TransactionConfig,
        f: &mut dyn FnMut(Option<&serde_json::Value>) -> Result<serde_json::Value>,
    ) -> Result<serde_json::Value> {
        for attempt in 1..=config.max_attempts {
            let current = self.try_read(&target.doc)?;
            let expected = current.as_ref().map(|d| d.version);
            let next = f(current.as_ref().and_then(|d| d.get(&target.field)))?;

            let mut fields = Fields::new();
            fields.insert(target.field.clone(), next.clone());

            match self.compare_and_set(&target.doc, expected, fields) {
                Ok(_) => {
                    tracing::debug!(target_field = %target, attempt, "transaction committed");
                    return Ok(next);
                }
                Err(StoreError::Conflict(_)) => {
                    tracing::debug!(target_field = %target, attempt, "transaction conflict, retrying");
                }
                Err(e) => return Err(e),
            }
        }

        tracing::error!(
            target_field = %target,
            attempts = config.max_attempts,
            "transaction retries exhausted"
        );
        Err(StoreError::TransactionExhausted {
            path: target.to_string(),
            attempts: config.max_attempts,
        })
    }
}

/// Fire-and-forget notification channel.
pub trait Publisher: Send + Sync {
    fn publish(&self, topic: &str, payload: &serde_json::Value) -> Result<()>;
}
