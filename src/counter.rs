//! Counters kept in step with create/delete events.
//!
//! A counter is one integer field on an ancestor of the documents it
//! counts: go `levels_up` segments up from the event path, then use
//! `field` on that document. With the defaults, creating
//! `area/north/cities/boston` bumps field `count` of `area/north`
//! (addressed as `area/north/count`).
//!
//! All mutations go through [`StoreClient::transact`], so concurrent
//! adjustments never lose an update. A missing counter reads as zero and is
//! created by the first adjustment.

use crate::client::{StoreClient, TransactionConfig};
use crate::error::{Result, StoreError};
use crate::types::{ChangeEvent, ChangeKind, DocPath, FieldRef};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Where counters live and how hard to retry them.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CounterConfig {
    /// Levels from the counted document up to the counter's owner.
    /// Default: 2
    pub levels_up: usize,

    /// Counter field on the owner.
    /// Default: "count"
    pub field: String,

    pub transaction: TransactionConfig,
}

impl Default for CounterConfig {
    fn default() -> Self {
        Self {
            levels_up: 2,
            field: "count".to_string(),
            transaction: TransactionConfig::default(),
        }
    }
}

/// Maintains derived counters through optimistic transactions.
pub struct CounterManager {
    client: Arc<dyn StoreClient>,
    config: CounterConfig,
}

impl CounterManager {
    pub fn new(client: Arc<dyn StoreClient>, config: CounterConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &CounterConfig {
        &self.config
    }

    /// Counter location for a counted document.
    pub fn counter_for(&self, path: &DocPath) -> Result<FieldRef> {
        let owner = path.ancestor(self.config.levels_up).ok_or_else(|| {
            StoreError::InvalidPath(format!(
                "{} has no ancestor {} levels up",
                path, self.config.levels_up
            ))
        })?;
        Ok(FieldRef::new(owner, self.config.field.clone()))
    }

    /// Add `delta` to the counter and return the committed value.
    ///
    /// # Errors
    ///
    /// - `TransactionExhausted` if every attempt lost a race. The adjustment
    ///   is then not applied and the counter stays skewed until the event is
    ///   redelivered.
    /// - `CounterOverflow` if the sum leaves the `i64` range. Nothing is
    ///   written.
    pub fn adjust(&self, counter: &FieldRef, delta: i64) -> Result<i64> {
        let committed = self.client.transact(counter, &self.config.transaction, &mut |current| {
            let base = match current {
                None | Some(serde_json::Value::Null) => 0,
                Some(v) => v.as_i64().unwrap_or_else(|| {
                    tracing::warn!(counter = %counter, value = %v, "non-integer counter reset to zero");
                    0
                }),
            };
            base.checked_add(delta)
                .map(serde_json::Value::from)
                .ok_or_else(|| StoreError::CounterOverflow {
                    path: counter.to_string(),
                    value: base,
                    delta,
                })
        })?;

        let value = committed.as_i64().unwrap_or_default();
        tracing::info!(counter = %counter, delta, value, "counter adjusted");
        Ok(value)
    }

    /// Current counter value, zero if it was never written.
    pub fn current(&self, counter: &FieldRef) -> Result<i64> {
        Ok(self
            .client
            .try_read(&counter.doc)?
            .and_then(|d| d.get(&counter.field).and_then(|v| v.as_i64()))
            .unwrap_or(0))
    }

    /// Apply an event: +1 on Create, -1 on Delete, nothing on Update.
    pub fn apply(&self, event: &ChangeEvent) -> Result<Option<i64>> {
        let delta = match event.kind {
            ChangeKind::Create => 1,
            ChangeKind::Delete => -1,
            ChangeKind::Update => return Ok(None),
        };
        let counter = self.counter_for(&event.path)?;
        self.adjust(&counter, delta).map(Some)
    }
}
