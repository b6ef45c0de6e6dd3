//! Derived-field rewriting that does not retrigger itself.
//!
//! The store reports every write as a change event, including the writes
//! made here. The update path therefore compares the source field before
//! and after the change and does nothing when it is textually equal. Our
//! own write leaves the source untouched (or already transformed), so the
//! event it produces ends in that branch.
//!
//! Redelivered events are absorbed too: if the document moved past the
//! event's `after` snapshot and already holds the derived value, the
//! rewrite is skipped.

use crate::client::StoreClient;
use crate::error::Result;
use crate::types::{ChangeEvent, ChangeKind, Document, Fields, Timestamp, WriteMode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Deterministic text transform producing the derived value.
pub trait Transform: Send + Sync {
    fn apply(&self, source: &str) -> String;
}

impl<F> Transform for F
where
    F: Fn(&str) -> String + Send + Sync,
{
    fn apply(&self, source: &str) -> String {
        self(source)
    }
}

/// A literal substring substitution.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Replacement {
    pub from: String,
    pub to: String,
}

/// Applies a list of substitutions in order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Replacements(pub Vec<Replacement>);

impl Replacements {
    /// The stock word-to-emoji table.
    pub fn emoji() -> Self {
        Replacements(vec![Replacement {
            from: "pizza".to_string(),
            to: "🍕".to_string(),
        }])
    }
}

impl Transform for Replacements {
    fn apply(&self, source: &str) -> String {
        self.0
            .iter()
            .filter(|r| !r.from.is_empty())
            .fold(source.to_string(), |text, r| text.replace(&r.from, &r.to))
    }
}

/// Which fields the rewriter reads and writes.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RewriteConfig {
    /// Default: "text"
    pub source_field: String,

    /// May equal `source_field` to rewrite in place.
    /// Default: "text"
    pub derived_field: String,

    /// Stamped on update-path writes.
    /// Default: "updated_at"
    pub timestamp_field: String,

    /// Substitutions used when no custom transform is supplied.
    pub replacements: Replacements,
}

impl Default for RewriteConfig {
    fn default() -> Self {
        Self {
            source_field: "text".to_string(),
            derived_field: "text".to_string(),
            timestamp_field: "updated_at".to_string(),
            replacements: Replacements::emoji(),
        }
    }
}

/// Result of processing one event.
#[derive(Clone, Debug, PartialEq)]
pub enum RewriteOutcome {
    /// The derived field was written; holds the stored document.
    Written(Document),
    /// Source field unchanged between before and after.
    Unchanged,
    /// The document already carries this event's derived value.
    AlreadyApplied,
    /// The stored source field has moved past this event's `after`.
    Superseded,
    /// Nothing to do: delete event, missing or non-text source, or the
    /// document is gone.
    Skipped,
}

/// Keeps a derived field consistent with its source field.
pub struct DerivedFieldRewriter {
    client: Arc<dyn StoreClient>,
    config: RewriteConfig,
    transform: Box<dyn Transform>,
}

impl DerivedFieldRewriter {
    /// Rewriter using the configured replacement table.
    pub fn new(client: Arc<dyn StoreClient>, config: RewriteConfig) -> Self {
        let transform = Box::new(config.replacements.clone());
        Self {
            client,
            config,
            transform,
        }
    }

    pub fn with_transform(
        client: Arc<dyn StoreClient>,
        config: RewriteConfig,
        transform: impl Transform + 'static,
    ) -> Self {
        Self {
            client,
            config,
            transform: Box::new(transform),
        }
    }

    pub fn config(&self) -> &RewriteConfig {
        &self.config
    }

    /// Derived value for a source text.
    pub fn derive(&self, source: &str) -> String {
        self.transform.apply(source)
    }

    /// Process one change event, writing at most once.
    ///
    /// # Errors
    ///
    /// Read and write failures propagate unchanged so the caller can let the
    /// platform redeliver the event.
    pub fn rewrite(&self, event: &ChangeEvent) -> Result<RewriteOutcome> {
        let (after, stamp) = match (event.kind, event.before(), event.after()) {
            (ChangeKind::Create, _, Some(after)) => (after, false),
            (ChangeKind::Update, Some(before), Some(after)) => {
                let field = &self.config.source_field;
                if before.get(field) == after.get(field) {
                    tracing::debug!(path = %event.path, "source unchanged, nothing to rewrite");
                    return Ok(RewriteOutcome::Unchanged);
                }
                (after, true)
            }
            _ => return Ok(RewriteOutcome::Skipped),
        };

        let source = match after.get_str(&self.config.source_field) {
            Some(s) => s,
            None => {
                tracing::debug!(
                    path = %event.path,
                    field = %self.config.source_field,
                    "source missing or not text"
                );
                return Ok(RewriteOutcome::Skipped);
            }
        };
        let derived = self.derive(source);

        let current = match self.client.try_read(&after.path)? {
            Some(doc) => doc,
            None => {
                tracing::debug!(path = %event.path, "document gone before rewrite");
                return Ok(RewriteOutcome::Skipped);
            }
        };
        if current.version != after.version {
            if current.get_str(&self.config.derived_field) == Some(derived.as_str()) {
                tracing::debug!(event_id = %event.id, path = %event.path, "rewrite already applied");
                return Ok(RewriteOutcome::AlreadyApplied);
            }
            // A later change owns the source now; its own event rewrites it.
            if current.get(&self.config.source_field) != after.get(&self.config.source_field) {
                tracing::debug!(
                    event_id = %event.id,
                    path = %event.path,
                    stored = current.version,
                    event_version = after.version,
                    "stale event, source changed since"
                );
                return Ok(RewriteOutcome::Superseded);
            }
        }

        let mut fields = Fields::new();
        fields.insert(self.config.derived_field.clone(), derived.into());
        if stamp {
            fields.insert(
                self.config.timestamp_field.clone(),
                Timestamp::now().0.into(),
            );
        }

        let written = self.client.write(&after.path, fields, WriteMode::Merge)?;
        tracing::info!(path = %event.path, kind = %event.kind, version = written.version, "derived field rewritten");
        Ok(RewriteOutcome::Written(written))
    }
}
