//! Fan-out aggregation: resolve a parent document's reference set into the
//! referenced child documents.
//!
//! Child reads run concurrently on a small scoped worker pool. Results are
//! joined back in the reference set's own order, whatever order the reads
//! finish in. By default the join is all-or-nothing: the first failing
//! child read fails the whole aggregation and no partial result escapes.
//! Reads already in flight are allowed to finish; queued ones are skipped.

use crate::client::StoreClient;
use crate::error::{Result, StoreError};
use crate::types::{DocPath, Document};
use crossbeam_channel::unbounded;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// What to do with a reference whose target document does not exist.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingChildPolicy {
    /// Fail the aggregation with the child's `NotFound`.
    #[default]
    FailFast,
    /// Leave the child out of the result.
    Skip,
}

/// Fan-out configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct FanOutConfig {
    /// Parent field holding the `key -> reference id` mapping.
    /// Default: "refs"
    pub reference_field: String,

    /// Collection the reference ids live in. `None` resolves them as
    /// siblings of the parent document.
    pub child_collection: Option<DocPath>,

    /// Upper bound on concurrent child reads.
    /// Default: 16
    pub max_concurrency: usize,

    pub missing_child: MissingChildPolicy,
}

impl Default for FanOutConfig {
    fn default() -> Self {
        Self {
            reference_field: "refs".to_string(),
            child_collection: None,
            max_concurrency: 16,
            missing_child: MissingChildPolicy::FailFast,
        }
    }
}

/// One resolved entry of a reference set.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AggregatedChild {
    /// Key of the entry in the parent's reference set.
    pub key: String,
    /// Referenced document id.
    pub id: String,
    pub document: Document,
}

impl AggregatedChild {
    /// Child fields with `key` and `id` attached.
    pub fn to_json(&self) -> serde_json::Value {
        let mut value = self.document.to_json_with_id();
        if let Some(obj) = value.as_object_mut() {
            obj.insert("id".to_string(), self.id.clone().into());
            obj.insert("key".to_string(), self.key.clone().into());
        }
        value
    }
}

/// A reference resolved to a path, before it is read.
#[derive(Clone, Debug)]
struct ChildRef {
    key: String,
    id: String,
    path: DocPath,
}

/// Resolves reference sets via concurrent reads.
pub struct FanOutAggregator {
    client: Arc<dyn StoreClient>,
    config: FanOutConfig,
}

impl FanOutAggregator {
    pub fn new(client: Arc<dyn StoreClient>, config: FanOutConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &FanOutConfig {
        &self.config
    }

    /// Read `parent`, then every document its reference set points at.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the parent does not exist.
    /// - `InvalidReference` if the reference field is not a mapping of ids.
    /// - `Aggregation` wrapping the first failing child read.
    pub fn aggregate(&self, parent: &DocPath) -> Result<Vec<AggregatedChild>> {
        let parent_doc = self.client.read(parent)?;
        let refs = self.resolve_refs(&parent_doc)?;

        tracing::debug!(parent = %parent, children = refs.len(), "aggregating reference set");

        if refs.is_empty() {
            return Ok(Vec::new());
        }

        let slots = self.read_all(&refs)?;

        Ok(refs
            .into_iter()
            .zip(slots)
            .filter_map(|(r, doc)| {
                doc.map(|document| AggregatedChild {
                    key: r.key,
                    id: r.id,
                    document,
                })
            })
            .collect())
    }

    /// Turn the parent's reference field into child paths, in field order.
    /// A parent without the field has an empty reference set.
    fn resolve_refs(&self, parent: &Document) -> Result<Vec<ChildRef>> {
        let field = &self.config.reference_field;
        let map = match parent.get(field) {
            None | Some(serde_json::Value::Null) => return Ok(Vec::new()),
            Some(serde_json::Value::Object(map)) => map,
            Some(_) => {
                return Err(StoreError::InvalidReference(format!(
                    "{}.{} is not a mapping",
                    parent.path, field
                )))
            }
        };

        let collection = match self.config.child_collection {
            Some(ref c) => c.clone(),
            None => parent.path.parent().ok_or_else(|| {
                StoreError::InvalidReference(format!("{} has no collection", parent.path))
            })?,
        };

        map.iter()
            .map(|(key, value)| {
                let id = match value {
                    serde_json::Value::String(s) => s.clone(),
                    serde_json::Value::Number(n) => n.to_string(),
                    other => {
                        return Err(StoreError::InvalidReference(format!(
                            "{}.{}.{} = {}",
                            parent.path, field, key, other
                        )))
                    }
                };
                let path = collection
                    .child(&id)
                    .map_err(|_| StoreError::InvalidReference(format!("bad id {:?}", id)))?;
                Ok(ChildRef {
                    key: key.clone(),
                    id,
                    path,
                })
            })
            .collect()
    }

    /// Read every child. Slot `i` holds the result for `refs[i]`; a slot is
    /// `None` only for children skipped under `MissingChildPolicy::Skip`.
    fn read_all(&self, refs: &[ChildRef]) -> Result<Vec<Option<Document>>> {
        let workers = self.config.max_concurrency.clamp(1, refs.len());
        let (job_tx, job_rx) = unbounded::<usize>();
        let (result_tx, result_rx) = unbounded::<(usize, Result<Option<Document>>)>();
        let abort = AtomicBool::new(false);
        let client = &*self.client;

        for index in 0..refs.len() {
            let _ = job_tx.send(index);
        }
        drop(job_tx);

        std::thread::scope(|scope| {
            for _ in 0..workers {
                let job_rx = job_rx.clone();
                let result_tx = result_tx.clone();
                let abort = &abort;
                scope.spawn(move || {
                    for index in job_rx.iter() {
                        if abort.load(Ordering::SeqCst) {
                            break;
                        }
                        let result = client.try_read(&refs[index].path);
                        if result_tx.send((index, result)).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(result_tx);

            let mut slots: Vec<Option<Document>> = vec![None; refs.len()];
            for (index, result) in result_rx.iter() {
                let child = &refs[index];
                let failure = match result {
                    Ok(Some(doc)) => {
                        slots[index] = Some(doc);
                        continue;
                    }
                    Ok(None) if self.config.missing_child == MissingChildPolicy::Skip => {
                        tracing::debug!(key = %child.key, path = %child.path, "skipping missing child");
                        continue;
                    }
                    Ok(None) => StoreError::NotFound(child.path.clone()),
                    Err(e) => e,
                };

                tracing::warn!(key = %child.key, path = %child.path, error = %failure, "child read failed");
                abort.store(true, Ordering::SeqCst);
                return Err(StoreError::Aggregation {
                    key: child.key.clone(),
                    source: Box::new(failure),
                });
            }

            Ok(slots)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{Fault, MemoryStore};
    use crate::types::{Fields, WriteMode};
    use serde_json::json;
    use std::time::Duration;

    fn path(s: &str) -> DocPath {
        DocPath::parse(s).unwrap()
    }

    fn fields(v: serde_json::Value) -> Fields {
        v.as_object().cloned().unwrap()
    }

    fn seed() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store
            .write(
                &path("rooms/lobby"),
                fields(json!({"refs": {"a": "boston", "b": "austin", "c": "denver"}})),
                WriteMode::Replace,
            )
            .unwrap();
        for (id, temp) in [("boston", 10), ("austin", 30), ("denver", 5)] {
            store
                .write(
                    &path(&format!("cities/{}", id)),
                    fields(json!({"temp": temp})),
                    WriteMode::Replace,
                )
                .unwrap();
        }
        store
    }

    fn aggregator(store: Arc<MemoryStore>, policy: MissingChildPolicy) -> FanOutAggregator {
        FanOutAggregator::new(
            store,
            FanOutConfig {
                child_collection: Some(path("cities")),
                missing_child: policy,
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_preserves_reference_order() {
        let store = seed();
        // First reference finishes last.
        store.inject_fault(path("cities/boston"), Fault::ReadDelay(Duration::from_millis(60)));
        store.inject_fault(path("cities/austin"), Fault::ReadDelay(Duration::from_millis(30)));

        let children = aggregator(store, MissingChildPolicy::FailFast)
            .aggregate(&path("rooms/lobby"))
            .unwrap();

        let keys: Vec<&str> = children.iter().map(|c| c.key.as_str()).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
        assert_eq!(children[0].id, "boston");
        assert_eq!(children[1].document.get("temp"), Some(&json!(30)));
    }

    #[test]
    fn test_fail_fast_on_child_error() {
        let store = seed();
        store.inject_fault(path("cities/austin"), Fault::FailReads);

        let result = aggregator(store, MissingChildPolicy::FailFast).aggregate(&path("rooms/lobby"));
        match result {
            Err(StoreError::Aggregation { key, source }) => {
                assert_eq!(key, "b");
                assert!(matches!(*source, StoreError::Io(_)));
            }
            other => panic!("expected aggregation error, got {:?}", other),
        }
    }

    #[test]
    fn test_dangling_reference() {
        let store = seed();
        store.delete(&path("cities/denver")).unwrap();

        let result = aggregator(Arc::clone(&store), MissingChildPolicy::FailFast)
            .aggregate(&path("rooms/lobby"));
        assert!(matches!(
            result,
            Err(StoreError::Aggregation { ref key, .. }) if key == "c"
        ));

        let children = aggregator(store, MissingChildPolicy::Skip)
            .aggregate(&path("rooms/lobby"))
            .unwrap();
        assert_eq!(children.len(), 2);
    }

    #[test]
    fn test_missing_parent() {
        let store = seed();
        let result = aggregator(store, MissingChildPolicy::FailFast).aggregate(&path("rooms/none"));
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_sibling_resolution_and_empty_set() {
        let store = Arc::new(MemoryStore::new());
        store
            .write(&path("cities/boston"), fields(json!({"refs": {"n": "nyc"}})), WriteMode::Replace)
            .unwrap();
        store
            .write(&path("cities/nyc"), fields(json!({"temp": 8})), WriteMode::Replace)
            .unwrap();
        store
            .write(&path("cities/empty"), Fields::new(), WriteMode::Replace)
            .unwrap();

        let agg = FanOutAggregator::new(store, FanOutConfig::default());
        let children = agg.aggregate(&path("cities/boston")).unwrap();
        assert_eq!(children[0].document.path, path("cities/nyc"));
        assert!(agg.aggregate(&path("cities/empty")).unwrap().is_empty());
    }

    #[test]
    fn test_invalid_reference_field() {
        let store = Arc::new(MemoryStore::new());
        store
            .write(&path("rooms/x"), fields(json!({"refs": ["boston"]})), WriteMode::Replace)
            .unwrap();
        store
            .write(&path("rooms/y"), fields(json!({"refs": {"a": true}})), WriteMode::Replace)
            .unwrap();

        let agg = FanOutAggregator::new(store, FanOutConfig::default());
        assert!(matches!(
            agg.aggregate(&path("rooms/x")),
            Err(StoreError::InvalidReference(_))
        ));
        assert!(matches!(
            agg.aggregate(&path("rooms/y")),
            Err(StoreError::InvalidReference(_))
        ));
    }

    #[test]
    fn test_child_json_carries_key_and_id() {
        let store = seed();
        let children = aggregator(store, MissingChildPolicy::FailFast)
            .aggregate(&path("rooms/lobby"))
            .unwrap();
        let v = children[2].to_json();
        assert_eq!(v["key"], "c");
        assert_eq!(v["id"], "denver");
        assert_eq!(v["temp"], 5);
    }
}
