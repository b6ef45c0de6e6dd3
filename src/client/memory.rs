//! In-process store client and publisher.

use super::{Publisher, StoreClient};
use crate::error::{Result, StoreError};
use crate::subscriptions::{SubscriptionConfig, SubscriptionHandle, SubscriptionManager};
use crate::types::{ChangeEvent, DocPath, Document, Fields, Timestamp, WriteMode};
use parking_lot::{Mutex, RwLock};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

/// Failure injected for every path under a prefix.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Fault {
    /// Reads fail with an I/O error.
    FailReads,
    /// Writes, deletes, and conditional writes fail with `Write`.
    FailWrites,
    /// Reads sleep before answering.
    ReadDelay(Duration),
    /// The next `n` conditional writes report a conflict.
    Conflicts(u32),
}

/// Document store held in memory.
///
/// Every successful mutation is broadcast as a [`ChangeEvent`] to the
/// store's subscribers. Versions come from one store-wide sequence, so a
/// document deleted and re-created never reuses a version.
pub struct MemoryStore {
    docs: RwLock<BTreeMap<DocPath, Document>>,
    subscriptions: SubscriptionManager,
    faults: Mutex<Vec<(DocPath, Fault)>>,
    sequence: AtomicU64,
    /// Source of generated keys; never repeats within a store.
    next_key: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_subscriptions(SubscriptionManager::new())
    }

    pub fn with_subscriptions(subscriptions: SubscriptionManager) -> Self {
        Self {
            docs: RwLock::new(BTreeMap::new()),
            subscriptions,
            faults: Mutex::new(Vec::new()),
            sequence: AtomicU64::new(0),
            next_key: AtomicU64::new(0),
        }
    }

    /// Subscribe to change events.
    pub fn subscribe(&self, config: SubscriptionConfig) -> SubscriptionHandle {
        self.subscriptions.subscribe(config)
    }

    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.subscriptions
    }

    /// Write a new document under `collection` with a generated key.
    pub fn add(&self, collection: &DocPath, fields: Fields) -> Result<Document> {
        let seq = self.next_key.fetch_add(1, Ordering::SeqCst);
        let mut hasher = Sha256::new();
        hasher.update(collection.to_string().as_bytes());
        hasher.update(seq.to_le_bytes());
        hasher.update(Timestamp::now().0.to_le_bytes());
        let key = hex::encode(&hasher.finalize()[..10]);

        self.write(&collection.child(&key)?, fields, WriteMode::Replace)
    }

    /// Number of stored documents.
    pub fn len(&self) -> usize {
        self.docs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.read().is_empty()
    }

    /// Documents at or below `prefix`, in path order.
    pub fn list(&self, prefix: &DocPath) -> Vec<Document> {
        self.docs
            .read()
            .range(prefix.clone()..)
            .take_while(|(path, _)| path.starts_with(prefix))
            .map(|(_, doc)| doc.clone())
            .collect()
    }

    // --- Fault Injection ---

    pub fn inject_fault(&self, prefix: DocPath, fault: Fault) {
        self.faults.lock().push((prefix, fault));
    }

    pub fn clear_faults(&self) {
        self.faults.lock().clear();
    }

    fn check_read(&self, path: &DocPath) -> Result<()> {
        let mut delay = None;
        {
            let faults = self.faults.lock();
            for (prefix, fault) in faults.iter().filter(|(p, _)| path.starts_with(p)) {
                match fault {
                    Fault::FailReads => {
                        return Err(StoreError::Io(std::io::Error::new(
                            std::io::ErrorKind::Other,
                            format!("injected read failure under {}", prefix),
                        )));
                    }
                    Fault::ReadDelay(d) => delay = Some(*d),
                    _ => {}
                }
            }
        }
        if let Some(d) = delay {
            std::thread::sleep(d);
        }
        Ok(())
    }

    fn check_write(&self, path: &DocPath) -> Result<()> {
        let faults = self.faults.lock();
        if faults
            .iter()
            .any(|(p, f)| path.starts_with(p) && *f == Fault::FailWrites)
        {
            return Err(StoreError::Write(format!("injected write failure at {}", path)));
        }
        Ok(())
    }

    /// Consume one injected conflict for `path`, if any.
    fn take_conflict(&self, path: &DocPath) -> bool {
        let mut faults = self.faults.lock();
        for (prefix, fault) in faults.iter_mut() {
            if let Fault::Conflicts(n) = fault {
                if *n > 0 && path.starts_with(prefix) {
                    *n -= 1;
                    return true;
                }
            }
        }
        false
    }

    // --- Internal ---

    /// Apply a write while holding the document lock and broadcast it.
    fn commit(
        &self,
        docs: &mut BTreeMap<DocPath, Document>,
        path: &DocPath,
        fields: Fields,
        mode: WriteMode,
    ) -> Document {
        let before = docs.get(path).cloned();

        let mut merged = match (&before, mode) {
            (Some(existing), WriteMode::Merge) => existing.fields.clone(),
            _ => Fields::new(),
        };
        for (k, v) in fields {
            merged.insert(k, v);
        }

        let after = Document {
            path: path.clone(),
            fields: merged,
            version: self.sequence.fetch_add(1, Ordering::SeqCst) + 1,
            update_time: Timestamp::now(),
        };
        docs.insert(path.clone(), after.clone());

        let event = match before {
            Some(before) => ChangeEvent::update(before, after.clone()),
            None => ChangeEvent::create(after.clone()),
        };
        self.subscriptions.broadcast_change(&event);

        after
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreClient for MemoryStore {
    fn try_read(&self, path: &DocPath) -> Result<Option<Document>> {
        self.check_read(path)?;
        Ok(self.docs.read().get(path).cloned())
    }

    fn write(&self, path: &DocPath, fields: Fields, mode: WriteMode) -> Result<Document> {
        self.check_write(path)?;
        let mut docs = self.docs.write();
        Ok(self.commit(&mut docs, path, fields, mode))
    }

    fn delete(&self, path: &DocPath) -> Result<Option<Document>> {
        self.check_write(path)?;
        let mut docs = self.docs.write();
        let removed = docs.remove(path);
        if let Some(ref before) = removed {
            self.subscriptions
                .broadcast_change(&ChangeEvent::delete(before.clone()));
        }
        Ok(removed)
    }

    fn compare_and_set(
        &self,
        path: &DocPath,
        expected: Option<u64>,
        fields: Fields,
    ) -> Result<Document> {
        self.check_write(path)?;
        if self.take_conflict(path) {
            return Err(StoreError::Conflict(path.clone()));
        }

        let mut docs = self.docs.write();
        let current = docs.get(path).map(|d| d.version);
        if current != expected {
            return Err(StoreError::Conflict(path.clone()));
        }
        Ok(self.commit(&mut docs, path, fields, WriteMode::Merge))
    }
}

/// A message accepted by [`MemoryPublisher`].
#[derive(Clone, Debug, PartialEq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: serde_json::Value,
}

/// Publisher that keeps every message in memory.
#[derive(Default)]
pub struct MemoryPublisher {
    messages: Mutex<Vec<PublishedMessage>>,
    failing: AtomicBool,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following publish fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn messages(&self) -> Vec<PublishedMessage> {
        self.messages.lock().clone()
    }
}

impl Publisher for MemoryPublisher {
    fn publish(&self, topic: &str, payload: &serde_json::Value) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Delivery(format!("topic {} unavailable", topic)));
        }
        self.messages.lock().push(PublishedMessage {
            topic: topic.to_string(),
            payload: payload.clone(),
        });
        Ok(())
    }
}
