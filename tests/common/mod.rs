//! Shared helpers for integration tests.

#![allow(dead_code)]

use doctrigger::{
    DocPath, Fields, MemoryPublisher, MemoryStore, Runtime, RuntimeConfig, StoreClient,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub fn path(s: &str) -> DocPath {
    DocPath::parse(s).unwrap()
}

pub fn fields(v: Value) -> Fields {
    v.as_object().cloned().unwrap()
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub publisher: Arc<MemoryPublisher>,
    pub runtime: Runtime,
}

/// Route trigger logs to the test output. Safe to call more than once.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

pub fn harness(config: RuntimeConfig) -> Harness {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let publisher = Arc::new(MemoryPublisher::new());
    let runtime = Runtime::new(
        Arc::clone(&store) as Arc<dyn StoreClient>,
        Arc::clone(&publisher) as Arc<dyn doctrigger::Publisher>,
        config,
    );
    Harness {
        store,
        publisher,
        runtime,
    }
}

/// Poll `cond` until it holds or `timeout` passes.
pub fn wait_for(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}

/// Integer field of a document, 0 if absent.
pub fn int_field(store: &MemoryStore, doc: &str, field: &str) -> i64 {
    store
        .try_read(&path(doc))
        .unwrap()
        .and_then(|d| d.get(field).and_then(|v| v.as_i64()))
        .unwrap_or(0)
}
