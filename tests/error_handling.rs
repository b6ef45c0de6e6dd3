//! Error propagation and edge case tests.

mod common;

use common::{fields, harness, int_field, path};
use doctrigger::{
    ChangeEvent, CounterConfig, Fault, FanOutConfig, MissingChildPolicy, RuntimeConfig,
    StoreClient, StoreError, TransactionConfig, WriteMode,
};
use serde_json::json;

// --- Store Client ---

#[test]
fn test_read_missing_is_not_found() {
    let h = harness(RuntimeConfig::default());
    let result = h.store.read(&path("cities/nowhere"));
    assert!(matches!(result, Err(StoreError::NotFound(ref p)) if *p == path("cities/nowhere")));
}

#[test]
fn test_invalid_paths() {
    assert!(matches!(
        doctrigger::DocPath::parse("a//b"),
        Err(StoreError::InvalidPath(_))
    ));
    assert!(matches!(
        doctrigger::PathPattern::parse("a/{id"),
        Err(StoreError::InvalidPattern(_))
    ));
}

// --- Counter ---

#[test]
fn test_exhausted_counter_surfaces_and_skews() {
    let h = harness(RuntimeConfig {
        counter: CounterConfig {
            transaction: TransactionConfig { max_attempts: 3 },
            ..Default::default()
        },
        ..Default::default()
    });
    let doc = h
        .store
        .write(&path("area/north/cities/boston"), fields(json!({})), WriteMode::Replace)
        .unwrap();
    h.store.inject_fault(path("area/north"), Fault::Conflicts(3));

    let result = h.runtime.handle_event(&ChangeEvent::create(doc.clone()));
    assert!(matches!(
        result,
        Err(StoreError::TransactionExhausted { attempts: 3, ref path }) if path == "area/north/count"
    ));
    assert_eq!(int_field(&h.store, "area/north", "count"), 0);

    // Redelivery after contention clears commits normally.
    h.runtime.handle_event(&ChangeEvent::create(doc)).unwrap();
    assert_eq!(int_field(&h.store, "area/north", "count"), 1);
}

#[test]
fn test_counter_write_failure_propagates() {
    let h = harness(RuntimeConfig::default());
    let doc = h
        .store
        .write(&path("area/north/cities/boston"), fields(json!({})), WriteMode::Replace)
        .unwrap();
    // The counter is a field of area/north.
    h.store.inject_fault(path("area/north"), Fault::FailWrites);

    let result = h.runtime.handle_event(&ChangeEvent::create(doc));
    assert!(matches!(result, Err(StoreError::Write(_))));
}

// --- Rewriter ---

#[test]
fn test_rewrite_write_failure_propagates() {
    let h = harness(RuntimeConfig::default());
    let doc = h
        .store
        .write(&path("area/north/messages/m1"), fields(json!({"text": "pizza"})), WriteMode::Replace)
        .unwrap();
    h.store.inject_fault(path("area/north/messages"), Fault::FailWrites);

    let report = h.runtime.dispatch(&ChangeEvent::create(doc));
    assert_eq!(report.matched(), 1);
    let failures: Vec<_> = report.failures().collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0, "rewrite");
    assert!(failures[0].1.is_transient());

    // No notification for a write that never happened.
    assert!(h.publisher.messages().is_empty());
}

// --- Dispatcher ---

#[test]
fn test_delivery_failure_does_not_fail_trigger() {
    let h = harness(RuntimeConfig::default());
    h.publisher.set_failing(true);
    let doc = h
        .store
        .write(&path("area/north/messages/m1"), fields(json!({"text": "pizza"})), WriteMode::Replace)
        .unwrap();

    h.runtime.handle_event(&ChangeEvent::create(doc)).unwrap();

    let stored = h.store.read(&path("area/north/messages/m1")).unwrap();
    assert_eq!(stored.get_str("text"), Some("🍕"));
    assert!(h.publisher.messages().is_empty());
}

// --- Fan-out ---

#[test]
fn test_fanout_fail_fast_returns_no_partial_result() {
    let h = harness(RuntimeConfig::default());
    h.store
        .write(
            &path("rooms/lobby"),
            fields(json!({"refs": {"a": "one", "b": "two", "c": "three"}})),
            WriteMode::Replace,
        )
        .unwrap();
    for id in ["one", "two", "three"] {
        h.store
            .write(&path(&format!("rooms/{}", id)), fields(json!({})), WriteMode::Replace)
            .unwrap();
    }
    h.store.inject_fault(path("rooms/two"), Fault::FailReads);

    match h.runtime.aggregator().aggregate(&path("rooms/lobby")) {
        Err(StoreError::Aggregation { key, .. }) => assert_eq!(key, "b"),
        other => panic!("expected aggregation error, got {:?}", other),
    }

    let response = h.runtime.get_aggregate("rooms/lobby");
    assert_eq!(response.status, 500);
    assert!(response.body["error"].as_str().unwrap().contains("child b"));
}

#[test]
fn test_fanout_skip_policy_from_config() {
    let h = harness(RuntimeConfig {
        fanout: FanOutConfig {
            missing_child: MissingChildPolicy::Skip,
            ..Default::default()
        },
        ..Default::default()
    });
    h.store
        .write(
            &path("rooms/lobby"),
            fields(json!({"refs": {"a": "gone", "b": "here"}})),
            WriteMode::Replace,
        )
        .unwrap();
    h.store
        .write(&path("rooms/here"), fields(json!({"ok": true})), WriteMode::Replace)
        .unwrap();

    let children = h.runtime.aggregator().aggregate(&path("rooms/lobby")).unwrap();
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].key, "b");
}

// --- HTTP ---

#[test]
fn test_http_errors_carry_description() {
    let h = harness(RuntimeConfig::default());

    let response = h.runtime.get_document("cities/nowhere");
    assert_eq!(response.status, 500);
    assert_eq!(
        response.body["error"],
        json!("Document not found: cities/nowhere")
    );

    let response = h.runtime.get_document("");
    assert_eq!(response.status, 400);
}
