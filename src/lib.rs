//! # Document Triggers
//!
//! Reactive handlers over a path-addressed document store.
//!
//! ## Core Concepts
//!
//! - **Documents**: path-addressed field maps, read and written through a
//!   [`StoreClient`]
//! - **Change events**: one per create, update, or delete, delivered at
//!   least once to triggers whose path pattern matches
//! - **Fan-out**: resolve a parent's reference set with concurrent reads
//! - **Counters**: integers kept equal to creates minus deletes through
//!   optimistic transactions
//! - **Derived fields**: rewritten once per genuine source change, never on
//!   the rewrite's own change event
//!
//! ## Example
//!
//! ```ignore
//! use doctrigger::{MemoryPublisher, MemoryStore, Runtime, RuntimeConfig, SubscriptionConfig};
//! use std::sync::Arc;
//!
//! let store = Arc::new(MemoryStore::new());
//! let runtime = Runtime::new(store.clone(), Arc::new(MemoryPublisher::new()), RuntimeConfig::default());
//! let listener = runtime.spawn_listener(store.subscribe(SubscriptionConfig::default()));
//!
//! // Creating a city bumps area/north/count.
//! store.write(&DocPath::parse("area/north/cities/boston")?, Fields::new(), WriteMode::Merge)?;
//!
//! // Serve a document over whatever HTTP layer the process uses.
//! let response = runtime.get_document("area/north");
//! ```

pub mod client;
pub mod counter;
pub mod error;
pub mod fanout;
pub mod http;
pub mod notify;
pub mod pattern;
pub mod rewrite;
pub mod runtime;
pub mod subscriptions;
pub mod triggers;
pub mod types;

// Re-exports
pub use client::{
    Fault, MemoryPublisher, MemoryStore, PublishedMessage, Publisher, StoreClient,
    TransactionConfig,
};
pub use counter::{CounterConfig, CounterManager};
pub use error::{Result, StoreError};
pub use fanout::{AggregatedChild, FanOutAggregator, FanOutConfig, MissingChildPolicy};
pub use http::HttpResponse;
pub use notify::{changed_fields, ChangeNotifier, DeliveryStatus, NotifyConfig};
pub use pattern::PathPattern;
pub use rewrite::{
    DerivedFieldRewriter, Replacement, Replacements, RewriteConfig, RewriteOutcome, Transform,
};
pub use runtime::{ListenerHandle, ListenerStats, Runtime, RuntimeConfig};
pub use subscriptions::{
    DropReason, StoreEvent, SubscriptionConfig, SubscriptionFilter, SubscriptionHandle,
    SubscriptionId, SubscriptionManager,
};
pub use triggers::{
    CounterTrigger, DispatchReport, FnTrigger, RewriteTrigger, Trigger, TriggerRegistry,
    TriggerResult,
};
pub use types::*;
