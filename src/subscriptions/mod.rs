//! Subscription system for live change events.
//!
//! Every mutation accepted by a store is fanned out to subscribers as a
//! [`ChangeEvent`](crate::types::ChangeEvent). Subscriptions support:
//! - Filtering by path pattern (wildcards are bound into the event's params)
//! - Filtering by change kind
//! - Bounded buffers with slow-subscriber dropping
//!
//! Delivery is at-least-once: [`SubscriptionManager::redeliver`] re-sends
//! an event that a consumer failed to process.
//!
//! # Example
//!
//! ```ignore
//! let manager = SubscriptionManager::new();
//!
//! let config = SubscriptionConfig {
//!     filter: SubscriptionFilter::pattern(PathPattern::parse("area/{areaId}/cities/{cityId}")?),
//!     ..Default::default()
//! };
//! let handle = manager.subscribe(config);
//!
//! loop {
//!     match handle.recv() {
//!         Ok(StoreEvent::Change { event }) => println!("{} {}", event.kind, event.path),
//!         Ok(StoreEvent::Dropped { .. }) | Err(_) => break,
//!     }
//! }
//! ```

mod manager;
mod types;

pub use manager::SubscriptionManager;
pub use types::{
    DropReason, StoreEvent, SubscriptionConfig, SubscriptionFilter, SubscriptionHandle,
    SubscriptionId,
};
