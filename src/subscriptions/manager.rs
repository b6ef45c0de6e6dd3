//! Subscription manager for broadcasting change events.

use crate::types::ChangeEvent;
use crossbeam_channel::{bounded, Sender};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::types::{
    DropReason, StoreEvent, SubscriptionConfig, SubscriptionHandle, SubscriptionId,
};

/// Internal subscription state.
struct Subscription {
    config: SubscriptionConfig,
    sender: Sender<StoreEvent>,
    closed: Arc<Mutex<Option<DropReason>>>,
}

/// Outcome of a single send.
enum SendOutcome {
    Sent,
    Skipped,
    Full,
    Disconnected,
}

impl Subscription {
    /// Record `reason` and tell the receiver, if there is room.
    fn close(self, reason: DropReason) {
        *self.closed.lock() = Some(reason.clone());
        let _ = self.sender.try_send(StoreEvent::Dropped { reason });
    }

    /// Filter `event`, bind params, and try to send it.
    fn offer(&self, event: &ChangeEvent) -> SendOutcome {
        let params = match self.config.filter.accept(event.kind, &event.path) {
            Some(params) => params,
            None => return SendOutcome::Skipped,
        };

        let event = event.clone().with_params(params);
        match self.sender.try_send(StoreEvent::Change { event }) {
            Ok(()) => SendOutcome::Sent,
            Err(crossbeam_channel::TrySendError::Full(_)) => SendOutcome::Full,
            Err(crossbeam_channel::TrySendError::Disconnected(_)) => SendOutcome::Disconnected,
        }
    }
}

/// Manages subscriptions and broadcasts events.
pub struct SubscriptionManager {
    /// Active subscriptions by ID.
    subscriptions: RwLock<HashMap<SubscriptionId, Subscription>>,
    /// Counter for generating subscription IDs.
    next_id: AtomicU64,
}

impl SubscriptionManager {
    /// Create a new subscription manager.
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Create a new subscription. Only events broadcast after this call are
    /// delivered.
    pub fn subscribe(&self, config: SubscriptionConfig) -> SubscriptionHandle {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (sender, receiver) = bounded(config.buffer_size.max(1));
        let closed = Arc::new(Mutex::new(None));

        self.subscriptions.write().insert(
            id,
            Subscription {
                config,
                sender,
                closed: Arc::clone(&closed),
            },
        );

        SubscriptionHandle {
            id,
            receiver,
            closed,
        }
    }

    /// Unsubscribe and clean up.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut subs = self.subscriptions.write();
        if let Some(sub) = subs.remove(&id) {
            sub.close(DropReason::Unsubscribed);
        }
    }

    /// Get subscription count.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    // --- Broadcasting ---

    /// Broadcast a change to matching subscriptions. Drops subscribers that
    /// fail to receive.
    pub fn broadcast_change(&self, event: &ChangeEvent) {
        let mut to_remove = Vec::new();

        {
            let subs = self.subscriptions.read();
            for (id, sub) in subs.iter() {
                match sub.offer(event) {
                    SendOutcome::Sent | SendOutcome::Skipped => {}
                    SendOutcome::Full => to_remove.push((*id, DropReason::BufferOverflow)),
                    SendOutcome::Disconnected => {
                        to_remove.push((*id, DropReason::Disconnected))
                    }
                }
            }
        }

        // Remove dropped subscriptions
        if !to_remove.is_empty() {
            let mut subs = self.subscriptions.write();
            for (id, reason) in to_remove {
                if let Some(sub) = subs.remove(&id) {
                    tracing::warn!(subscription = id.0, ?reason, "dropping subscriber");
                    sub.close(reason);
                }
            }
        }
    }

    /// Deliver `event` again. Consumers see it as a duplicate with the same
    /// event id.
    pub fn redeliver(&self, event: &ChangeEvent) {
        tracing::debug!(event_id = %event.id, path = %event.path, "redelivering event");
        self.broadcast_change(event);
    }
}

impl Default for SubscriptionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::PathPattern;
    use crate::subscriptions::SubscriptionFilter;
    use crate::types::{ChangeKind, DocPath, Document, Fields, Timestamp};
    use std::time::Duration;

    fn make_event(path: &str) -> ChangeEvent {
        ChangeEvent::create(Document {
            path: DocPath::parse(path).unwrap(),
            fields: Fields::new(),
            version: 1,
            update_time: Timestamp::now(),
        })
    }

    fn city_filter() -> SubscriptionFilter {
        SubscriptionFilter::pattern(PathPattern::parse("area/{areaId}/cities/{cityId}").unwrap())
    }

    #[test]
    fn test_subscribe_unsubscribe() {
        let manager = SubscriptionManager::new();

        let handle = manager.subscribe(SubscriptionConfig::default());
        assert_eq!(manager.subscription_count(), 1);

        manager.unsubscribe(handle.id);
        assert_eq!(manager.subscription_count(), 0);

        let event = handle.recv_timeout(Duration::from_millis(100)).unwrap();
        assert!(matches!(
            event,
            StoreEvent::Dropped {
                reason: DropReason::Unsubscribed
            }
        ));
    }

    #[test]
    fn test_broadcast_binds_params() {
        let manager = SubscriptionManager::new();
        let handle = manager.subscribe(SubscriptionConfig {
            filter: city_filter(),
            ..Default::default()
        });

        manager.broadcast_change(&make_event("area/north/cities/boston"));

        match handle.recv_timeout(Duration::from_millis(100)).unwrap() {
            StoreEvent::Change { event } => {
                assert_eq!(event.param("areaId"), Some("north"));
                assert_eq!(event.param("cityId"), Some("boston"));
            }
            other => panic!("Expected Change event, got {:?}", other),
        }
    }

    #[test]
    fn test_broadcast_filters_non_matching() {
        let manager = SubscriptionManager::new();
        let handle = manager.subscribe(SubscriptionConfig {
            filter: city_filter().with_kinds(vec![ChangeKind::Delete]),
            ..Default::default()
        });

        manager.broadcast_change(&make_event("area/north/towns/salem"));
        // Right path, wrong kind
        manager.broadcast_change(&make_event("area/north/cities/boston"));

        let result = handle.recv_timeout(Duration::from_millis(50));
        assert!(result.is_err());
    }

    #[test]
    fn test_drop_slow_subscriber() {
        let manager = SubscriptionManager::new();
        let handle = manager.subscribe(SubscriptionConfig {
            buffer_size: 2,
            ..Default::default()
        });

        for i in 0..10 {
            manager.broadcast_change(&make_event(&format!("cities/c{}", i)));
        }

        assert_eq!(manager.subscription_count(), 0);
        // The buffer was full, so only the reason records the drop.
        assert_eq!(handle.drop_reason(), Some(DropReason::BufferOverflow));
        assert_eq!(handle.receiver.iter().count(), 2);
    }

    #[test]
    fn test_drop_disconnected_subscriber() {
        let manager = SubscriptionManager::new();
        let handle = manager.subscribe(SubscriptionConfig::default());
        drop(handle);

        manager.broadcast_change(&make_event("cities/boston"));
        assert_eq!(manager.subscription_count(), 0);
    }

    #[test]
    fn test_redeliver_keeps_event_id() {
        let manager = SubscriptionManager::new();
        let handle = manager.subscribe(SubscriptionConfig::default());
        let event = make_event("cities/boston");

        manager.broadcast_change(&event);
        manager.redeliver(&event);

        let ids: Vec<String> = handle
            .receiver
            .try_iter()
            .filter_map(|e| match e {
                StoreEvent::Change { event } => Some(event.id),
                _ => None,
            })
            .collect();
        assert_eq!(ids, vec![event.id.clone(), event.id]);
    }
}
