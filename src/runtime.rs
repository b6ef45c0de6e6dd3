//! Process-wide wiring of the store client, components, and triggers.
//!
//! A [`Runtime`] is built once at process start. The client and publisher
//! are shared by every component and every invocation; nothing is
//! re-initialized per event or per request.

use crate::client::{Publisher, StoreClient};
use crate::counter::{CounterConfig, CounterManager};
use crate::error::{Result, StoreError};
use crate::fanout::{FanOutAggregator, FanOutConfig};
use crate::http::{self, HttpResponse};
use crate::notify::{ChangeNotifier, NotifyConfig};
use crate::pattern::PathPattern;
use crate::rewrite::{DerivedFieldRewriter, RewriteConfig};
use crate::subscriptions::{DropReason, StoreEvent, SubscriptionHandle, SubscriptionId};
use crate::triggers::{CounterTrigger, DispatchReport, RewriteTrigger, Trigger, TriggerRegistry};
use crate::types::ChangeEvent;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Runtime configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Documents counted by the counter trigger (None = no counter trigger).
    /// Default: "area/{areaId}/cities/{cityId}"
    pub counter_pattern: Option<PathPattern>,

    /// Documents rewritten by the rewrite trigger (None = no rewrite trigger).
    /// Default: "area/{areaId}/messages/{messageId}"
    pub rewrite_pattern: Option<PathPattern>,

    /// Publish notifications after rewrites.
    /// Default: true
    pub notify: bool,

    /// Listener threads per subscription.
    /// Default: 4
    pub workers: usize,

    /// Extra attempts a listener makes for an event whose triggers failed.
    /// Default: 3
    pub redeliveries: u32,

    pub fanout: FanOutConfig,
    pub counter: CounterConfig,
    pub rewrite: RewriteConfig,
    pub notifications: NotifyConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            counter_pattern: PathPattern::parse("area/{areaId}/cities/{cityId}").ok(),
            rewrite_pattern: PathPattern::parse("area/{areaId}/messages/{messageId}").ok(),
            notify: true,
            workers: 4,
            redeliveries: 3,
            fanout: FanOutConfig::default(),
            counter: CounterConfig::default(),
            rewrite: RewriteConfig::default(),
            notifications: NotifyConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Parse a JSON config; missing keys keep their defaults.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Load a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }
}

/// Shared components plus the trigger registry.
pub struct Runtime {
    client: Arc<dyn StoreClient>,
    aggregator: Arc<FanOutAggregator>,
    counter: Arc<CounterManager>,
    rewriter: Arc<DerivedFieldRewriter>,
    notifier: Arc<ChangeNotifier>,
    registry: Arc<RwLock<TriggerRegistry>>,
    config: RuntimeConfig,
}

impl Runtime {
    /// Build every component around one shared client and publisher and
    /// register the configured triggers.
    pub fn new(
        client: Arc<dyn StoreClient>,
        publisher: Arc<dyn Publisher>,
        config: RuntimeConfig,
    ) -> Self {
        let aggregator = Arc::new(FanOutAggregator::new(
            Arc::clone(&client),
            config.fanout.clone(),
        ));
        let counter = Arc::new(CounterManager::new(
            Arc::clone(&client),
            config.counter.clone(),
        ));
        let rewriter = Arc::new(DerivedFieldRewriter::new(
            Arc::clone(&client),
            config.rewrite.clone(),
        ));
        let notifier = Arc::new(ChangeNotifier::new(publisher, config.notifications.clone()));

        let mut registry = TriggerRegistry::new();
        if let Some(ref pattern) = config.counter_pattern {
            registry.register(Arc::new(CounterTrigger::new(
                "count",
                pattern.clone(),
                Arc::clone(&counter),
            )));
        }
        if let Some(ref pattern) = config.rewrite_pattern {
            let mut trigger =
                RewriteTrigger::new("rewrite", pattern.clone(), Arc::clone(&rewriter));
            if config.notify {
                trigger = trigger.with_notifier(Arc::clone(&notifier));
            }
            registry.register(Arc::new(trigger));
        }

        tracing::info!(triggers = registry.len(), "runtime initialized");

        Self {
            client,
            aggregator,
            counter,
            rewriter,
            notifier,
            registry: Arc::new(RwLock::new(registry)),
            config,
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn client(&self) -> &Arc<dyn StoreClient> {
        &self.client
    }

    pub fn aggregator(&self) -> &Arc<FanOutAggregator> {
        &self.aggregator
    }

    pub fn counter(&self) -> &Arc<CounterManager> {
        &self.counter
    }

    pub fn rewriter(&self) -> &Arc<DerivedFieldRewriter> {
        &self.rewriter
    }

    pub fn notifier(&self) -> &Arc<ChangeNotifier> {
        &self.notifier
    }

    /// Add a trigger alongside the configured ones.
    pub fn register(&self, trigger: Arc<dyn Trigger>) {
        self.registry.write().register(trigger);
    }

    /// Run all matching triggers for one event.
    pub fn dispatch(&self, event: &ChangeEvent) -> DispatchReport {
        self.registry.read().dispatch(event)
    }

    /// Run all matching triggers for one event; the first failure
    /// propagates.
    pub fn handle_event(&self, event: &ChangeEvent) -> Result<()> {
        self.dispatch(event).into_result()
    }

    // --- HTTP ---

    pub fn get_document(&self, path: &str) -> HttpResponse {
        http::get_document(&*self.client, path)
    }

    pub fn get_aggregate(&self, path: &str) -> HttpResponse {
        http::get_aggregate(&self.aggregator, path)
    }

    // --- Listening ---

    /// Consume `handle` on `config.workers` threads until the subscription
    /// is closed. Triggers that fail an event transiently get it again, up
    /// to `config.redeliveries` more times; triggers that succeeded are not
    /// re-run.
    pub fn spawn_listener(&self, handle: SubscriptionHandle) -> ListenerHandle {
        let stats = Arc::new(ListenerStats::default());
        let workers = (0..self.config.workers.max(1))
            .map(|worker| {
                let receiver = handle.receiver.clone();
                let registry = Arc::clone(&self.registry);
                let stats = Arc::clone(&stats);
                let redeliveries = self.config.redeliveries;

                std::thread::spawn(move || {
                    for message in receiver.iter() {
                        let event = match message {
                            StoreEvent::Change { event } => event,
                            StoreEvent::Dropped { reason } => {
                                tracing::debug!(worker, ?reason, "subscription closed");
                                break;
                            }
                        };
                        deliver(&registry, &event, redeliveries, &stats);
                    }
                })
            })
            .collect();

        ListenerHandle {
            id: handle.id,
            closed: handle.closed(),
            workers,
            stats,
        }
    }
}

fn deliver(
    registry: &RwLock<TriggerRegistry>,
    event: &ChangeEvent,
    redeliveries: u32,
    stats: &ListenerStats,
) {
    let mut report = registry.read().dispatch(event);
    let mut failed = false;

    for attempt in 1..=redeliveries + 1 {
        let retry = report.transient_failures();
        for (trigger, e) in report.failures() {
            if attempt > redeliveries || !e.is_transient() {
                tracing::error!(event_id = %event.id, path = %event.path, trigger, error = %e, "event failed");
                failed = true;
            }
        }
        if retry.is_empty() || attempt > redeliveries {
            break;
        }

        tracing::debug!(event_id = %event.id, attempt, triggers = ?retry, "redelivering event");
        report = registry.read().dispatch_to(event, &retry);
    }

    if failed {
        stats.failed.fetch_add(1, Ordering::SeqCst);
    } else {
        stats.processed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Counters shared by a listener's workers.
#[derive(Debug, Default)]
pub struct ListenerStats {
    processed: AtomicU64,
    failed: AtomicU64,
}

impl ListenerStats {
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::SeqCst)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::SeqCst)
    }
}

/// Running listener.
pub struct ListenerHandle {
    id: SubscriptionId,
    closed: Arc<Mutex<Option<DropReason>>>,
    workers: Vec<JoinHandle<()>>,
    stats: Arc<ListenerStats>,
}

impl ListenerHandle {
    pub fn subscription_id(&self) -> SubscriptionId {
        self.id
    }

    pub fn stats(&self) -> &ListenerStats {
        &self.stats
    }

    /// Why the store stopped delivering to this listener, if it has.
    pub fn drop_reason(&self) -> Option<DropReason> {
        self.closed.lock().clone()
    }

    /// Wait for the workers to exit. They exit once the subscription is
    /// unsubscribed or dropped and the buffered events are drained.
    ///
    /// # Errors
    ///
    /// `SubscriptionDropped` if the store evicted the subscription (buffer
    /// overflow or disconnect). Changes after the eviction were not handled.
    pub fn join(self) -> Result<()> {
        for worker in self.workers {
            worker
                .join()
                .map_err(|_| StoreError::Delivery("listener worker panicked".to_string()))?;
        }

        match self.closed.lock().clone() {
            None | Some(DropReason::Unsubscribed) => Ok(()),
            Some(reason) => {
                tracing::error!(
                    subscription = self.id.0,
                    ?reason,
                    processed = self.stats.processed(),
                    "listener lost its subscription, later changes were not handled"
                );
                Err(StoreError::SubscriptionDropped(reason))
            }
        }
    }
}
