//! Subscription types for live change delivery.

use crate::pattern::PathPattern;
use crate::types::{ChangeEvent, ChangeKind, DocPath, PathParams};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Configuration for a subscription.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionConfig {
    /// Max buffered events before dropping subscriber.
    /// Default: 1000
    pub buffer_size: usize,

    /// Filter criteria.
    pub filter: SubscriptionFilter,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            buffer_size: 1000,
            filter: SubscriptionFilter::all(),
        }
    }
}

/// Filter criteria for subscriptions.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionFilter {
    /// Only paths matching this pattern (None = every path).
    pub pattern: Option<PathPattern>,

    /// Only these change kinds (None = all kinds).
    pub kinds: Option<Vec<ChangeKind>>,
}

impl SubscriptionFilter {
    /// Subscribe to everything.
    pub fn all() -> Self {
        Self::default()
    }

    /// Subscribe to paths matching `pattern`.
    pub fn pattern(pattern: PathPattern) -> Self {
        Self {
            pattern: Some(pattern),
            kinds: None,
        }
    }

    /// Restrict to the given change kinds.
    pub fn with_kinds(mut self, kinds: Vec<ChangeKind>) -> Self {
        self.kinds = Some(kinds);
        self
    }

    /// Bound params if `event` passes the filter, `None` otherwise.
    pub fn accept(&self, kind: ChangeKind, path: &DocPath) -> Option<PathParams> {
        if let Some(ref kinds) = self.kinds {
            if !kinds.contains(&kind) {
                return None;
            }
        }

        match self.pattern {
            Some(ref pattern) => pattern.matches(path),
            None => Some(PathParams::new()),
        }
    }
}

/// Events emitted by subscriptions.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreEvent {
    /// A document was created, updated, or deleted.
    Change { event: ChangeEvent },

    /// Subscription was dropped.
    Dropped { reason: DropReason },
}

/// Why a subscription was dropped.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Send buffer overflowed (slow consumer).
    BufferOverflow,
    /// Receiver went away.
    Disconnected,
    /// Explicitly unsubscribed.
    Unsubscribed,
}

/// Unique identifier for a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Handle to manage a subscription.
pub struct SubscriptionHandle {
    pub id: SubscriptionId,
    /// Channel to receive events.
    pub receiver: crossbeam_channel::Receiver<StoreEvent>,
    /// Set by the manager when it removes the subscription. Survives a
    /// `Dropped` notice that did not fit into a full buffer.
    pub(crate) closed: Arc<Mutex<Option<DropReason>>>,
}

impl SubscriptionHandle {
    /// Why the manager stopped delivering, once it has.
    pub fn drop_reason(&self) -> Option<DropReason> {
        self.closed.lock().clone()
    }

    /// Shared view of the drop reason, for consumers that outlive the
    /// handle.
    pub(crate) fn closed(&self) -> Arc<Mutex<Option<DropReason>>> {
        Arc::clone(&self.closed)
    }

    /// Receive the next event (blocking).
    pub fn recv(&self) -> Result<StoreEvent, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> Result<StoreEvent, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> Result<StoreEvent, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}
