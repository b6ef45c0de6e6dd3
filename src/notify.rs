//! Best-effort change notifications.
//!
//! Notifications are derived from a freshly written document and handed to
//! a [`Publisher`]. They never affect data correctness, so a failed publish
//! is logged and swallowed here. There is no retry.

use crate::client::Publisher;
use crate::types::{Document, Fields, PathParams};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

/// Notification settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Topic template; `{name}` is replaced by the event's path param.
    /// Default: "changes"
    pub topic: String,

    /// Fields copied into the payload (None = all fields).
    pub payload_fields: Option<Vec<String>>,

    /// Also notify after update-path rewrites, not only creates.
    /// Default: false
    pub on_update: bool,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            topic: "changes".to_string(),
            payload_fields: None,
            on_update: false,
        }
    }
}

/// Whether a notification left this process.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeliveryStatus {
    Delivered,
    /// Publish failed; the reason was logged.
    Dropped(String),
}

/// Publishes notifications for written documents.
pub struct ChangeNotifier {
    publisher: Arc<dyn Publisher>,
    config: NotifyConfig,
}

impl ChangeNotifier {
    pub fn new(publisher: Arc<dyn Publisher>, config: NotifyConfig) -> Self {
        Self { publisher, config }
    }

    pub fn config(&self) -> &NotifyConfig {
        &self.config
    }

    /// Publish `payload` to `topic`. Failures are logged, never returned.
    pub fn notify(&self, topic: &str, payload: &serde_json::Value) -> DeliveryStatus {
        match self.publisher.publish(topic, payload) {
            Ok(()) => {
                tracing::debug!(topic, "notification delivered");
                DeliveryStatus::Delivered
            }
            Err(e) => {
                tracing::warn!(topic, error = %e, "notification dropped");
                DeliveryStatus::Dropped(e.to_string())
            }
        }
    }

    /// Build and publish the notification for a written document.
    /// `before` is the previous snapshot on the update path.
    pub fn notify_written(
        &self,
        params: &PathParams,
        written: &Document,
        before: Option<&Document>,
    ) -> DeliveryStatus {
        let topic = render_topic(&self.config.topic, params);
        let payload = self.payload(written, before);
        self.notify(&topic, &payload)
    }

    /// Payload for a written document: its path, the selected fields, and
    /// on the update path the names of fields that changed.
    pub fn payload(&self, written: &Document, before: Option<&Document>) -> serde_json::Value {
        let data: Fields = match self.config.payload_fields {
            Some(ref names) => names
                .iter()
                .filter_map(|n| written.get(n).map(|v| (n.clone(), v.clone())))
                .collect(),
            None => written.fields.clone(),
        };

        let mut payload = json!({
            "path": written.path.to_string(),
            "id": written.path.key(),
            "data": data,
        });
        if let Some(before) = before {
            payload["changed"] = json!(changed_fields(before, written));
        }
        payload
    }
}

/// Names of fields added, removed, or modified between two snapshots, in
/// `after` order followed by removals.
pub fn changed_fields(before: &Document, after: &Document) -> Vec<String> {
    let mut changed: Vec<String> = after
        .fields
        .iter()
        .filter(|(k, v)| before.get(k) != Some(*v))
        .map(|(k, _)| k.clone())
        .collect();
    changed.extend(
        before
            .fields
            .keys()
            .filter(|k| !after.fields.contains_key(*k))
            .cloned(),
    );
    changed
}

/// Replace each `{name}` with `params[name]`. Unknown names stay as-is.
fn render_topic(template: &str, params: &PathParams) -> String {
    params.iter().fold(template.to_string(), |topic, (name, value)| {
        topic.replace(&format!("{{{}}}", name), value)
    })
}
