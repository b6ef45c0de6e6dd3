//! Transport-agnostic HTTP handlers.
//!
//! These produce a status code and JSON body; wiring them to an actual
//! server is left to the embedding process.

use crate::client::StoreClient;
use crate::error::StoreError;
use crate::fanout::FanOutAggregator;
use crate::types::DocPath;
use serde::Serialize;
use serde_json::json;

/// Status and JSON body of a handled request.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HttpResponse {
    pub status: u16,
    pub body: serde_json::Value,
}

impl HttpResponse {
    pub fn ok(body: serde_json::Value) -> Self {
        Self { status: 200, body }
    }

    /// Error response carrying the error's description.
    pub fn from_error(error: &StoreError) -> Self {
        let status = match error {
            StoreError::InvalidPath(_) => 400,
            _ => 500,
        };
        tracing::error!(status, error = %error, "request failed");
        Self {
            status,
            body: json!({ "error": error.to_string() }),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Fetch one document and return its fields.
pub fn get_document(client: &dyn StoreClient, raw_path: &str) -> HttpResponse {
    let path = match DocPath::parse(raw_path) {
        Ok(path) => path,
        Err(e) => return HttpResponse::from_error(&e),
    };

    match client.read(&path) {
        Ok(doc) => HttpResponse::ok(serde_json::Value::Object(doc.fields)),
        Err(e) => HttpResponse::from_error(&e),
    }
}

/// Resolve a parent's reference set and return the joined children.
pub fn get_aggregate(aggregator: &FanOutAggregator, raw_path: &str) -> HttpResponse {
    let path = match DocPath::parse(raw_path) {
        Ok(path) => path,
        Err(e) => return HttpResponse::from_error(&e),
    };

    match aggregator.aggregate(&path) {
        Ok(children) => HttpResponse::ok(serde_json::Value::Array(
            children.iter().map(|c| c.to_json()).collect(),
        )),
        Err(e) => HttpResponse::from_error(&e),
    }
}
