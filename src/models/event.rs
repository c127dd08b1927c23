//! Internal domain events carried by the event bus.
//!
//! Events are produced by other services (through `POST /api/v1/events`) or by
//! workflows, and consumed by in-process subscribers such as the realtime bridge.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Event type names understood by the default bridge mappings.
pub mod event_types {
    pub const CONTENT_CREATED: &str = "content.created";
    pub const CONTENT_UPDATED: &str = "content.updated";
    pub const CONTENT_DELETED: &str = "content.deleted";

    pub const ORDER_CREATED: &str = "order.created";
    pub const ORDER_PAID: &str = "order.paid";
    pub const ORDER_SHIPPED: &str = "order.shipped";

    pub const AI_JOB_COMPLETED: &str = "ai.job.completed";
    pub const AI_JOB_FAILED: &str = "ai.job.failed";

    pub const TX_CONFIRMED: &str = "web3.tx.confirmed";
    pub const NFT_MINTED: &str = "web3.nft.minted";

    /// Subscribing to this type receives every published event.
    pub const WILDCARD: &str = "*";
}

/// A domain event.
///
/// # JSON Example
///
/// ```json
/// {
///   "id": "550e8400-e29b-41d4-a716-446655440000",
///   "type": "order.paid",
///   "timestamp": "2025-01-15T10:30:00Z",
///   "source": "billing",
///   "tenantId": "42",
///   "data": { "orderId": "o-1", "userId": "u-7" }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: Uuid,

    #[serde(rename = "type")]
    pub event_type: String,

    pub timestamp: DateTime<Utc>,

    pub source: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,

    #[serde(default)]
    pub data: Map<String, Value>,
}

impl Event {
    /// Create an event with a fresh id and the current timestamp.
    pub fn new(event_type: impl Into<String>, data: Map<String, Value>) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type: event_type.into(),
            timestamp: Utc::now(),
            source: "unknown".to_string(),
            tenant_id: None,
            correlation_id: None,
            data,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    pub fn with_correlation(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Read a string field from the event data.
    ///
    /// Numbers are rendered as strings so ids sent as JSON numbers still resolve.
    pub fn data_str(&self, key: &str) -> Option<String> {
        match self.data.get(key)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// Request body for `POST /api/v1/events`.
#[derive(Debug, Deserialize)]
pub struct PublishEventRequest {
    #[serde(rename = "type")]
    pub event_type: String,

    #[serde(default)]
    pub data: Map<String, Value>,

    pub source: Option<String>,

    /// Falls back to the caller's tenant when omitted.
    pub tenant_id: Option<String>,

    pub correlation_id: Option<String>,
}

/// Response for an accepted event.
#[derive(Debug, Serialize)]
pub struct PublishEventResponse {
    pub id: Uuid,
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
}

impl From<&Event> for PublishEventResponse {
    fn from(event: &Event) -> Self {
        Self {
            id: event.id,
            event_type: event.event_type.clone(),
            timestamp: event.timestamp,
        }
    }
}

/// A bridged event type as listed by `GET /api/v1/events/mappings`.
#[derive(Debug, Serialize)]
pub struct EventMappingInfo {
    pub event_type: String,
    /// Handlers registered on the bus for this type, the bridge included.
    pub subscribers: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_event_defaults() {
        let event = Event::new("content.created", Map::new());

        assert_eq!(event.event_type, "content.created");
        assert_eq!(event.source, "unknown");
        assert!(event.tenant_id.is_none());
        assert!(event.correlation_id.is_none());
    }

    #[test]
    fn test_data_str_handles_numbers_and_blanks() {
        let data = json!({ "userId": 17, "title": "", "orderId": "o-1" });
        let event = Event::new("order.created", data.as_object().cloned().unwrap());

        assert_eq!(event.data_str("userId").as_deref(), Some("17"));
        assert_eq!(event.data_str("orderId").as_deref(), Some("o-1"));
        assert_eq!(event.data_str("title"), None);
        assert_eq!(event.data_str("missing"), None);
    }

    #[test]
    fn test_event_json_uses_camel_case() {
        let event = Event::new("order.paid", Map::new())
            .with_tenant("42")
            .with_source("billing");

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "order.paid");
        assert_eq!(value["tenantId"], "42");
        assert_eq!(value["source"], "billing");
        assert!(value.get("correlationId").is_none());
    }
}
