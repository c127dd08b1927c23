//! Realtime vendor payloads and API request/response types.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Realtime event names shared with the browser clients.
pub mod realtime_events {
    pub const NOTIFICATION: &str = "notification";
    pub const NOTIFICATION_URGENT: &str = "notification:urgent";

    // Collaboration
    pub const PRESENCE_JOIN: &str = "presence:join";
    pub const PRESENCE_LEAVE: &str = "presence:leave";
    pub const CURSOR_MOVE: &str = "cursor:move";
    pub const TYPING_START: &str = "typing:start";
    pub const TYPING_STOP: &str = "typing:stop";

    // Data sync
    pub const RECORD_CREATED: &str = "record:created";
    pub const RECORD_UPDATED: &str = "record:updated";
    pub const RECORD_DELETED: &str = "record:deleted";

    pub const SYSTEM_MAINTENANCE: &str = "system:maintenance";
    pub const SYSTEM_RELOAD: &str = "system:reload";

    pub const ALL: [&str; 12] = [
        NOTIFICATION,
        NOTIFICATION_URGENT,
        PRESENCE_JOIN,
        PRESENCE_LEAVE,
        CURSOR_MOVE,
        TYPING_START,
        TYPING_STOP,
        RECORD_CREATED,
        RECORD_UPDATED,
        RECORD_DELETED,
        SYSTEM_MAINTENANCE,
        SYSTEM_RELOAD,
    ];

    /// Whether browser clients have a built-in listener for `event`.
    pub fn is_client_event(event: &str) -> bool {
        ALL.contains(&event)
    }
}

/// One item of a batch trigger.
///
/// `data` is sent as a JSON-encoded string, which is what the vendor expects.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchEvent {
    pub channel: String,
    pub name: String,
    pub data: Map<String, Value>,
}

impl BatchEvent {
    pub fn new(channel: impl Into<String>, name: impl Into<String>, data: Map<String, Value>) -> Self {
        Self {
            channel: channel.into(),
            name: name.into(),
            data,
        }
    }
}

/// Member info attached to a presence channel subscription.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PresenceData {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_info: Option<Map<String, Value>>,
}

/// Signed authorization returned to the realtime client library.
///
/// # Example
///
/// ```json
/// { "auth": "278d425bdf160c739803:58df8b0c36d6982b82c3ecf6b4662e34fe8c25bba48f5369f135bf843651c3a4" }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChannelAuthResponse {
    pub auth: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_data: Option<String>,
}

/// Form body posted by the realtime client library to the auth endpoint.
#[derive(Debug, Deserialize)]
pub struct ChannelAuthRequest {
    #[serde(default)]
    pub socket_id: String,
    #[serde(default)]
    pub channel_name: String,
}

/// Request body for `POST /api/v1/realtime/notify`.
#[derive(Debug, Deserialize)]
pub struct NotifyUsersRequest {
    pub user_ids: Vec<String>,
    #[serde(default = "default_notify_event")]
    pub event: String,
    #[serde(default)]
    pub data: Map<String, Value>,
}

fn default_notify_event() -> String {
    realtime_events::NOTIFICATION.to_string()
}

/// Request body for `POST /api/v1/realtime/trigger`.
///
/// Exactly one target is set: a raw `channel`, a `tenant_id`, or a `user_id`.
#[derive(Debug, Deserialize)]
pub struct TriggerEventRequest {
    pub channel: Option<String>,
    pub tenant_id: Option<String>,
    pub user_id: Option<String>,
    pub event: String,
    #[serde(default)]
    pub data: Map<String, Value>,
}

/// Response for `POST /api/v1/realtime/notify`.
#[derive(Debug, Serialize)]
pub struct NotifyUsersResponse {
    pub recipients: usize,
    pub batches: usize,
}
