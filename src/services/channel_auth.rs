//! Private and presence channel authorization.
//!
//! The realtime client library posts `socket_id` and `channel_name` to our
//! auth endpoint before joining a private channel. We check the caller may
//! see the channel, then sign `"{socket_id}:{channel}"` with the app secret.

use crate::error::RealtimeError;
use crate::models::channel::{ChannelKind, is_valid_channel_name, is_valid_socket_id};
use crate::models::realtime::{ChannelAuthResponse, PresenceData};
use crate::services::realtime_service::{PusherSettings, hmac_hex};

/// Identity of the caller, as forwarded by the API gateway.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelUser {
    pub id: String,
    pub tenant_id: Option<String>,
    pub name: Option<String>,
}

impl ChannelUser {
    /// Member info sent along with presence subscriptions.
    pub fn presence_data(&self) -> PresenceData {
        let user_info = self.name.as_ref().map(|name| {
            let mut info = serde_json::Map::new();
            info.insert("name".to_string(), serde_json::Value::String(name.clone()));
            info
        });
        PresenceData {
            user_id: self.id.clone(),
            user_info,
        }
    }
}

/// Check whether `user` may join `channel`.
///
/// Tenant channels need a matching tenant, user channels a matching user id.
/// Presence and other channels are open to any authenticated user. The error
/// is the reason reported to the client.
pub fn validate_channel_access(user: &ChannelUser, channel: &str) -> Result<(), String> {
    match ChannelKind::parse(channel) {
        ChannelKind::Tenant(tenant_id) => {
            if user.tenant_id.as_deref() == Some(tenant_id.as_str()) {
                Ok(())
            } else {
                Err("User not in tenant".to_string())
            }
        }
        ChannelKind::User(user_id) => {
            if user.id == user_id {
                Ok(())
            } else {
                Err("Not channel owner".to_string())
            }
        }
        _ => Ok(()),
    }
}

/// Signs channel subscriptions with the app key and secret.
#[derive(Clone)]
pub struct ChannelAuthorizer {
    key: String,
    secret: String,
}

impl std::fmt::Debug for ChannelAuthorizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelAuthorizer")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl ChannelAuthorizer {
    pub fn new(key: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            secret: secret.into(),
        }
    }

    pub fn from_settings(settings: &PusherSettings) -> Self {
        Self::new(settings.key.clone(), settings.secret.clone())
    }

    /// Sign a subscription.
    ///
    /// Presence channels sign the serialized member info too and return it as
    /// `channel_data`; `presence` is ignored for other channels.
    pub fn authorize(
        &self,
        socket_id: &str,
        channel: &str,
        presence: Option<PresenceData>,
    ) -> Result<ChannelAuthResponse, RealtimeError> {
        if !is_valid_socket_id(socket_id) {
            return Err(RealtimeError::InvalidSocketId(socket_id.to_string()));
        }
        if !is_valid_channel_name(channel) {
            return Err(RealtimeError::InvalidChannel(channel.to_string()));
        }

        let channel_data = match (ChannelKind::parse(channel), presence) {
            (ChannelKind::Presence(_), Some(data)) => Some(serde_json::to_string(&data)?),
            _ => None,
        };

        let to_sign = match channel_data {
            Some(ref data) => format!("{}:{}:{}", socket_id, channel, data),
            None => format!("{}:{}", socket_id, channel),
        };

        Ok(ChannelAuthResponse {
            auth: format!("{}:{}", self.key, hmac_hex(&self.secret, &to_sign)),
            channel_data,
        })
    }
}
