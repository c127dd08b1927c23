//! Realtime delivery through the hosted pub/sub vendor.
//!
//! This module handles:
//! - The `Broadcaster` seam used by the event bridge and notification helpers
//! - `PusherClient`, the signed HTTP client for the vendor's REST API
//! - Chunked notification of many users (vendor batch limit of 10)

use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use md5::Md5;
use serde_json::{Map, Value, json};
use sha2::{Digest, Sha256};

use crate::error::RealtimeError;
use crate::models::channel::{is_valid_channel_name, tenant_channel, user_channel};
use crate::models::realtime::BatchEvent;

type HmacSha256 = Hmac<Sha256>;

/// Most events the vendor accepts in one batch call.
pub const MAX_BATCH_SIZE: usize = 10;

const AUTH_VERSION: &str = "1.0";

/// Sends events to realtime channels.
#[async_trait]
pub trait Broadcaster: Send + Sync {
    /// Publish one event on one channel.
    async fn trigger(
        &self,
        channel: &str,
        event: &str,
        data: &Map<String, Value>,
    ) -> Result<(), RealtimeError>;

    /// Publish up to `MAX_BATCH_SIZE` events in one call.
    async fn trigger_batch(&self, events: &[BatchEvent]) -> Result<(), RealtimeError>;
}

/// Connection settings for the realtime vendor.
#[derive(Debug, Clone)]
pub struct PusherSettings {
    pub app_id: String,
    pub key: String,
    pub secret: String,
    pub cluster: String,
    /// Self-hosted server host; the vendor cluster host is used when unset.
    pub host: Option<String>,
    pub port: Option<u16>,
    pub use_tls: bool,
}

impl PusherSettings {
    pub fn from_config(config: &crate::config::Config) -> Self {
        Self {
            app_id: config.pusher_app_id.clone(),
            key: config.pusher_key.clone(),
            secret: config.pusher_secret.clone(),
            cluster: config.pusher_cluster.clone(),
            host: config.pusher_host.clone(),
            port: config.pusher_port,
            use_tls: config.pusher_use_tls,
        }
    }

    /// Base URL of the REST API, without a trailing slash.
    pub fn base_url(&self) -> String {
        let scheme = if self.use_tls { "https" } else { "http" };
        let host = self
            .host
            .clone()
            .unwrap_or_else(|| format!("api-{}.pusher.com", self.cluster));

        match self.port {
            Some(port) => format!("{}://{}:{}", scheme, host, port),
            None => format!("{}://{}", scheme, host),
        }
    }
}

/// Signed client for the vendor's HTTP API.
///
/// # Request Signing
///
/// Every request carries `auth_key`, `auth_timestamp`, `auth_version` and
/// `body_md5` query parameters plus
/// `auth_signature = hex(HMAC-SHA256(secret, "POST\n<path>\n<sorted query>"))`.
pub struct PusherClient {
    http: reqwest::Client,
    settings: PusherSettings,
    base_url: String,
}

impl PusherClient {
    /// Build the client. Requests time out after 5 seconds.
    pub fn new(settings: PusherSettings) -> Result<Self, RealtimeError> {
        let base_url = settings.base_url();
        Self::with_base_url(settings, base_url)
    }

    pub fn with_base_url(
        settings: PusherSettings,
        base_url: impl Into<String>,
    ) -> Result<Self, RealtimeError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;

        Ok(Self {
            http,
            settings,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// POST a signed JSON body to `/apps/{app_id}/{resource}`.
    async fn post_signed(&self, resource: &str, body: &Value) -> Result<(), RealtimeError> {
        let path = format!("/apps/{}/{}", self.settings.app_id, resource);
        let body = serde_json::to_string(body)?;
        let timestamp = chrono::Utc::now().timestamp();
        let query = signed_query(&self.settings, "POST", &path, &body, timestamp);

        let response = self
            .http
            .post(format!("{}{}?{}", self.base_url, path, query))
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RealtimeError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(())
    }
}

#[async_trait]
impl Broadcaster for PusherClient {
    async fn trigger(
        &self,
        channel: &str,
        event: &str,
        data: &Map<String, Value>,
    ) -> Result<(), RealtimeError> {
        if !is_valid_channel_name(channel) {
            return Err(RealtimeError::InvalidChannel(channel.to_string()));
        }

        let body = json!({
            "name": event,
            "channels": [channel],
            "data": serde_json::to_string(data)?,
        });

        self.post_signed("events", &body).await?;
        tracing::debug!(channel, event, "Triggered realtime event");
        Ok(())
    }

    async fn trigger_batch(&self, events: &[BatchEvent]) -> Result<(), RealtimeError> {
        if events.len() > MAX_BATCH_SIZE {
            return Err(RealtimeError::BatchTooLarge(events.len()));
        }
        if events.is_empty() {
            return Ok(());
        }

        let mut batch = Vec::with_capacity(events.len());
        for event in events {
            if !is_valid_channel_name(&event.channel) {
                return Err(RealtimeError::InvalidChannel(event.channel.clone()));
            }
            batch.push(json!({
                "channel": event.channel,
                "name": event.name,
                "data": serde_json::to_string(&event.data)?,
            }));
        }

        self.post_signed("batch_events", &json!({ "batch": batch }))
            .await?;
        tracing::debug!(count = events.len(), "Triggered realtime batch");
        Ok(())
    }
}

/// Build the signed query string for a request.
fn signed_query(
    settings: &PusherSettings,
    method: &str,
    path: &str,
    body: &str,
    timestamp: i64,
) -> String {
    let body_md5 = hex::encode(Md5::digest(body.as_bytes()));

    // Parameters must be sorted by key for signing; this order already is.
    let query = format!(
        "auth_key={}&auth_timestamp={}&auth_version={}&body_md5={}",
        settings.key, timestamp, AUTH_VERSION, body_md5
    );
    let to_sign = format!("{}\n{}\n{}", method, path, query);
    let signature = hmac_hex(&settings.secret, &to_sign);

    format!("{}&auth_signature={}", query, signature)
}

/// Hex encoded HMAC-SHA256 of `message` keyed with `secret`.
pub(crate) fn hmac_hex(secret: &str, message: &str) -> String {
    // HMAC accepts keys of any length.
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC key length is valid");
    mac.update(message.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Publish one event on one channel.
pub async fn trigger_event(
    broadcaster: &dyn Broadcaster,
    channel: &str,
    event: &str,
    data: &Map<String, Value>,
) -> Result<(), RealtimeError> {
    broadcaster.trigger(channel, event, data).await
}

/// Publish on a tenant's private channel.
pub async fn broadcast_to_tenant(
    broadcaster: &dyn Broadcaster,
    tenant_id: &str,
    event: &str,
    data: &Map<String, Value>,
) -> Result<(), RealtimeError> {
    broadcaster.trigger(&tenant_channel(tenant_id), event, data).await
}

/// Publish on a user's private channel.
pub async fn notify_user(
    broadcaster: &dyn Broadcaster,
    user_id: &str,
    event: &str,
    data: &Map<String, Value>,
) -> Result<(), RealtimeError> {
    broadcaster.trigger(&user_channel(user_id), event, data).await
}

/// Send the same event to many users' private channels.
///
/// Recipients are split into chunks of `MAX_BATCH_SIZE` sent one after
/// another, in order. The first failing chunk stops the loop; the error
/// reports how many recipients were already delivered. Returns the number
/// of batch calls made.
pub async fn notify_users(
    broadcaster: &dyn Broadcaster,
    user_ids: &[String],
    event: &str,
    data: &Map<String, Value>,
) -> Result<usize, RealtimeError> {
    let mut delivered = 0;
    let mut batches = 0;

    for chunk in user_ids.chunks(MAX_BATCH_SIZE) {
        let events: Vec<BatchEvent> = chunk
            .iter()
            .map(|user_id| BatchEvent::new(user_channel(user_id), event, data.clone()))
            .collect();

        if let Err(e) = broadcaster.trigger_batch(&events).await {
            tracing::error!(
                event,
                delivered,
                remaining = user_ids.len() - delivered,
                "Batch notification failed: {}",
                e
            );
            return Err(RealtimeError::PartialBatch {
                delivered,
                source: Box::new(e),
            });
        }

        delivered += chunk.len();
        batches += 1;
    }

    Ok(batches)
}
