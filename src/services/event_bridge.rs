//! Event bus → realtime bridge.
//!
//! Subscribes to domain events on the bus and forwards them to realtime
//! channels so connected browsers update live.
//!
//! # Mapping Table
//!
//! The bridge is built from an immutable `EventMappings` snapshot. Each entry
//! maps an event type to:
//! - the realtime event name clients listen for
//! - a function deriving the target channels from the event
//! - an optional transform producing the public payload
//!
//! Mappings can be added or removed at runtime through `BridgeHandle`, which
//! sends a command to the bridge task. The call returns once the
//! subscription change is applied, so it covers every event published after.
//!
//! # Delivery
//!
//! Every derived channel is sent to concurrently and each send settles on its
//! own: one failing channel is logged and does not hide or cancel the others.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use serde::Serialize;
use serde_json::{Map, Value, json};
use tokio::sync::{mpsc, oneshot};

use crate::models::channel::{tenant_channel, user_channel};
use crate::models::event::{Event, event_types};
use crate::models::realtime::realtime_events;
use crate::services::event_bus::{EventBus, EventHandler, Subscription};
use crate::services::realtime_service::Broadcaster;

/// Name the bridge registers its handlers under on the bus.
pub const SUBSCRIBER: &str = "realtime-bridge";

type ChannelFn = Arc<dyn Fn(&Event) -> Vec<String> + Send + Sync>;
type TransformFn = Arc<dyn Fn(&Event) -> Map<String, Value> + Send + Sync>;

/// How one event type is broadcast.
#[derive(Clone)]
pub struct BroadcastRule {
    pub realtime_event: String,
    channels: ChannelFn,
    transform: Option<TransformFn>,
}

impl fmt::Debug for BroadcastRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BroadcastRule")
            .field("realtime_event", &self.realtime_event)
            .field("has_transform", &self.transform.is_some())
            .finish()
    }
}

impl BroadcastRule {
    pub fn new<F>(realtime_event: impl Into<String>, channels: F) -> Self
    where
        F: Fn(&Event) -> Vec<String> + Send + Sync + 'static,
    {
        Self {
            realtime_event: realtime_event.into(),
            channels: Arc::new(channels),
            transform: None,
        }
    }

    pub fn with_transform<F>(mut self, transform: F) -> Self
    where
        F: Fn(&Event) -> Map<String, Value> + Send + Sync + 'static,
    {
        self.transform = Some(Arc::new(transform));
        self
    }

    pub fn channels_for(&self, event: &Event) -> Vec<String> {
        (self.channels)(event)
    }

    /// Public payload: the transform's output (or the raw data) plus
    /// `eventId` and `timestamp`.
    pub fn payload_for(&self, event: &Event) -> Map<String, Value> {
        let mut payload = match self.transform {
            Some(ref transform) => transform(event),
            None => event.data.clone(),
        };
        payload.insert("eventId".to_string(), json!(event.id.to_string()));
        payload.insert("timestamp".to_string(), json!(event.timestamp.to_rfc3339()));
        payload
    }
}

/// The tenant channel, when the event has a tenant.
pub fn tenant_channels(event: &Event) -> Vec<String> {
    event
        .tenant_id
        .as_deref()
        .filter(|id| !id.is_empty())
        .map(tenant_channel)
        .into_iter()
        .collect()
}

/// The channel of `data.userId`, when present.
pub fn user_channels(event: &Event) -> Vec<String> {
    event
        .data_str("userId")
        .map(|id| user_channel(&id))
        .into_iter()
        .collect()
}

/// User channel first, then tenant channel.
pub fn user_and_tenant_channels(event: &Event) -> Vec<String> {
    let mut channels = user_channels(event);
    channels.extend(tenant_channels(event));
    channels
}

/// Build a JSON object from `(public key, data key)` pairs.
///
/// Fields absent from the event data are left out.
fn pick(event: &Event, fields: &[(&str, &str)]) -> Map<String, Value> {
    fields
        .iter()
        .filter_map(|(out, key)| {
            event
                .data
                .get(*key)
                .map(|value| (out.to_string(), value.clone()))
        })
        .collect()
}

/// Immutable snapshot of the event type → rule table.
#[derive(Clone, Default, Debug)]
pub struct EventMappings {
    rules: HashMap<String, BroadcastRule>,
}

impl EventMappings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, event_type: impl Into<String>, rule: BroadcastRule) -> Self {
        self.rules.insert(event_type.into(), rule);
        self
    }

    pub fn get(&self, event_type: &str) -> Option<&BroadcastRule> {
        self.rules.get(event_type)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn event_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.rules.keys().cloned().collect();
        types.sort();
        types
    }

    /// Content, order, AI job, and web3 events.
    pub fn defaults() -> Self {
        Self::new()
            .with(
                event_types::CONTENT_CREATED,
                BroadcastRule::new(realtime_events::RECORD_CREATED, tenant_channels)
                    .with_transform(|e| {
                        let mut out = pick(e, &[("id", "contentId"), ("title", "title"), ("createdBy", "userId")]);
                        out.insert("type".to_string(), json!("content"));
                        out
                    }),
            )
            .with(
                event_types::CONTENT_UPDATED,
                BroadcastRule::new(realtime_events::RECORD_UPDATED, tenant_channels)
                    .with_transform(|e| {
                        let mut out = pick(e, &[("id", "contentId"), ("updatedBy", "userId")]);
                        out.insert("type".to_string(), json!("content"));
                        out
                    }),
            )
            .with(
                event_types::CONTENT_DELETED,
                BroadcastRule::new(realtime_events::RECORD_DELETED, tenant_channels)
                    .with_transform(|e| {
                        let mut out = pick(e, &[("id", "contentId")]);
                        out.insert("type".to_string(), json!("content"));
                        out
                    }),
            )
            .with(
                event_types::ORDER_CREATED,
                BroadcastRule::new("order:created", user_and_tenant_channels).with_transform(|e| {
                    let mut out = pick(e, &[("orderId", "orderId"), ("total", "total")]);
                    out.insert("status".to_string(), json!("created"));
                    out
                }),
            )
            .with(
                event_types::ORDER_PAID,
                BroadcastRule::new("order:paid", user_and_tenant_channels).with_transform(|e| {
                    let mut out = pick(e, &[("orderId", "orderId")]);
                    out.insert("status".to_string(), json!("paid"));
                    out
                }),
            )
            .with(
                event_types::ORDER_SHIPPED,
                BroadcastRule::new("order:shipped", user_channels).with_transform(|e| {
                    let mut out = pick(e, &[("orderId", "orderId"), ("trackingNumber", "trackingNumber")]);
                    out.insert("status".to_string(), json!("shipped"));
                    out
                }),
            )
            .with(
                event_types::AI_JOB_COMPLETED,
                BroadcastRule::new("ai:completed", user_channels).with_transform(|e| {
                    pick(e, &[("jobId", "jobId"), ("jobType", "jobType"), ("result", "result")])
                }),
            )
            .with(
                event_types::AI_JOB_FAILED,
                BroadcastRule::new("ai:failed", user_channels).with_transform(|e| {
                    pick(e, &[("jobId", "jobId"), ("jobType", "jobType"), ("error", "error")])
                }),
            )
            .with(
                event_types::TX_CONFIRMED,
                BroadcastRule::new("web3:tx:confirmed", user_channels)
                    .with_transform(|e| pick(e, &[("txHash", "txHash"), ("chain", "chain")])),
            )
            .with(
                event_types::NFT_MINTED,
                BroadcastRule::new("web3:nft:minted", user_channels).with_transform(|e| {
                    pick(
                        e,
                        &[
                            ("tokenId", "tokenId"),
                            ("contractAddress", "contractAddress"),
                            ("txHash", "txHash"),
                        ],
                    )
                }),
            )
    }
}

/// Result of broadcasting one event.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BroadcastReport {
    pub event_type: String,
    pub realtime_event: String,
    pub delivered: usize,
    /// Channels whose send failed.
    pub failed: Vec<String>,
}

/// Forward one event according to `rule`.
///
/// No derivable channel means nothing is sent.
pub async fn broadcast_event(
    broadcaster: &dyn Broadcaster,
    rule: &BroadcastRule,
    event: &Event,
) -> BroadcastReport {
    let channels = rule.channels_for(event);
    let mut report = BroadcastReport {
        event_type: event.event_type.clone(),
        realtime_event: rule.realtime_event.clone(),
        delivered: 0,
        failed: Vec::new(),
    };

    if channels.is_empty() {
        tracing::debug!(event_type = %event.event_type, "No target channels, skipping");
        return report;
    }

    let payload = rule.payload_for(event);
    let results = join_all(
        channels
            .iter()
            .map(|channel| broadcaster.trigger(channel, &rule.realtime_event, &payload)),
    )
    .await;

    for (channel, result) in channels.into_iter().zip(results) {
        match result {
            Ok(()) => report.delivered += 1,
            Err(e) => {
                tracing::error!(
                    event_type = %event.event_type,
                    event_id = %event.id,
                    channel = %channel,
                    "Failed to broadcast: {}",
                    e
                );
                report.failed.push(channel);
            }
        }
    }

    tracing::info!(
        "Broadcasted {} → {} to {} channel(s), {} failed",
        report.event_type,
        report.realtime_event,
        report.delivered,
        report.failed.len()
    );

    report
}

struct BridgeHandler {
    rule: BroadcastRule,
    broadcaster: Arc<dyn Broadcaster>,
}

#[async_trait]
impl EventHandler for BridgeHandler {
    async fn handle(&self, event: &Event) -> anyhow::Result<()> {
        broadcast_event(self.broadcaster.as_ref(), &self.rule, event).await;
        Ok(())
    }
}

/// The bridge task has stopped.
#[derive(Debug, thiserror::Error)]
#[error("Event bridge has shut down")]
pub struct BridgeClosed;

enum BridgeCommand {
    Add {
        event_type: String,
        rule: BroadcastRule,
        ack: oneshot::Sender<()>,
    },
    Remove {
        event_type: String,
        ack: oneshot::Sender<bool>,
    },
    List {
        ack: oneshot::Sender<Vec<String>>,
    },
    Shutdown {
        ack: oneshot::Sender<()>,
    },
}

/// Handle to a running bridge.
///
/// Dropping every handle shuts the bridge down as well.
#[derive(Clone)]
pub struct BridgeHandle {
    commands: mpsc::Sender<BridgeCommand>,
}

impl BridgeHandle {
    /// Start forwarding `event_type`, replacing any existing rule for it.
    pub async fn add_mapping(
        &self,
        event_type: impl Into<String>,
        rule: BroadcastRule,
    ) -> Result<(), BridgeClosed> {
        let (ack, done) = oneshot::channel();
        self.send(BridgeCommand::Add {
            event_type: event_type.into(),
            rule,
            ack,
        })
        .await?;
        done.await.map_err(|_| BridgeClosed)
    }

    /// Stop forwarding `event_type`. Returns false when it was not mapped.
    pub async fn remove_mapping(&self, event_type: &str) -> Result<bool, BridgeClosed> {
        let (ack, done) = oneshot::channel();
        self.send(BridgeCommand::Remove {
            event_type: event_type.to_string(),
            ack,
        })
        .await?;
        done.await.map_err(|_| BridgeClosed)
    }

    /// Currently bridged event types, sorted.
    pub async fn event_types(&self) -> Result<Vec<String>, BridgeClosed> {
        let (ack, done) = oneshot::channel();
        self.send(BridgeCommand::List { ack }).await?;
        done.await.map_err(|_| BridgeClosed)
    }

    /// Unsubscribe every mapping and stop the bridge task.
    pub async fn shutdown(&self) -> Result<(), BridgeClosed> {
        let (ack, done) = oneshot::channel();
        self.send(BridgeCommand::Shutdown { ack }).await?;
        done.await.map_err(|_| BridgeClosed)
    }

    async fn send(&self, command: BridgeCommand) -> Result<(), BridgeClosed> {
        self.commands.send(command).await.map_err(|_| BridgeClosed)
    }
}

/// Bridge task state: owns the live mapping table.
pub struct EventBridge {
    bus: Arc<EventBus>,
    broadcaster: Arc<dyn Broadcaster>,
    mappings: EventMappings,
    subscriptions: HashMap<String, Subscription>,
}

impl EventBridge {
    /// Subscribe every mapping and spawn the bridge task.
    ///
    /// All initial subscriptions are in place when this returns.
    pub async fn start(
        bus: Arc<EventBus>,
        broadcaster: Arc<dyn Broadcaster>,
        mappings: EventMappings,
    ) -> BridgeHandle {
        let mut bridge = EventBridge {
            bus,
            broadcaster,
            mappings: EventMappings::new(),
            subscriptions: HashMap::new(),
        };

        for (event_type, rule) in mappings.rules {
            bridge.subscribe(event_type, rule).await;
        }
        tracing::info!(
            "Event bridge initialized with {} event mappings",
            bridge.mappings.len()
        );

        let (commands, receiver) = mpsc::channel(32);
        tokio::spawn(bridge.run(receiver));

        BridgeHandle { commands }
    }

    async fn run(mut self, mut receiver: mpsc::Receiver<BridgeCommand>) {
        while let Some(command) = receiver.recv().await {
            match command {
                BridgeCommand::Add {
                    event_type,
                    rule,
                    ack,
                } => {
                    self.subscribe(event_type, rule).await;
                    let _ = ack.send(());
                }
                BridgeCommand::Remove { event_type, ack } => {
                    let removed = self.unsubscribe(&event_type).await;
                    let _ = ack.send(removed);
                }
                BridgeCommand::List { ack } => {
                    let _ = ack.send(self.mappings.event_types());
                }
                BridgeCommand::Shutdown { ack } => {
                    self.unsubscribe_all().await;
                    let _ = ack.send(());
                    tracing::info!("Event bridge shut down");
                    return;
                }
            }
        }

        // Every handle was dropped.
        self.unsubscribe_all().await;
        tracing::info!("Event bridge shut down");
    }

    async fn subscribe(&mut self, event_type: String, rule: BroadcastRule) {
        let handler = Arc::new(BridgeHandler {
            rule: rule.clone(),
            broadcaster: Arc::clone(&self.broadcaster),
        });
        let subscription = self.bus.subscribe(&event_type, SUBSCRIBER, handler).await;

        self.subscriptions.insert(event_type.clone(), subscription);
        self.mappings.rules.insert(event_type, rule);
    }

    async fn unsubscribe(&mut self, event_type: &str) -> bool {
        self.mappings.rules.remove(event_type);
        match self.subscriptions.remove(event_type) {
            Some(subscription) => self.bus.unsubscribe(&subscription).await,
            None => false,
        }
    }

    async fn unsubscribe_all(&mut self) {
        for (_, subscription) in self.subscriptions.drain() {
            self.bus.unsubscribe(&subscription).await;
        }
        self.mappings = EventMappings::new();
    }
}
