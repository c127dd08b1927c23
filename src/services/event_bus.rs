//! In-process event bus.
//!
//! Subscribers register a handler per event type under a subscriber name.
//! Registering again under the same name replaces the previous handler, so a
//! component that re-initializes never ends up subscribed twice.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::{Mutex, RwLock};

use crate::models::event::{Event, event_types};

/// Default number of events retained for debugging.
pub const DEFAULT_LOG_CAPACITY: usize = 1000;

/// Receives events of the types it was subscribed to.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &Event) -> anyhow::Result<()>;
}

/// Token identifying one registration, used to unsubscribe.
///
/// A token only removes the registration it was issued for: once a handler
/// has been replaced, the stale token no longer unsubscribes anything.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subscription {
    pub event_type: String,
    pub subscriber: String,
    id: u64,
}

type HandlerMap = HashMap<String, HashMap<String, (u64, Arc<dyn EventHandler>)>>;

pub struct EventBus {
    handlers: RwLock<HandlerMap>,
    next_id: AtomicU64,
    log: Mutex<VecDeque<Event>>,
    log_capacity: usize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_log_capacity(DEFAULT_LOG_CAPACITY)
    }

    pub fn with_log_capacity(log_capacity: usize) -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            log: Mutex::new(VecDeque::new()),
            log_capacity,
        }
    }

    /// Register `handler` for `event_type` under `subscriber`.
    pub async fn subscribe(
        &self,
        event_type: &str,
        subscriber: &str,
        handler: Arc<dyn EventHandler>,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut handlers = self.handlers.write().await;
        let replaced = handlers
            .entry(event_type.to_string())
            .or_default()
            .insert(subscriber.to_string(), (id, handler))
            .is_some();

        if replaced {
            tracing::debug!(event_type, subscriber, "Replaced existing subscription");
        }

        Subscription {
            event_type: event_type.to_string(),
            subscriber: subscriber.to_string(),
            id,
        }
    }

    /// Remove a registration. Returns false when it was already gone or replaced.
    pub async fn unsubscribe(&self, subscription: &Subscription) -> bool {
        let mut handlers = self.handlers.write().await;
        let Some(by_subscriber) = handlers.get_mut(&subscription.event_type) else {
            return false;
        };

        let current = by_subscriber
            .get(&subscription.subscriber)
            .is_some_and(|(id, _)| *id == subscription.id);
        if !current {
            return false;
        }

        by_subscriber.remove(&subscription.subscriber);
        if by_subscriber.is_empty() {
            handlers.remove(&subscription.event_type);
        }
        true
    }

    /// Number of handlers registered for exactly this event type.
    pub async fn subscriber_count(&self, event_type: &str) -> usize {
        self.handlers
            .read()
            .await
            .get(event_type)
            .map_or(0, HashMap::len)
    }

    /// Deliver an event to its type's handlers and to wildcard handlers.
    ///
    /// Handlers run concurrently. A failing handler is logged and does not
    /// affect the others. Returns the number of handlers invoked.
    pub async fn publish(&self, event: Event) -> usize {
        self.record(&event).await;

        let targets: Vec<(String, Arc<dyn EventHandler>)> = {
            let handlers = self.handlers.read().await;
            [event.event_type.as_str(), event_types::WILDCARD]
                .iter()
                .filter_map(|key| handlers.get(*key))
                .flat_map(|by_subscriber| {
                    by_subscriber
                        .iter()
                        .map(|(name, (_, handler))| (name.clone(), Arc::clone(handler)))
                })
                .collect()
        };

        let invoked = targets.len();
        let results = join_all(targets.iter().map(|(_, handler)| handler.handle(&event))).await;

        for ((subscriber, _), result) in targets.iter().zip(results) {
            if let Err(e) = result {
                tracing::error!(
                    event_type = %event.event_type,
                    event_id = %event.id,
                    subscriber = %subscriber,
                    "Event handler failed: {:?}",
                    e
                );
            }
        }

        invoked
    }

    /// Most recent events, oldest first.
    pub async fn recent_events(&self) -> Vec<Event> {
        self.log.lock().await.iter().cloned().collect()
    }

    pub async fn clear_log(&self) {
        self.log.lock().await.clear();
    }

    async fn record(&self, event: &Event) {
        if self.log_capacity == 0 {
            return;
        }
        let mut log = self.log.lock().await;
        if log.len() == self.log_capacity {
            log.pop_front();
        }
        log.push_back(event.clone());
    }
}
