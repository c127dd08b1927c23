//! Shared application state.
//!
//! Every long-lived client is constructed once at startup and shared through
//! `Arc`s; cloning the state (axum does so per request) never creates a new
//! client.

use std::sync::Arc;

use crate::db::DbPool;
use crate::services::channel_auth::ChannelAuthorizer;
use crate::services::event_bridge::BridgeHandle;
use crate::services::event_bus::EventBus;
use crate::services::realtime_service::Broadcaster;
use crate::services::run_store::RunStore;
use crate::workflows::scheduler::SchedulerHandle;

#[derive(Clone)]
pub struct AppState {
    pub bus: Arc<EventBus>,
    pub bridge: BridgeHandle,
    pub broadcaster: Arc<dyn Broadcaster>,
    pub authorizer: Arc<ChannelAuthorizer>,
    pub scheduler: SchedulerHandle,
    pub runs: Arc<dyn RunStore>,
    /// Pool checked by the health endpoint; `None` when running without a database.
    pub pool: Option<DbPool>,
    /// Hex SHA-256 of `INTERNAL_API_KEY`.
    pub api_key_hash: Arc<str>,
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::middleware::auth::hash_api_key;
    use crate::services::event_bridge::{EventBridge, EventMappings};
    use crate::services::testing::{FakeGateway, MemoryRunStore, RecordingBroadcaster};
    use crate::workflows::Workflow;
    use crate::workflows::retry::RetryPolicy;
    use crate::workflows::runner::WorkflowRunner;
    use crate::workflows::scheduler::WorkflowScheduler;
    use tokio_util::sync::CancellationToken;

    pub const API_KEY: &str = "internal-test-key";

    /// State wired to in-memory fakes, plus the fakes for assertions.
    pub struct TestApp {
        pub state: AppState,
        pub broadcaster: Arc<RecordingBroadcaster>,
        pub gateway: Arc<FakeGateway>,
        pub store: Arc<MemoryRunStore>,
    }

    pub async fn test_app(workflows: Vec<Arc<dyn Workflow>>) -> TestApp {
        let bus = Arc::new(EventBus::new());
        let broadcaster = Arc::new(RecordingBroadcaster::new());
        let gateway = Arc::new(FakeGateway::new());
        let store = Arc::new(MemoryRunStore::new());

        let bridge = EventBridge::start(bus.clone(), broadcaster.clone(), EventMappings::defaults()).await;
        let runner = WorkflowRunner::new(gateway.clone(), store.clone(), RetryPolicy::default());
        let (scheduler, _task) = WorkflowScheduler::new(workflows, runner)
            .unwrap()
            .with_cron(false)
            .spawn(CancellationToken::new());

        let state = AppState {
            bus,
            bridge,
            broadcaster: broadcaster.clone(),
            authorizer: Arc::new(ChannelAuthorizer::new(
                "278d425bdf160c739803",
                "7ad3773142a6692b25b8",
            )),
            scheduler,
            runs: store.clone(),
            pool: None,
            api_key_hash: hash_api_key(API_KEY).into(),
        };

        TestApp {
            state,
            broadcaster,
            gateway,
            store,
        }
    }
}
