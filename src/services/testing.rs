//! In-memory fakes for the service seams, shared by unit tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{RealtimeError, WorkflowError};
use crate::models::channel::is_valid_channel_name;
use crate::models::realtime::BatchEvent;
use crate::models::workflow::{RunStatus, WorkflowRun};
use crate::services::gateway::{Gateway, GatewayRequest, Method, Service};
use crate::services::realtime_service::Broadcaster;
use crate::services::run_store::RunStore;

#[derive(Debug, Clone, PartialEq)]
pub struct TriggerCall {
    pub channel: String,
    pub event: String,
    pub data: Map<String, Value>,
}

/// Records every call; can be told to fail specific channels or batch attempts.
#[derive(Default)]
pub struct RecordingBroadcaster {
    triggers: Mutex<Vec<TriggerCall>>,
    batches: Mutex<Vec<Vec<BatchEvent>>>,
    batch_attempts: Mutex<usize>,
    failing_channels: HashSet<String>,
    failing_batch: Option<usize>,
}

impl RecordingBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_channel(mut self, channel: &str) -> Self {
        self.failing_channels.insert(channel.to_string());
        self
    }

    /// Fail the n-th batch call (1-based).
    pub fn fail_batch_number(mut self, n: usize) -> Self {
        self.failing_batch = Some(n);
        self
    }

    /// Successful and failed single triggers, in call order.
    pub fn triggers(&self) -> Vec<TriggerCall> {
        self.triggers.lock().unwrap().clone()
    }

    /// Successful batch calls, in call order.
    pub fn batches(&self) -> Vec<Vec<BatchEvent>> {
        self.batches.lock().unwrap().clone()
    }

    pub fn batch_attempts(&self) -> usize {
        *self.batch_attempts.lock().unwrap()
    }
}

#[async_trait]
impl Broadcaster for RecordingBroadcaster {
    async fn trigger(
        &self,
        channel: &str,
        event: &str,
        data: &Map<String, Value>,
    ) -> Result<(), RealtimeError> {
        self.triggers.lock().unwrap().push(TriggerCall {
            channel: channel.to_string(),
            event: event.to_string(),
            data: data.clone(),
        });

        if self.failing_channels.contains(channel) {
            return Err(RealtimeError::Status {
                status: 500,
                body: format!("{} unavailable", channel),
            });
        }
        Ok(())
    }

    async fn trigger_batch(&self, events: &[BatchEvent]) -> Result<(), RealtimeError> {
        let attempt = {
            let mut attempts = self.batch_attempts.lock().unwrap();
            *attempts += 1;
            *attempts
        };

        if let Some(event) = events.iter().find(|e| !is_valid_channel_name(&e.channel)) {
            return Err(RealtimeError::InvalidChannel(event.channel.clone()));
        }
        if self.failing_batch == Some(attempt) {
            return Err(RealtimeError::Status {
                status: 503,
                body: "unavailable".to_string(),
            });
        }

        self.batches.lock().unwrap().push(events.to_vec());
        Ok(())
    }
}

/// Canned reply for a gateway request.
#[derive(Debug, Clone)]
pub enum FakeReply {
    Json(Value),
    Status(u16),
}

/// Gateway fake keyed by `(service, method, path)`.
///
/// Replies queued for a key are consumed in order; the last one repeats.
/// Unknown requests answer `{}`.
#[derive(Default)]
pub struct FakeGateway {
    replies: Mutex<HashMap<(Service, Method, String), VecDeque<FakeReply>>>,
    requests: Mutex<Vec<GatewayRequest>>,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, service: Service, method: Method, path: &str, reply: FakeReply) -> Self {
        self.replies
            .lock()
            .unwrap()
            .entry((service, method, path.to_string()))
            .or_default()
            .push_back(reply);
        self
    }

    pub fn json(self, service: Service, method: Method, path: &str, body: Value) -> Self {
        self.reply(service, method, path, FakeReply::Json(body))
    }

    pub fn requests(&self) -> Vec<GatewayRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Requests whose path starts with `prefix`.
    pub fn requests_to(&self, method: Method, prefix: &str) -> Vec<GatewayRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == method && r.path.starts_with(prefix))
            .collect()
    }
}

#[async_trait]
impl Gateway for FakeGateway {
    async fn send(&self, request: GatewayRequest) -> Result<Value, WorkflowError> {
        let key = (request.service, request.method, request.path.clone());
        self.requests.lock().unwrap().push(request);

        let reply = {
            let mut replies = self.replies.lock().unwrap();
            match replies.get_mut(&key) {
                Some(queue) if queue.len() > 1 => queue.pop_front(),
                Some(queue) => queue.front().cloned(),
                None => None,
            }
        };

        match reply {
            Some(FakeReply::Json(value)) => Ok(value),
            Some(FakeReply::Status(status)) => Err(WorkflowError::Status {
                service: key.0.name(),
                path: key.2,
                status,
            }),
            None => Ok(Value::Object(Map::new())),
        }
    }
}

/// Run store kept in memory.
#[derive(Default)]
pub struct MemoryRunStore {
    runs: Mutex<HashMap<Uuid, WorkflowRun>>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn runs_for(&self, workflow_id: &str) -> Vec<WorkflowRun> {
        let mut runs: Vec<WorkflowRun> = self
            .runs
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.workflow_id == workflow_id)
            .cloned()
            .collect();
        runs.sort_by_key(|r| r.started_at);
        runs
    }
}

#[async_trait]
impl RunStore for MemoryRunStore {
    async fn record_start(&self, workflow_id: &str, trigger: &str) -> Result<Uuid, sqlx::Error> {
        let run = WorkflowRun {
            id: Uuid::new_v4(),
            workflow_id: workflow_id.to_string(),
            trigger: trigger.to_string(),
            status: RunStatus::Running.to_string(),
            attempts: 1,
            output: None,
            error: None,
            started_at: chrono::Utc::now(),
            finished_at: None,
        };
        let id = run.id;
        self.runs.lock().unwrap().insert(id, run);
        Ok(id)
    }

    async fn record_attempt(&self, run_id: Uuid, attempt: u32) -> Result<(), sqlx::Error> {
        if let Some(run) = self.runs.lock().unwrap().get_mut(&run_id) {
            run.attempts = attempt as i32;
        }
        Ok(())
    }

    async fn record_finish(
        &self,
        run_id: Uuid,
        status: RunStatus,
        output: Option<Value>,
        error: Option<String>,
    ) -> Result<(), sqlx::Error> {
        if let Some(run) = self.runs.lock().unwrap().get_mut(&run_id) {
            run.status = status.to_string();
            run.output = output;
            run.error = error;
            run.finished_at = Some(chrono::Utc::now());
        }
        Ok(())
    }

    async fn get(&self, run_id: Uuid) -> Result<Option<WorkflowRun>, sqlx::Error> {
        Ok(self.runs.lock().unwrap().get(&run_id).cloned())
    }
}
