//! Durable background workflows.
//!
//! A workflow is a sequence of named steps, each an async unit that calls
//! internal services through the `Gateway`. Workflows are started by a cron
//! schedule, by a named trigger event, or manually through the API.
//!
//! # Retries
//!
//! A failing run is re-invoked from the top up to the workflow's retry count.
//! Step results are memoized by name for the lifetime of a run, so steps that
//! already completed return their recorded output instead of running again.

pub mod backup;
pub mod digest;
pub mod ecommerce;
pub mod producthunt;
pub mod recsys;
pub mod retry;
pub mod runner;
pub mod schedule;
pub mod scheduler;
pub mod translation;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::config::Config;
use crate::error::WorkflowError;
use crate::models::workflow::BatchOutcome;
use crate::services::gateway::Gateway;

/// What starts a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Five-field cron expression, UTC.
    Cron(&'static str),
    /// Named trigger event, e.g. `backup/requested`.
    Event(&'static str),
}

impl Trigger {
    pub fn describe(&self) -> String {
        match self {
            Trigger::Cron(expr) => format!("cron {}", expr),
            Trigger::Event(name) => format!("event {}", name),
        }
    }
}

#[async_trait]
pub trait Workflow: Send + Sync {
    fn id(&self) -> &'static str;

    fn name(&self) -> &'static str;

    fn trigger(&self) -> Trigger;

    /// Re-runs allowed after a failed first attempt.
    fn retries(&self) -> u32 {
        retry::DEFAULT_MAX_RETRIES
    }

    /// Execute the workflow. `input` is the trigger payload (`null` for cron runs).
    async fn run(&self, ctx: &StepContext, input: &Value) -> Result<Value, WorkflowError>;
}

/// Per-run execution context: gateway access plus the step memo.
pub struct StepContext {
    gateway: Arc<dyn Gateway>,
    completed: Mutex<HashMap<String, Value>>,
}

impl StepContext {
    pub fn new(gateway: Arc<dyn Gateway>) -> Self {
        Self {
            gateway,
            completed: Mutex::new(HashMap::new()),
        }
    }

    pub fn gateway(&self) -> &dyn Gateway {
        self.gateway.as_ref()
    }

    /// Run a named step once per run.
    ///
    /// A step that already completed (in this or an earlier attempt) returns
    /// its recorded output without running `f`. Failed steps are not recorded.
    pub async fn step<F, Fut>(&self, name: &str, f: F) -> Result<Value, WorkflowError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, WorkflowError>>,
    {
        if let Some(output) = self.completed.lock().await.get(name).cloned() {
            tracing::debug!(step = name, "Step already completed, reusing output");
            return Ok(output);
        }

        match f().await {
            Ok(output) => {
                self.completed
                    .lock()
                    .await
                    .insert(name.to_string(), output.clone());
                Ok(output)
            }
            Err(e) => {
                tracing::warn!(step = name, "Step failed: {}", e);
                Err(e)
            }
        }
    }

    /// Names of the steps completed so far, sorted.
    pub async fn completed_steps(&self) -> Vec<String> {
        let mut names: Vec<String> = self.completed.lock().await.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Await every future and count successes and failures.
pub async fn settle_all<I, F, T>(futures: I) -> BatchOutcome
where
    I: IntoIterator<Item = F>,
    F: Future<Output = Result<T, WorkflowError>>,
{
    let results = futures::future::join_all(futures).await;
    for e in results.iter().filter_map(|r| r.as_ref().err()) {
        tracing::warn!("Batch item failed: {}", e);
    }
    BatchOutcome::from_results(&results)
}

/// Every workflow this service runs.
pub fn registry(config: &Config) -> Vec<Arc<dyn Workflow>> {
    let slack_configured = config.slack_webhook_url.is_some();

    vec![
        Arc::new(translation::AutoTranslate),
        Arc::new(digest::DailyDigest),
        Arc::new(digest::WeeklyTenantReport),
        Arc::new(backup::DailyBackup { slack_configured }),
        Arc::new(backup::OnDemandBackup),
        Arc::new(ecommerce::InventorySync),
        Arc::new(ecommerce::ProcessShopifyOrder),
        Arc::new(recsys::ModelRefresh),
        Arc::new(recsys::ProfileUpdate),
        Arc::new(producthunt::TrendingSync::default()),
        Arc::new(producthunt::TopicsSync),
        Arc::new(producthunt::CacheWarm),
        Arc::new(producthunt::FullSync::default()),
    ]
}

/// Interpret a step output as a JSON array.
pub(crate) fn items(value: &Value, context: &str) -> Result<Vec<Value>, WorkflowError> {
    match value {
        Value::Array(items) => Ok(items.clone()),
        Value::Null => Ok(Vec::new()),
        other => Err(WorkflowError::decode(
            context,
            format!("expected an array, got {}", kind_of(other)),
        )),
    }
}

/// Identifier of a record, whether sent as a string or a number.
pub(crate) fn id_of(item: &Value) -> Option<String> {
    string_field(item, "id")
}

/// A field read as a string; numbers are formatted.
pub(crate) fn string_field(item: &Value, key: &str) -> Option<String> {
    match item.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// A required string field of the trigger payload.
pub(crate) fn required_str(input: &Value, key: &'static str) -> Result<String, WorkflowError> {
    string_field(input, key).ok_or(WorkflowError::MissingInput(key))
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::testing::FakeGateway;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn context() -> StepContext {
        StepContext::new(Arc::new(FakeGateway::new()))
    }

    #[tokio::test]
    async fn test_step_runs_once_per_name() {
        let ctx = context();
        let counter = AtomicUsize::new(0);
        let calls = &counter;

        for _ in 0..3 {
            let output = ctx
                .step("fetch", || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(json!({ "n": 1 }))
                })
                .await
                .unwrap();
            assert_eq!(output, json!({ "n": 1 }));
        }

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(ctx.completed_steps().await, vec!["fetch"]);
    }

    #[tokio::test]
    async fn test_failed_step_is_not_recorded() {
        let ctx = context();

        let first = ctx
            .step("flaky", || async { Err(WorkflowError::MissingInput("x")) })
            .await;
        assert!(first.is_err());

        let second = ctx.step("flaky", || async { Ok(json!(2)) }).await.unwrap();
        assert_eq!(second, json!(2));
    }

    #[tokio::test]
    async fn test_settle_all_counts_every_item() {
        let outcome = settle_all((0..50).map(|i| async move {
            if i % 5 == 0 {
                Err(WorkflowError::MissingInput("email"))
            } else {
                Ok(i)
            }
        }))
        .await;

        assert_eq!(outcome.total, 50);
        assert_eq!(outcome.errors, 10);
        assert_eq!(outcome.sent, 40);
    }

    #[test]
    fn test_value_helpers() {
        assert_eq!(id_of(&json!({ "id": 7 })), Some("7".to_string()));
        assert_eq!(id_of(&json!({ "id": "t1" })), Some("t1".to_string()));
        assert_eq!(id_of(&json!({ "id": "" })), None);
        assert_eq!(items(&json!(null), "users").unwrap().len(), 0);
        assert!(matches!(
            items(&json!({ "error": "nope" }), "users"),
            Err(WorkflowError::Decode { .. })
        ));
        assert!(matches!(
            required_str(&json!({}), "contentId"),
            Err(WorkflowError::MissingInput("contentId"))
        ));
    }

    #[test]
    fn test_registry_ids_are_unique_and_crons_parse() {
        let workflows = registry(&crate::config::test_config());
        let mut ids: Vec<&str> = workflows.iter().map(|w| w.id()).collect();
        ids.sort();
        ids.dedup();

        assert_eq!(workflows.len(), 13);
        assert_eq!(ids.len(), 13);
        for workflow in &workflows {
            if let Trigger::Cron(expr) = workflow.trigger() {
                assert!(schedule::CronSchedule::parse(expr).is_ok(), "{}", expr);
            }
        }
    }
}
