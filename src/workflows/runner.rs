//! Runs one workflow to completion with retries and run persistence.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use super::retry::RetryPolicy;
use super::{StepContext, Workflow};
use crate::models::workflow::RunStatus;
use crate::services::gateway::Gateway;
use crate::services::run_store::RunStore;

/// Final state of a run.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RunReport {
    pub run_id: Uuid,
    pub workflow_id: String,
    pub status: RunStatus,
    pub attempts: u32,
    pub output: Option<Value>,
    pub error: Option<String>,
}

pub struct WorkflowRunner {
    gateway: Arc<dyn Gateway>,
    store: Arc<dyn RunStore>,
    policy: RetryPolicy,
}

impl WorkflowRunner {
    pub fn new(gateway: Arc<dyn Gateway>, store: Arc<dyn RunStore>, policy: RetryPolicy) -> Self {
        Self {
            gateway,
            store,
            policy,
        }
    }

    /// Record a new `running` row for `workflow`.
    pub async fn start(&self, workflow: &dyn Workflow, trigger: &str) -> Result<Uuid, sqlx::Error> {
        self.store.record_start(workflow.id(), trigger).await
    }

    /// Execute a started run until it completes, fails permanently, or runs
    /// out of retries.
    ///
    /// Steps completed by an earlier attempt are not executed again. Store
    /// failures are logged; they never change the outcome of the run.
    pub async fn execute(&self, workflow: &dyn Workflow, run_id: Uuid, input: Value) -> RunReport {
        let policy = self.policy.with_max_retries(workflow.retries());
        let ctx = StepContext::new(Arc::clone(&self.gateway));
        let mut attempt: u32 = 1;

        let result = loop {
            match workflow.run(&ctx, &input).await {
                Ok(output) => break Ok(output),
                Err(e) if policy.should_retry(&e, attempt - 1) => {
                    let wait = policy.backoff(attempt - 1);
                    let completed = ctx.completed_steps().await;
                    tracing::warn!(
                        workflow = workflow.id(),
                        %run_id,
                        attempt,
                        completed_steps = ?completed,
                        "Workflow attempt failed, retrying in {:?}: {}",
                        wait,
                        e
                    );
                    tokio::time::sleep(wait).await;

                    attempt += 1;
                    if let Err(e) = self.store.record_attempt(run_id, attempt).await {
                        tracing::error!(%run_id, "Failed to record attempt: {}", e);
                    }
                }
                Err(e) => break Err(e),
            }
        };

        let report = match result {
            Ok(output) => {
                tracing::info!(workflow = workflow.id(), %run_id, attempt, "Workflow completed");
                RunReport {
                    run_id,
                    workflow_id: workflow.id().to_string(),
                    status: RunStatus::Completed,
                    attempts: attempt,
                    output: Some(output),
                    error: None,
                }
            }
            Err(e) => {
                tracing::error!(workflow = workflow.id(), %run_id, attempt, "Workflow failed: {}", e);
                RunReport {
                    run_id,
                    workflow_id: workflow.id().to_string(),
                    status: RunStatus::Failed,
                    attempts: attempt,
                    output: None,
                    error: Some(e.to_string()),
                }
            }
        };

        if let Err(e) = self
            .store
            .record_finish(run_id, report.status, report.output.clone(), report.error.clone())
            .await
        {
            tracing::error!(%run_id, "Failed to record run result: {}", e);
        }

        report
    }

    /// `start` followed by `execute`.
    pub async fn run(
        &self,
        workflow: &dyn Workflow,
        trigger: &str,
        input: Value,
    ) -> Result<RunReport, sqlx::Error> {
        let run_id = self.start(workflow, trigger).await?;
        Ok(self.execute(workflow, run_id, input).await)
    }
}
