//! Workflow run records and API types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

/// Lifecycle of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted workflow run.
///
/// # Database Table
///
/// Maps to the `workflow_runs` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct WorkflowRun {
    pub id: Uuid,
    pub workflow_id: String,
    /// `cron`, `manual`, or `event:<name>`
    pub trigger: String,
    pub status: String,
    /// Number of attempts made so far, starting at 1.
    pub attempts: i32,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Counts of a settled batch: every item either succeeded or failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub sent: usize,
    pub errors: usize,
    pub total: usize,
}

impl BatchOutcome {
    /// Tally the outcome of a settled set of results.
    pub fn from_results<T, E>(results: &[Result<T, E>]) -> Self {
        let sent = results.iter().filter(|r| r.is_ok()).count();
        Self {
            sent,
            errors: results.len() - sent,
            total: results.len(),
        }
    }

    /// Combine with the outcome of another batch.
    pub fn merge(self, other: BatchOutcome) -> Self {
        Self {
            sent: self.sent + other.sent,
            errors: self.errors + other.errors,
            total: self.total + other.total,
        }
    }
}

/// Request body for `POST /api/v1/workflows/{id}/run`.
#[derive(Debug, Default, Deserialize)]
pub struct RunWorkflowRequest {
    #[serde(default)]
    pub input: Value,
}

/// Request body for `POST /api/v1/workflows/events`.
#[derive(Debug, Deserialize)]
pub struct WorkflowEventRequest {
    pub name: String,
    #[serde(default)]
    pub data: Value,
}

/// Response listing the workflows started by a trigger.
#[derive(Debug, Serialize)]
pub struct WorkflowsStartedResponse {
    pub started: Vec<String>,
}

/// A registered workflow as exposed by `GET /api/v1/workflows`.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowInfo {
    pub id: String,
    pub name: String,
    pub trigger: String,
    pub retries: u32,
    pub is_running: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_counts_fifty_mixed_results() {
        let results: Vec<Result<(), String>> = (0..50)
            .map(|i| if i % 3 == 0 { Err(format!("item {}", i)) } else { Ok(()) })
            .collect();

        let outcome = BatchOutcome::from_results(&results);

        assert_eq!(outcome.total, 50);
        assert_eq!(outcome.errors, 17);
        assert_eq!(outcome.sent, 33);
        assert_eq!(outcome.sent + outcome.errors, outcome.total);
    }

    #[test]
    fn test_outcome_merge_and_empty() {
        let empty: Vec<Result<(), ()>> = Vec::new();
        let zero = BatchOutcome::from_results(&empty);
        assert_eq!(zero, BatchOutcome::default());

        let merged = BatchOutcome { sent: 2, errors: 1, total: 3 }
            .merge(BatchOutcome { sent: 4, errors: 0, total: 4 });
        assert_eq!(merged, BatchOutcome { sent: 6, errors: 1, total: 7 });
    }

    #[test]
    fn test_run_status_serializes_lowercase() {
        assert_eq!(serde_json::to_value(RunStatus::Failed).unwrap(), "failed");
        assert_eq!(RunStatus::Running.to_string(), "running");
    }
}
