//! Persistence of workflow run history.

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::db::DbPool;
use crate::models::workflow::{RunStatus, WorkflowRun};

/// Records workflow runs.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Insert a `running` row and return its id.
    async fn record_start(&self, workflow_id: &str, trigger: &str) -> Result<Uuid, sqlx::Error>;

    /// Update the attempt counter before a retry.
    async fn record_attempt(&self, run_id: Uuid, attempt: u32) -> Result<(), sqlx::Error>;

    async fn record_finish(
        &self,
        run_id: Uuid,
        status: RunStatus,
        output: Option<Value>,
        error: Option<String>,
    ) -> Result<(), sqlx::Error>;

    async fn get(&self, run_id: Uuid) -> Result<Option<WorkflowRun>, sqlx::Error>;
}

/// PostgreSQL-backed run store.
///
/// # Database Table
///
/// `workflow_runs`, created by the embedded migrations.
pub struct PgRunStore {
    pool: DbPool,
}

impl PgRunStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Mark rows left `running` by a previous process as failed.
    pub async fn mark_stale_runs_failed(&self) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE workflow_runs
            SET status = 'failed', error = 'Interrupted by restart', finished_at = NOW()
            WHERE status = 'running'
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl RunStore for PgRunStore {
    async fn record_start(&self, workflow_id: &str, trigger: &str) -> Result<Uuid, sqlx::Error> {
        sqlx::query_scalar(
            r#"
            INSERT INTO workflow_runs (workflow_id, trigger, status, attempts)
            VALUES ($1, $2, $3, 1)
            RETURNING id
            "#,
        )
        .bind(workflow_id)
        .bind(trigger)
        .bind(RunStatus::Running.as_str())
        .fetch_one(&self.pool)
        .await
    }

    async fn record_attempt(&self, run_id: Uuid, attempt: u32) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE workflow_runs SET attempts = $2 WHERE id = $1")
            .bind(run_id)
            .bind(attempt as i32)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn record_finish(
        &self,
        run_id: Uuid,
        status: RunStatus,
        output: Option<Value>,
        error: Option<String>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE workflow_runs
            SET status = $2, output = $3, error = $4, finished_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(run_id)
        .bind(status.as_str())
        .bind(output)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, run_id: Uuid) -> Result<Option<WorkflowRun>, sqlx::Error> {
        sqlx::query_as::<_, WorkflowRun>(
            r#"
            SELECT id, workflow_id, trigger, status, attempts, output, error, started_at, finished_at
            FROM workflow_runs
            WHERE id = $1
            "#,
        )
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await
    }
}
