//! Database backups.
//!
//! The backup itself runs behind the API gateway's internal endpoint. A failed
//! trigger is reported in the step output rather than failing the step, so the
//! notification still goes out.

use std::time::Instant;

use async_trait::async_trait;
use serde_json::{Map, Value, json};

use super::{StepContext, Trigger, Workflow, string_field};
use crate::error::WorkflowError;
use crate::services::gateway::{Gateway, GatewayRequest, Service};

pub const BACKUP_REQUESTED: &str = "backup/requested";

const BACKUP_TRIGGER_PATH: &str = "/internal/backup/trigger";

/// Call the backup endpoint and describe the result.
///
/// Always succeeds: `{ success: true, duration, ... }` on success and
/// `{ success: false, duration, error }` on failure.
async fn run_backup(gateway: &dyn Gateway, body: Option<Value>) -> Map<String, Value> {
    let started = Instant::now();
    let mut request = GatewayRequest::post(Service::Api, BACKUP_TRIGGER_PATH).internal();
    if let Some(body) = body {
        request = request.json(body);
    }

    let reply = gateway.send(request).await;
    let duration = started.elapsed().as_millis() as u64;

    let mut result = Map::new();
    match reply {
        Ok(reply) => {
            result.insert("success".to_string(), json!(true));
            result.insert("duration".to_string(), json!(duration));
            if let Value::Object(fields) = reply {
                result.extend(fields);
            }
        }
        Err(e) => {
            tracing::error!("Database backup failed: {}", e);
            result.insert("success".to_string(), json!(false));
            result.insert("duration".to_string(), json!(duration));
            result.insert("error".to_string(), json!(e.to_string()));
        }
    }
    result
}

fn slack_message(result: &Value) -> Value {
    let success = result["success"].as_bool().unwrap_or(false);
    let duration = &result["duration"];

    let (emoji, color, text) = if success {
        let file = string_field(result, "backupFile").unwrap_or_default();
        let size = string_field(result, "size").unwrap_or_default();
        (
            "✅",
            "good",
            format!(
                "Database backup completed successfully!\nFile: {}\nSize: {}\nDuration: {}ms",
                file, size, duration
            ),
        )
    } else {
        let error = string_field(result, "error").unwrap_or_else(|| "Unknown error".to_string());
        (
            "❌",
            "danger",
            format!("Database backup failed!\nError: {}\nDuration: {}ms", error, duration),
        )
    };

    json!({
        "attachments": [{
            "color": color,
            "title": format!("{} Daily Database Backup", emoji),
            "text": text,
            "ts": chrono::Utc::now().timestamp(),
        }]
    })
}

/// Nightly backup at 03:00 UTC, followed by a Slack notification.
pub struct DailyBackup {
    /// Without a webhook the notification step is skipped.
    pub slack_configured: bool,
}

#[async_trait]
impl Workflow for DailyBackup {
    fn id(&self) -> &'static str {
        "daily-db-backup"
    }

    fn name(&self) -> &'static str {
        "Daily Database Backup"
    }

    fn trigger(&self) -> Trigger {
        Trigger::Cron("0 3 * * *")
    }

    fn retries(&self) -> u32 {
        2
    }

    async fn run(&self, ctx: &StepContext, _input: &Value) -> Result<Value, WorkflowError> {
        tracing::info!("Starting daily database backup");
        let gateway = ctx.gateway();

        let result = ctx
            .step("run-backup", || async move {
                Ok(Value::Object(run_backup(gateway, None).await))
            })
            .await?;

        let slack_configured = self.slack_configured;
        let summary = &result;
        ctx.step("send-notification", || async move {
            if !slack_configured {
                tracing::warn!("SLACK_WEBHOOK_URL not set, skipping notification");
                return Ok(json!({ "skipped": true }));
            }
            gateway
                .send(GatewayRequest::post(Service::Slack, "").json(slack_message(summary)))
                .await?;
            Ok(json!({ "skipped": false }))
        })
        .await?;

        let mut output = Map::new();
        let status = if result["success"].as_bool() == Some(true) {
            "completed"
        } else {
            "failed"
        };
        output.insert("status".to_string(), json!(status));
        if let Value::Object(fields) = result {
            output.extend(fields);
        }
        Ok(Value::Object(output))
    }
}

/// Backup requested through the API or dashboard.
///
/// # Input
///
/// ```json
/// { "requestedBy": "u1", "reason": "before migration" }
/// ```
pub struct OnDemandBackup;

#[async_trait]
impl Workflow for OnDemandBackup {
    fn id(&self) -> &'static str {
        "on-demand-backup"
    }

    fn name(&self) -> &'static str {
        "On-Demand Database Backup"
    }

    fn trigger(&self) -> Trigger {
        Trigger::Event(BACKUP_REQUESTED)
    }

    fn retries(&self) -> u32 {
        1
    }

    async fn run(&self, ctx: &StepContext, input: &Value) -> Result<Value, WorkflowError> {
        let requested_by = input.get("requestedBy").cloned().unwrap_or(Value::Null);
        let reason = input.get("reason").cloned().unwrap_or(Value::Null);
        tracing::info!("On-demand backup requested by {}: {}", requested_by, reason);

        let gateway = ctx.gateway();
        ctx.step("run-backup", || async move {
            let body = json!({ "reason": reason, "requestedBy": requested_by });
            Ok(Value::Object(run_backup(gateway, Some(body)).await))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::gateway::Method;
    use crate::services::testing::{FakeGateway, FakeReply};
    use std::sync::Arc;

    fn backup_ok() -> FakeGateway {
        FakeGateway::new().json(
            Service::Api,
            Method::Post,
            BACKUP_TRIGGER_PATH,
            json!({ "backupFile": "db-2025-01-15.sql.gz", "size": "12MB" }),
        )
    }

    #[tokio::test]
    async fn test_daily_backup_notifies_slack() {
        let gateway = Arc::new(backup_ok());
        let ctx = StepContext::new(gateway.clone());

        let output = DailyBackup { slack_configured: true }
            .run(&ctx, &Value::Null)
            .await
            .unwrap();

        assert_eq!(output["status"], "completed");
        assert_eq!(output["backupFile"], "db-2025-01-15.sql.gz");

        let triggers = gateway.requests_to(Method::Post, BACKUP_TRIGGER_PATH);
        assert!(triggers[0].internal);

        let slack: Vec<_> = gateway
            .requests()
            .into_iter()
            .filter(|r| r.service == Service::Slack)
            .collect();
        assert_eq!(slack.len(), 1);
        let attachment = &slack[0].body.as_ref().unwrap()["attachments"][0];
        assert_eq!(attachment["color"], "good");
        assert!(attachment["text"].as_str().unwrap().contains("db-2025-01-15.sql.gz"));
    }

    #[tokio::test]
    async fn test_failed_backup_still_notifies() {
        let gateway = Arc::new(FakeGateway::new().reply(
            Service::Api,
            Method::Post,
            BACKUP_TRIGGER_PATH,
            FakeReply::Status(500),
        ));
        let ctx = StepContext::new(gateway.clone());

        let output = DailyBackup { slack_configured: true }
            .run(&ctx, &Value::Null)
            .await
            .unwrap();

        assert_eq!(output["status"], "failed");
        assert_eq!(output["success"], false);
        assert!(output["error"].as_str().unwrap().contains("500"));

        let slack = gateway
            .requests()
            .into_iter()
            .find(|r| r.service == Service::Slack)
            .unwrap();
        assert_eq!(slack.body.unwrap()["attachments"][0]["color"], "danger");
    }

    #[tokio::test]
    async fn test_notification_skipped_without_webhook() {
        let gateway = Arc::new(backup_ok());
        let ctx = StepContext::new(gateway.clone());

        DailyBackup { slack_configured: false }
            .run(&ctx, &Value::Null)
            .await
            .unwrap();

        assert!(gateway.requests().iter().all(|r| r.service != Service::Slack));
    }

    #[tokio::test]
    async fn test_on_demand_backup_forwards_reason() {
        let gateway = Arc::new(backup_ok());
        let ctx = StepContext::new(gateway.clone());

        let output = OnDemandBackup
            .run(&ctx, &json!({ "requestedBy": "u1", "reason": "pre-migration" }))
            .await
            .unwrap();

        assert_eq!(output["success"], true);
        assert_eq!(output["size"], "12MB");
        let body = gateway.requests_to(Method::Post, BACKUP_TRIGGER_PATH)[0]
            .body
            .clone()
            .unwrap();
        assert_eq!(body, json!({ "reason": "pre-migration", "requestedBy": "u1" }));
    }
}
