//! Scheduled email digests and tenant reports.

use async_trait::async_trait;
use serde_json::{Value, json};

use super::{StepContext, Trigger, Workflow, id_of, items, settle_all, string_field};
use crate::error::WorkflowError;
use crate::models::workflow::BatchOutcome;
use crate::services::gateway::{Gateway, GatewayRequest, Service};

/// Subscribers handled per digest step.
pub const DIGEST_BATCH_SIZE: usize = 50;

/// Sends the daily digest email to every opted-in user at 08:00 UTC.
///
/// Users are processed in batches of 50. Inside a batch every user settles
/// independently; one failed email does not fail the batch.
pub struct DailyDigest;

impl DailyDigest {
    async fn send_digest(gateway: &dyn Gateway, user: &Value) -> Result<(), WorkflowError> {
        let user_id = id_of(user).ok_or_else(|| WorkflowError::decode("digest subscriber", "missing id"))?;
        let tenant_id = string_field(user, "tenantId");

        let recommendations = gateway
            .send(
                GatewayRequest::get(Service::Recsys, format!("/recommend/{}?limit=5", user_id))
                    .tenant_opt(tenant_id.clone()),
            )
            .await?;
        let activity = gateway
            .send(
                GatewayRequest::get(
                    Service::Api,
                    format!("/users/{}/activity/summary?since=24h", user_id),
                )
                .tenant_opt(tenant_id.clone()),
            )
            .await?;

        gateway
            .send(
                GatewayRequest::post(Service::Api, "/email/send")
                    .tenant_opt(tenant_id)
                    .json(json!({
                        "template": "daily-digest",
                        "to": user.get("email"),
                        "data": {
                            "user": user,
                            "recommendations": recommendations,
                            "activity": activity,
                        },
                    })),
            )
            .await?;

        Ok(())
    }
}

#[async_trait]
impl Workflow for DailyDigest {
    fn id(&self) -> &'static str {
        "daily-digest-email"
    }

    fn name(&self) -> &'static str {
        "Send Daily Digest Emails"
    }

    fn trigger(&self) -> Trigger {
        Trigger::Cron("0 8 * * *")
    }

    fn retries(&self) -> u32 {
        2
    }

    async fn run(&self, ctx: &StepContext, _input: &Value) -> Result<Value, WorkflowError> {
        let gateway = ctx.gateway();

        let subscribers = ctx
            .step("get-digest-subscribers", || {
                gateway.send(GatewayRequest::get(Service::Api, "/users?digestEnabled=true"))
            })
            .await?;
        let users = items(&subscribers, "digest subscribers")?;

        let mut outcome = BatchOutcome::default();
        for (index, batch) in users.chunks(DIGEST_BATCH_SIZE).enumerate() {
            let step = format!("send-digest-batch-{}", index * DIGEST_BATCH_SIZE);
            let result = ctx
                .step(&step, || async move {
                    let batch_outcome =
                        settle_all(batch.iter().map(|user| Self::send_digest(gateway, user))).await;
                    Ok(json!(batch_outcome))
                })
                .await?;

            let batch_outcome: BatchOutcome = serde_json::from_value(result)
                .map_err(|e| WorkflowError::decode(step.as_str(), e))?;
            outcome = outcome.merge(batch_outcome);
        }

        tracing::info!(
            "Daily digest sent to {} of {} users ({} errors)",
            outcome.sent,
            outcome.total,
            outcome.errors
        );

        Ok(json!(outcome))
    }
}

/// Sends each tenant's admins a weekly usage report, Mondays at 09:00 UTC.
pub struct WeeklyTenantReport;

#[async_trait]
impl Workflow for WeeklyTenantReport {
    fn id(&self) -> &'static str {
        "weekly-tenant-report"
    }

    fn name(&self) -> &'static str {
        "Send Weekly Tenant Reports"
    }

    fn trigger(&self) -> Trigger {
        Trigger::Cron("0 9 * * 1")
    }

    fn retries(&self) -> u32 {
        2
    }

    async fn run(&self, ctx: &StepContext, _input: &Value) -> Result<Value, WorkflowError> {
        let gateway = ctx.gateway();

        let tenants = ctx
            .step("get-tenants", || {
                gateway.send(GatewayRequest::get(Service::Api, "/system/tenants"))
            })
            .await?;
        let tenants = items(&tenants, "tenants")?;

        let mut sent = 0;
        for tenant in &tenants {
            let Some(tenant_id) = id_of(tenant) else {
                tracing::warn!("Skipping tenant without id");
                continue;
            };
            let tenant_id = tenant_id.as_str();

            let report = ctx
                .step(&format!("generate-report-{}", tenant_id), || async move {
                    let base = format!("/tenants/{}", tenant_id);
                    let (usage, analytics, billing) = tokio::try_join!(
                        gateway.send(GatewayRequest::get(Service::Api, format!("{}/usage/weekly", base))),
                        gateway.send(GatewayRequest::get(Service::Api, format!("{}/analytics/weekly", base))),
                        gateway.send(GatewayRequest::get(Service::Api, format!("{}/billing/summary", base))),
                    )?;
                    Ok(json!({ "usage": usage, "analytics": analytics, "billing": billing }))
                })
                .await?;

            ctx.step(&format!("send-report-{}", tenant_id), || async move {
                let admins = gateway
                    .send(GatewayRequest::get(
                        Service::Api,
                        format!("/tenants/{}/admins", tenant_id),
                    ))
                    .await?;
                let admins = items(&admins, "tenant admins")?;

                for admin in &admins {
                    gateway
                        .send(
                            GatewayRequest::post(Service::Api, "/email/send")
                                .tenant(tenant_id)
                                .json(json!({
                                    "template": "weekly-report",
                                    "to": admin.get("email"),
                                    "data": { "tenant": tenant, "report": report },
                                })),
                        )
                        .await?;
                }
                Ok(json!({ "admins": admins.len() }))
            })
            .await?;

            sent += 1;
        }

        Ok(json!({ "sent": sent }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::gateway::Method;
    use crate::services::testing::{FakeGateway, FakeReply};
    use std::sync::Arc;

    fn users(n: usize) -> Value {
        Value::Array(
            (0..n)
                .map(|i| json!({ "id": format!("u{}", i), "email": format!("u{}@example.com", i), "tenantId": "t1" }))
                .collect(),
        )
    }

    #[tokio::test]
    async fn test_digest_settles_every_user() {
        let gateway = Arc::new(
            FakeGateway::new()
                .json(Service::Api, Method::Get, "/users?digestEnabled=true", users(60))
                .reply(Service::Recsys, Method::Get, "/recommend/u7?limit=5", FakeReply::Status(500))
                .reply(Service::Recsys, Method::Get, "/recommend/u55?limit=5", FakeReply::Status(500)),
        );
        let ctx = StepContext::new(gateway.clone());

        let output = DailyDigest.run(&ctx, &Value::Null).await.unwrap();

        assert_eq!(output, json!({ "sent": 58, "errors": 2, "total": 60 }));
        assert_eq!(gateway.requests_to(Method::Post, "/email/send").len(), 58);
        assert_eq!(
            ctx.completed_steps().await,
            vec!["get-digest-subscribers", "send-digest-batch-0", "send-digest-batch-50"]
        );
    }

    #[tokio::test]
    async fn test_digest_sends_tenant_header_and_template() {
        let gateway = Arc::new(
            FakeGateway::new().json(Service::Api, Method::Get, "/users?digestEnabled=true", users(1)),
        );
        let ctx = StepContext::new(gateway.clone());

        DailyDigest.run(&ctx, &Value::Null).await.unwrap();

        let emails = gateway.requests_to(Method::Post, "/email/send");
        assert_eq!(emails[0].tenant_id.as_deref(), Some("t1"));
        let body = emails[0].body.as_ref().unwrap();
        assert_eq!(body["template"], "daily-digest");
        assert_eq!(body["to"], "u0@example.com");
    }

    #[tokio::test]
    async fn test_digest_with_no_subscribers() {
        let gateway = Arc::new(
            FakeGateway::new().json(Service::Api, Method::Get, "/users?digestEnabled=true", json!([])),
        );
        let ctx = StepContext::new(gateway.clone());

        let output = DailyDigest.run(&ctx, &Value::Null).await.unwrap();

        assert_eq!(output, json!({ "sent": 0, "errors": 0, "total": 0 }));
    }

    #[tokio::test]
    async fn test_weekly_report_emails_each_admin() {
        let gateway = Arc::new(
            FakeGateway::new()
                .json(Service::Api, Method::Get, "/system/tenants", json!([{ "id": "t1" }, { "id": 2 }]))
                .json(
                    Service::Api,
                    Method::Get,
                    "/tenants/t1/admins",
                    json!([{ "email": "a@t1.io" }, { "email": "b@t1.io" }]),
                )
                .json(Service::Api, Method::Get, "/tenants/2/admins", json!([{ "email": "a@t2.io" }]))
                .json(Service::Api, Method::Get, "/tenants/t1/usage/weekly", json!({ "calls": 10 })),
        );
        let ctx = StepContext::new(gateway.clone());

        let output = WeeklyTenantReport.run(&ctx, &Value::Null).await.unwrap();

        assert_eq!(output, json!({ "sent": 2 }));
        let emails = gateway.requests_to(Method::Post, "/email/send");
        assert_eq!(emails.len(), 3);
        let first = emails[0].body.as_ref().unwrap();
        assert_eq!(first["template"], "weekly-report");
        assert_eq!(first["data"]["report"]["usage"], json!({ "calls": 10 }));
        assert_eq!(emails[2].tenant_id.as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn test_weekly_report_fails_on_report_error() {
        let gateway = Arc::new(
            FakeGateway::new()
                .json(Service::Api, Method::Get, "/system/tenants", json!([{ "id": "t1" }]))
                .reply(Service::Api, Method::Get, "/tenants/t1/billing/summary", FakeReply::Status(502)),
        );
        let ctx = StepContext::new(gateway.clone());

        let err = WeeklyTenantReport.run(&ctx, &Value::Null).await.unwrap_err();

        assert!(matches!(err, WorkflowError::Status { status: 502, .. }));
        assert!(gateway.requests_to(Method::Post, "/email/send").is_empty());
    }
}
