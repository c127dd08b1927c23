//! Recommendation model maintenance.

use async_trait::async_trait;
use serde_json::{Map, Value, json};

use super::{StepContext, Trigger, Workflow, id_of, items};
use crate::error::WorkflowError;
use crate::services::gateway::{GatewayRequest, Service};

/// Users sent per profile update call.
pub const PROFILE_BATCH_SIZE: usize = 100;

/// Refreshes per-tenant embeddings, then the collaborative filtering model. Every 4 hours.
pub struct ModelRefresh;

#[async_trait]
impl Workflow for ModelRefresh {
    fn id(&self) -> &'static str {
        "recsys-model-refresh"
    }

    fn name(&self) -> &'static str {
        "Refresh Recommendation Models"
    }

    fn trigger(&self) -> Trigger {
        Trigger::Cron("0 */4 * * *")
    }

    fn retries(&self) -> u32 {
        2
    }

    async fn run(&self, ctx: &StepContext, _input: &Value) -> Result<Value, WorkflowError> {
        let gateway = ctx.gateway();

        let tenants = ctx
            .step("get-active-tenants", || {
                gateway.send(GatewayRequest::get(Service::Api, "/system/tenants/active"))
            })
            .await?;

        let mut results = Vec::new();
        for tenant in items(&tenants, "active tenants")? {
            let Some(tenant_id) = id_of(&tenant) else {
                continue;
            };

            let refreshed = ctx
                .step(&format!("refresh-embeddings-{}", tenant_id), || {
                    gateway.send(
                        GatewayRequest::post(Service::Recsys, "/refresh/embeddings")
                            .tenant(tenant_id.clone()),
                    )
                })
                .await?;

            let mut result = Map::new();
            result.insert("tenantId".to_string(), json!(tenant_id));
            if let Value::Object(fields) = refreshed {
                result.extend(fields);
            }
            results.push(Value::Object(result));
        }

        ctx.step("refresh-cf-model", || {
            gateway.send(GatewayRequest::post(Service::Recsys, "/refresh/collaborative"))
        })
        .await?;

        tracing::info!("Refreshed recommendation models for {} tenants", results.len());

        Ok(json!({ "refreshed": results.len(), "results": results }))
    }
}

/// Feeds recently active users into the recommendation profiles. Hourly.
pub struct ProfileUpdate;

#[async_trait]
impl Workflow for ProfileUpdate {
    fn id(&self) -> &'static str {
        "user-profile-update"
    }

    fn name(&self) -> &'static str {
        "Update User Recommendation Profiles"
    }

    fn trigger(&self) -> Trigger {
        Trigger::Cron("0 * * * *")
    }

    fn retries(&self) -> u32 {
        2
    }

    async fn run(&self, ctx: &StepContext, _input: &Value) -> Result<Value, WorkflowError> {
        let gateway = ctx.gateway();

        let users = ctx
            .step("get-active-users", || {
                gateway.send(GatewayRequest::get(Service::Api, "/users/recently-active?since=1h"))
            })
            .await?;
        let users = items(&users, "active users")?;

        let mut processed = 0;
        for (index, batch) in users.chunks(PROFILE_BATCH_SIZE).enumerate() {
            let user_ids: Vec<String> = batch.iter().filter_map(id_of).collect();

            ctx.step(&format!("update-profiles-batch-{}", index * PROFILE_BATCH_SIZE), || {
                gateway.send(
                    GatewayRequest::post(Service::Recsys, "/profiles/batch-update")
                        .json(json!({ "userIds": user_ids })),
                )
            })
            .await?;

            processed += batch.len();
        }

        Ok(json!({ "processed": processed }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::gateway::Method;
    use crate::services::testing::FakeGateway;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_model_refresh_runs_per_tenant_then_cf() {
        let gateway = Arc::new(
            FakeGateway::new()
                .json(
                    Service::Api,
                    Method::Get,
                    "/system/tenants/active",
                    json!([{ "id": "t1" }, { "id": "t2" }]),
                )
                .json(Service::Recsys, Method::Post, "/refresh/embeddings", json!({ "items": 12 })),
        );
        let ctx = StepContext::new(gateway.clone());

        let output = ModelRefresh.run(&ctx, &Value::Null).await.unwrap();

        assert_eq!(output["refreshed"], 2);
        assert_eq!(output["results"][1], json!({ "tenantId": "t2", "items": 12 }));

        let requests = gateway.requests();
        let last = requests.last().unwrap();
        assert_eq!(last.path, "/refresh/collaborative");
        assert!(last.tenant_id.is_none());
    }

    #[tokio::test]
    async fn test_profile_update_batches_of_one_hundred() {
        let users: Vec<Value> = (0..250).map(|i| json!({ "id": i })).collect();
        let gateway = Arc::new(FakeGateway::new().json(
            Service::Api,
            Method::Get,
            "/users/recently-active?since=1h",
            Value::Array(users),
        ));
        let ctx = StepContext::new(gateway.clone());

        let output = ProfileUpdate.run(&ctx, &Value::Null).await.unwrap();

        assert_eq!(output, json!({ "processed": 250 }));
        let updates = gateway.requests_to(Method::Post, "/profiles/batch-update");
        let sizes: Vec<usize> = updates
            .iter()
            .map(|r| r.body.as_ref().unwrap()["userIds"].as_array().unwrap().len())
            .collect();
        assert_eq!(sizes, vec![100, 100, 50]);
        assert_eq!(updates[2].body.as_ref().unwrap()["userIds"][0], "200");
        assert!(ctx
            .completed_steps()
            .await
            .contains(&"update-profiles-batch-200".to_string()));
    }
}
