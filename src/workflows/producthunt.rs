//! Product Hunt cache synchronization through the third-party service.
//!
//! These jobs keep the third-party service's cache warm. They use the default
//! retry count, so transient 5xx and 429 answers are retried with backoff.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use super::{StepContext, Trigger, Workflow};
use crate::error::WorkflowError;
use crate::services::gateway::{Gateway, GatewayRequest, Service};

pub const CACHE_WARM_REQUESTED: &str = "integrations/producthunt.warm";

const TRENDING_TOPICS: &[&str] = &["ai", "saas", "developer-tools", "web3", "productivity"];

const FULL_SYNC_TOPICS: &[&str] = &[
    "ai",
    "saas",
    "developer-tools",
    "web3",
    "productivity",
    "marketing",
    "design",
    "fintech",
];

/// `{ count, cached }` summary of a listing reply.
fn listing_summary(reply: &Value, key: &str) -> Value {
    let count = reply.get(key).and_then(Value::as_array).map_or(0, Vec::len);
    json!({ "count": count, "cached": reply.get("cached") })
}

/// Fetch one listing per topic, pausing between requests.
///
/// A failing topic is recorded as `-1` and does not stop the others.
async fn sync_topics(
    gateway: &dyn Gateway,
    topics: &[&str],
    path_for: impl Fn(&str) -> String,
    delay: Duration,
) -> BTreeMap<String, i64> {
    let mut results = BTreeMap::new();

    for (i, &topic) in topics.iter().enumerate() {
        if i > 0 && !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let count = match gateway
            .send(GatewayRequest::get(Service::ThirdParty, path_for(topic)))
            .await
        {
            Ok(reply) => reply
                .get("posts")
                .and_then(Value::as_array)
                .map_or(0, |posts| posts.len() as i64),
            Err(e) => {
                tracing::warn!(topic, "Topic sync failed: {}", e);
                -1
            }
        };
        results.insert(topic.to_string(), count);
    }

    results
}

/// Trending posts, overall and for key topics. Every 30 minutes.
pub struct TrendingSync {
    /// Pause between topic requests.
    pub request_delay: Duration,
}

impl Default for TrendingSync {
    fn default() -> Self {
        Self {
            request_delay: Duration::from_millis(500),
        }
    }
}

#[async_trait]
impl Workflow for TrendingSync {
    fn id(&self) -> &'static str {
        "ph-trending-sync"
    }

    fn name(&self) -> &'static str {
        "Product Hunt Trending Sync"
    }

    fn trigger(&self) -> Trigger {
        Trigger::Cron("*/30 * * * *")
    }

    async fn run(&self, ctx: &StepContext, _input: &Value) -> Result<Value, WorkflowError> {
        tracing::info!("Starting Product Hunt trending sync");
        let gateway = ctx.gateway();
        let delay = self.request_delay;

        let trending = ctx
            .step("sync-trending-all", || async move {
                let reply = gateway
                    .send(GatewayRequest::get(
                        Service::ThirdParty,
                        "/api/v1/producthunt/posts/trending?first=20",
                    ))
                    .await?;
                Ok(listing_summary(&reply, "posts"))
            })
            .await?;

        let topics = ctx
            .step("sync-trending-topics", || async move {
                let results = sync_topics(
                    gateway,
                    TRENDING_TOPICS,
                    |topic| format!("/api/v1/producthunt/posts/trending?first=10&topic={}", topic),
                    delay,
                )
                .await;
                Ok(json!(results))
            })
            .await?;

        tracing::info!("Product Hunt trending sync completed");

        Ok(json!({
            "success": true,
            "trending": trending,
            "topics": topics,
            "syncedAt": chrono::Utc::now().to_rfc3339(),
        }))
    }
}

/// Topics and collections. Daily at midnight.
pub struct TopicsSync;

#[async_trait]
impl Workflow for TopicsSync {
    fn id(&self) -> &'static str {
        "ph-topics-sync"
    }

    fn name(&self) -> &'static str {
        "Product Hunt Topics Sync"
    }

    fn trigger(&self) -> Trigger {
        Trigger::Cron("0 0 * * *")
    }

    async fn run(&self, ctx: &StepContext, _input: &Value) -> Result<Value, WorkflowError> {
        let gateway = ctx.gateway();

        let topics = ctx
            .step("sync-topics", || async move {
                let reply = gateway
                    .send(GatewayRequest::get(
                        Service::ThirdParty,
                        "/api/v1/producthunt/topics?first=100",
                    ))
                    .await?;
                Ok(listing_summary(&reply, "topics"))
            })
            .await?;

        let collections = ctx
            .step("sync-collections", || async move {
                let reply = gateway
                    .send(GatewayRequest::get(
                        Service::ThirdParty,
                        "/api/v1/producthunt/collections?first=20",
                    ))
                    .await?;
                Ok(listing_summary(&reply, "collections"))
            })
            .await?;

        Ok(json!({
            "success": true,
            "topics": topics,
            "collections": collections,
            "syncedAt": chrono::Utc::now().to_rfc3339(),
        }))
    }
}

/// Warms the cache on request.
pub struct CacheWarm;

#[async_trait]
impl Workflow for CacheWarm {
    fn id(&self) -> &'static str {
        "ph-cache-warm"
    }

    fn name(&self) -> &'static str {
        "Product Hunt Cache Warm"
    }

    fn trigger(&self) -> Trigger {
        Trigger::Event(CACHE_WARM_REQUESTED)
    }

    async fn run(&self, ctx: &StepContext, _input: &Value) -> Result<Value, WorkflowError> {
        let gateway = ctx.gateway();

        let result = ctx
            .step("warm-cache", || {
                gateway.send(GatewayRequest::post(
                    Service::ThirdParty,
                    "/api/v1/producthunt/cache/warm",
                ))
            })
            .await?;

        Ok(json!({
            "success": true,
            "warmed": result.get("warmed"),
            "warmedAt": chrono::Utc::now().to_rfc3339(),
        }))
    }
}

/// Weekly rebuild: drop the cache, warm it again, resync every tracked topic.
/// Sundays at 02:00 UTC.
pub struct FullSync {
    pub request_delay: Duration,
}

impl Default for FullSync {
    fn default() -> Self {
        Self {
            request_delay: Duration::from_secs(1),
        }
    }
}

#[async_trait]
impl Workflow for FullSync {
    fn id(&self) -> &'static str {
        "ph-full-sync"
    }

    fn name(&self) -> &'static str {
        "Product Hunt Full Sync"
    }

    fn trigger(&self) -> Trigger {
        Trigger::Cron("0 2 * * 0")
    }

    async fn run(&self, ctx: &StepContext, _input: &Value) -> Result<Value, WorkflowError> {
        let gateway = ctx.gateway();
        let delay = self.request_delay;

        ctx.step("invalidate-cache", || async move {
            let invalidated = gateway
                .send(GatewayRequest::delete(Service::ThirdParty, "/api/v1/producthunt/cache"))
                .await
                .is_ok();
            if !invalidated {
                tracing::warn!("Failed to invalidate cache, continuing anyway");
            }
            Ok(json!({ "invalidated": invalidated }))
        })
        .await?;

        let warmed = ctx
            .step("warm-fresh-cache", || {
                gateway.send(GatewayRequest::post(
                    Service::ThirdParty,
                    "/api/v1/producthunt/cache/warm",
                ))
            })
            .await?;

        let topics = ctx
            .step("sync-all-topics", || async move {
                let results = sync_topics(
                    gateway,
                    FULL_SYNC_TOPICS,
                    |topic| format!("/api/v1/producthunt/posts?first=20&topic={}&order=VOTES", topic),
                    delay,
                )
                .await;
                Ok(json!(results))
            })
            .await?;

        tracing::info!("Product Hunt full sync completed");

        Ok(json!({
            "success": true,
            "warmed": warmed.get("warmed"),
            "topics": topics,
            "syncedAt": chrono::Utc::now().to_rfc3339(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::gateway::Method;
    use crate::services::testing::{FakeGateway, FakeReply};
    use crate::workflows::retry::RetryPolicy;
    use std::sync::Arc;

    #[test]
    fn test_sync_jobs_use_default_retries() {
        let workflows: [&dyn Workflow; 4] = [
            &TrendingSync::default(),
            &TopicsSync,
            &CacheWarm,
            &FullSync::default(),
        ];

        for workflow in workflows {
            assert_eq!(workflow.retries(), RetryPolicy::default().max_retries, "{}", workflow.id());
        }
    }

    #[tokio::test]
    async fn test_trending_sync_records_failed_topics() {
        let gateway = Arc::new(
            FakeGateway::new()
                .json(
                    Service::ThirdParty,
                    Method::Get,
                    "/api/v1/producthunt/posts/trending?first=20",
                    json!({ "posts": [1, 2, 3], "cached": false }),
                )
                .json(
                    Service::ThirdParty,
                    Method::Get,
                    "/api/v1/producthunt/posts/trending?first=10&topic=ai",
                    json!({ "posts": [1, 2] }),
                )
                .reply(
                    Service::ThirdParty,
                    Method::Get,
                    "/api/v1/producthunt/posts/trending?first=10&topic=web3",
                    FakeReply::Status(500),
                ),
        );
        let ctx = StepContext::new(gateway.clone());
        let workflow = TrendingSync {
            request_delay: Duration::ZERO,
        };

        let output = workflow.run(&ctx, &Value::Null).await.unwrap();

        assert_eq!(output["trending"], json!({ "count": 3, "cached": false }));
        assert_eq!(output["topics"]["ai"], 2);
        assert_eq!(output["topics"]["web3"], -1);
        assert_eq!(output["topics"]["saas"], 0);
        assert_eq!(gateway.requests().len(), 1 + TRENDING_TOPICS.len());
    }

    #[tokio::test]
    async fn test_trending_sync_fails_when_listing_fails() {
        let gateway = Arc::new(FakeGateway::new().reply(
            Service::ThirdParty,
            Method::Get,
            "/api/v1/producthunt/posts/trending?first=20",
            FakeReply::Status(503),
        ));
        let ctx = StepContext::new(gateway.clone());

        let result = TrendingSync::default().run(&ctx, &Value::Null).await;

        assert!(matches!(result, Err(WorkflowError::Status { status: 503, .. })));
        assert_eq!(gateway.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_topics_sync_counts_listings() {
        let gateway = Arc::new(
            FakeGateway::new()
                .json(
                    Service::ThirdParty,
                    Method::Get,
                    "/api/v1/producthunt/topics?first=100",
                    json!({ "topics": [1, 2, 3, 4], "cached": true }),
                )
                .json(
                    Service::ThirdParty,
                    Method::Get,
                    "/api/v1/producthunt/collections?first=20",
                    json!({ "collections": [1] }),
                ),
        );
        let ctx = StepContext::new(gateway);

        let output = TopicsSync.run(&ctx, &Value::Null).await.unwrap();

        assert_eq!(output["topics"], json!({ "count": 4, "cached": true }));
        assert_eq!(output["collections"]["count"], 1);
    }

    #[tokio::test]
    async fn test_cache_warm() {
        let gateway = Arc::new(FakeGateway::new().json(
            Service::ThirdParty,
            Method::Post,
            "/api/v1/producthunt/cache/warm",
            json!({ "warmed": 42 }),
        ));
        let ctx = StepContext::new(gateway);

        let output = CacheWarm.run(&ctx, &Value::Null).await.unwrap();

        assert_eq!(output["success"], true);
        assert_eq!(output["warmed"], 42);
    }

    #[tokio::test]
    async fn test_full_sync_continues_when_invalidation_fails() {
        let gateway = Arc::new(
            FakeGateway::new()
                .reply(
                    Service::ThirdParty,
                    Method::Delete,
                    "/api/v1/producthunt/cache",
                    FakeReply::Status(500),
                )
                .json(
                    Service::ThirdParty,
                    Method::Post,
                    "/api/v1/producthunt/cache/warm",
                    json!({ "warmed": 10 }),
                ),
        );
        let ctx = StepContext::new(gateway.clone());
        let workflow = FullSync {
            request_delay: Duration::ZERO,
        };

        let output = workflow.run(&ctx, &Value::Null).await.unwrap();

        assert_eq!(output["warmed"], 10);
        assert_eq!(output["topics"].as_object().unwrap().len(), FULL_SYNC_TOPICS.len());
        let listings = gateway.requests_to(Method::Get, "/api/v1/producthunt/posts?");
        assert_eq!(listings.len(), FULL_SYNC_TOPICS.len());
        assert!(listings[0].path.ends_with("&order=VOTES"));
    }
}
