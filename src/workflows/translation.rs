//! Automatic content translation.

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::{Value, json};

use super::{StepContext, Trigger, Workflow, items, required_str, string_field};
use crate::error::WorkflowError;
use crate::services::gateway::{GatewayRequest, Service};

pub const TRANSLATE_REQUESTED: &str = "content/translate.requested";

/// Translates a content item into every requested language.
///
/// # Input
///
/// ```json
/// { "contentId": "c1", "sourceLanguage": "en", "targetLanguages": ["fr", "de"], "tenantId": "42" }
/// ```
///
/// Translations run concurrently, one step per language, and are saved
/// together once all of them succeed.
pub struct AutoTranslate;

#[async_trait]
impl Workflow for AutoTranslate {
    fn id(&self) -> &'static str {
        "auto-translate-content"
    }

    fn name(&self) -> &'static str {
        "Auto Translate Content"
    }

    fn trigger(&self) -> Trigger {
        Trigger::Event(TRANSLATE_REQUESTED)
    }

    fn retries(&self) -> u32 {
        3
    }

    async fn run(&self, ctx: &StepContext, input: &Value) -> Result<Value, WorkflowError> {
        let content_id = required_str(input, "contentId")?;
        let tenant_id = required_str(input, "tenantId")?;
        let source_language = string_field(input, "sourceLanguage");
        let languages: Vec<String> = items(
            input.get("targetLanguages").unwrap_or(&Value::Null),
            "targetLanguages",
        )?
        .iter()
        .filter_map(|l| l.as_str().map(str::to_string))
        .collect();

        let gateway = ctx.gateway();

        let content = ctx
            .step("fetch-content", || {
                gateway.send(
                    GatewayRequest::get(Service::Api, format!("/content/{}", content_id))
                        .tenant(tenant_id.clone()),
                )
            })
            .await?;
        let body = content.get("body").cloned().unwrap_or(Value::Null);

        let translations = join_all(languages.iter().map(|language| {
            let step = format!("translate-to-{}", language);
            let request = GatewayRequest::post(Service::Api, "/ai/translate")
                .tenant(tenant_id.clone())
                .json(json!({
                    "text": body,
                    "sourceLang": source_language,
                    "targetLang": language,
                }));

            async move {
                ctx.step(&step, || async move {
                    let reply = gateway.send(request).await?;
                    Ok(json!({
                        "language": language,
                        "text": reply.get("text").cloned().unwrap_or(Value::Null),
                    }))
                })
                .await
            }
        }))
        .await
        .into_iter()
        .collect::<Result<Vec<Value>, WorkflowError>>()?;

        ctx.step("save-translations", || {
            gateway.send(
                GatewayRequest::post(Service::Api, format!("/content/{}/translations", content_id))
                    .tenant(tenant_id.clone())
                    .json(json!({ "translations": translations })),
            )
        })
        .await?;

        tracing::info!(content_id = %content_id, languages = languages.len(), "Content translated");

        Ok(json!({ "success": true, "translatedTo": languages }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::gateway::Method;
    use crate::services::testing::{FakeGateway, FakeReply};
    use std::sync::Arc;

    fn input() -> Value {
        json!({
            "contentId": "c1",
            "sourceLanguage": "en",
            "targetLanguages": ["fr", "de"],
            "tenantId": "42",
        })
    }

    fn gateway() -> FakeGateway {
        FakeGateway::new()
            .json(Service::Api, Method::Get, "/content/c1", json!({ "body": "Hello" }))
            .json(Service::Api, Method::Post, "/ai/translate", json!({ "text": "Bonjour" }))
    }

    #[tokio::test]
    async fn test_translates_each_language_and_saves() {
        let gateway = Arc::new(gateway());
        let ctx = StepContext::new(gateway.clone());

        let output = AutoTranslate.run(&ctx, &input()).await.unwrap();

        assert_eq!(output, json!({ "success": true, "translatedTo": ["fr", "de"] }));

        let translate = gateway.requests_to(Method::Post, "/ai/translate");
        assert_eq!(translate.len(), 2);
        assert!(translate.iter().all(|r| r.tenant_id.as_deref() == Some("42")));
        assert_eq!(translate[0].body.as_ref().unwrap()["text"], "Hello");

        let saved = gateway.requests_to(Method::Post, "/content/c1/translations");
        assert_eq!(saved.len(), 1);
        let body = saved[0].body.as_ref().unwrap();
        assert_eq!(body["translations"][0], json!({ "language": "fr", "text": "Bonjour" }));
        assert_eq!(body["translations"][1]["language"], "de");
    }

    #[tokio::test]
    async fn test_retry_skips_completed_steps() {
        let gateway = Arc::new(gateway().reply(
            Service::Api,
            Method::Post,
            "/content/c1/translations",
            FakeReply::Status(503),
        ));
        let ctx = StepContext::new(gateway.clone());

        let err = AutoTranslate.run(&ctx, &input()).await.unwrap_err();
        assert!(err.is_retryable());

        // A second attempt reuses the fetched content and translations.
        let _ = AutoTranslate.run(&ctx, &input()).await;
        assert_eq!(gateway.requests_to(Method::Get, "/content/c1").len(), 1);
        assert_eq!(gateway.requests_to(Method::Post, "/ai/translate").len(), 2);
        assert_eq!(gateway.requests_to(Method::Post, "/content/c1/translations").len(), 2);
    }

    #[tokio::test]
    async fn test_missing_content_id_is_permanent() {
        let ctx = StepContext::new(Arc::new(FakeGateway::new()));

        let err = AutoTranslate
            .run(&ctx, &json!({ "tenantId": "42" }))
            .await
            .unwrap_err();

        assert!(matches!(err, WorkflowError::MissingInput("contentId")));
        assert!(!err.is_retryable());
    }
}
