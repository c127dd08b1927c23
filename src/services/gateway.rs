//! HTTP access to the internal services called by workflows.
//!
//! Every request targets one of the configured base URLs. Tenant-scoped
//! requests carry the `x-tenant-id` header; internal endpoints carry the
//! shared bearer key.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::Config;
use crate::error::WorkflowError;

pub const TENANT_HEADER: &str = "x-tenant-id";

/// Internal service a request is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Service {
    /// `API_GATEWAY_URL`
    Api,
    /// `RECSYS_SERVICE_URL`
    Recsys,
    /// `ECOMMERCE_SERVICE_URL`
    Ecommerce,
    /// `THIRD_PARTY_SERVICE_URL`
    ThirdParty,
    /// `SLACK_WEBHOOK_URL`, path is ignored
    Slack,
}

impl Service {
    pub fn name(&self) -> &'static str {
        match self {
            Service::Api => "api-gateway",
            Service::Recsys => "recsys",
            Service::Ecommerce => "ecommerce",
            Service::ThirdParty => "third-party",
            Service::Slack => "slack",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Patch,
    Delete,
}

/// One outbound request.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayRequest {
    pub service: Service,
    pub method: Method,
    /// Path and query, starting with `/`.
    pub path: String,
    pub tenant_id: Option<String>,
    pub body: Option<Value>,
    /// Send `Authorization: Bearer <INTERNAL_API_KEY>`.
    pub internal: bool,
    pub headers: Vec<(String, String)>,
}

impl GatewayRequest {
    fn new(service: Service, method: Method, path: impl Into<String>) -> Self {
        Self {
            service,
            method,
            path: path.into(),
            tenant_id: None,
            body: None,
            internal: false,
            headers: Vec::new(),
        }
    }

    pub fn get(service: Service, path: impl Into<String>) -> Self {
        Self::new(service, Method::Get, path)
    }

    pub fn post(service: Service, path: impl Into<String>) -> Self {
        Self::new(service, Method::Post, path)
    }

    pub fn patch(service: Service, path: impl Into<String>) -> Self {
        Self::new(service, Method::Patch, path)
    }

    pub fn delete(service: Service, path: impl Into<String>) -> Self {
        Self::new(service, Method::Delete, path)
    }

    pub fn tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    /// Set the tenant header only when a tenant is known.
    pub fn tenant_opt(mut self, tenant_id: Option<String>) -> Self {
        self.tenant_id = tenant_id;
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn internal(mut self) -> Self {
        self.internal = true;
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Sends requests to internal services and decodes JSON replies.
///
/// Non-success statuses become `WorkflowError::Status`; an empty body
/// decodes to `null`.
#[async_trait]
pub trait Gateway: Send + Sync {
    async fn send(&self, request: GatewayRequest) -> Result<Value, WorkflowError>;
}

/// Base URLs of the internal services.
#[derive(Debug, Clone)]
pub struct ServiceUrls {
    pub api: String,
    pub recsys: String,
    pub ecommerce: String,
    pub third_party: String,
    pub slack: Option<String>,
}

impl ServiceUrls {
    pub fn from_config(config: &Config) -> Self {
        Self {
            api: config.api_gateway_url.clone(),
            recsys: config.recsys_service_url.clone(),
            ecommerce: config.ecommerce_service_url.clone(),
            third_party: config.third_party_service_url.clone(),
            slack: config.slack_webhook_url.clone(),
        }
    }

    fn url_for(&self, service: Service, path: &str) -> Option<String> {
        let base = match service {
            Service::Api => &self.api,
            Service::Recsys => &self.recsys,
            Service::Ecommerce => &self.ecommerce,
            Service::ThirdParty => &self.third_party,
            Service::Slack => return self.slack.clone(),
        };
        Some(format!("{}{}", base.trim_end_matches('/'), path))
    }
}

/// reqwest-backed gateway. Requests time out after 30 seconds.
pub struct HttpGateway {
    http: reqwest::Client,
    urls: ServiceUrls,
    internal_api_key: String,
}

impl HttpGateway {
    pub fn new(urls: ServiceUrls, internal_api_key: impl Into<String>) -> Result<Self, WorkflowError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            urls,
            internal_api_key: internal_api_key.into(),
        })
    }
}

#[async_trait]
impl Gateway for HttpGateway {
    async fn send(&self, request: GatewayRequest) -> Result<Value, WorkflowError> {
        let url = self.urls.url_for(request.service, &request.path).ok_or_else(|| {
            WorkflowError::StepFailed {
                step: request.service.name().to_string(),
                reason: "service URL is not configured".to_string(),
            }
        })?;

        let mut builder = match request.method {
            Method::Get => self.http.get(&url),
            Method::Post => self.http.post(&url),
            Method::Patch => self.http.patch(&url),
            Method::Delete => self.http.delete(&url),
        };

        if let Some(ref tenant_id) = request.tenant_id {
            builder = builder.header(TENANT_HEADER, tenant_id);
        }
        if request.internal {
            builder = builder.bearer_auth(&self.internal_api_key);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            tracing::warn!(
                service = request.service.name(),
                path = %request.path,
                status = status.as_u16(),
                "Gateway request rejected"
            );
            return Err(WorkflowError::Status {
                service: request.service.name(),
                path: request.path,
                status: status.as_u16(),
            });
        }

        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| WorkflowError::decode(request.path, e))
    }
}
