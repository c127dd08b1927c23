//! Shopify inventory and order synchronization.

use async_trait::async_trait;
use serde_json::{Value, json};

use super::{StepContext, Trigger, Workflow, id_of, items, required_str, string_field};
use crate::error::WorkflowError;
use crate::services::gateway::{GatewayRequest, Service};

pub const SHOPIFY_ORDER_CREATED: &str = "shopify/order.created";

/// Pulls every Shopify-connected tenant's products into the catalog every 15 minutes.
pub struct InventorySync;

#[async_trait]
impl Workflow for InventorySync {
    fn id(&self) -> &'static str {
        "shopify-inventory-sync"
    }

    fn name(&self) -> &'static str {
        "Sync Shopify Inventory"
    }

    fn trigger(&self) -> Trigger {
        Trigger::Cron("*/15 * * * *")
    }

    fn retries(&self) -> u32 {
        3
    }

    async fn run(&self, ctx: &StepContext, _input: &Value) -> Result<Value, WorkflowError> {
        let gateway = ctx.gateway();

        let tenants = ctx
            .step("get-shopify-tenants", || {
                gateway.send(GatewayRequest::get(Service::Api, "/integrations/shopify/tenants"))
            })
            .await?;
        let tenants = items(&tenants, "shopify tenants")?;

        let mut results = Vec::with_capacity(tenants.len());
        for tenant in &tenants {
            let Some(tenant_id) = id_of(tenant) else {
                continue;
            };
            let tenant_id = tenant_id.as_str();

            let products = ctx
                .step(&format!("fetch-shopify-products-{}", tenant_id), || {
                    let mut request =
                        GatewayRequest::get(Service::Ecommerce, "/shopify/products").tenant(tenant_id);
                    if let Some(token) = string_field(tenant, "shopifyToken") {
                        request = request.header("x-shopify-token", token);
                    }
                    gateway.send(request)
                })
                .await?;

            let synced = ctx
                .step(&format!("sync-products-{}", tenant_id), || {
                    gateway.send(
                        GatewayRequest::post(Service::Ecommerce, "/products/sync")
                            .tenant(tenant_id)
                            .json(json!({ "products": products })),
                    )
                })
                .await?;

            results.push(json!({
                "tenantId": tenant_id,
                "synced": synced.get("synced"),
                "errors": synced.get("errors"),
            }));
        }

        Ok(json!({ "tenants": results.len(), "results": results }))
    }
}

/// Imports an order placed on Shopify: creates it, adjusts stock, emails the customer.
///
/// # Input
///
/// ```json
/// { "tenantId": "42", "order": { "id": 1001, "line_items": [...], "total_price": "19.99", "customer": {...} } }
/// ```
pub struct ProcessShopifyOrder;

#[async_trait]
impl Workflow for ProcessShopifyOrder {
    fn id(&self) -> &'static str {
        "process-shopify-order"
    }

    fn name(&self) -> &'static str {
        "Process Shopify Order"
    }

    fn trigger(&self) -> Trigger {
        Trigger::Event(SHOPIFY_ORDER_CREATED)
    }

    fn retries(&self) -> u32 {
        3
    }

    async fn run(&self, ctx: &StepContext, input: &Value) -> Result<Value, WorkflowError> {
        let tenant_id = required_str(input, "tenantId")?;
        let tenant_id = tenant_id.as_str();
        let order = input.get("order").ok_or(WorkflowError::MissingInput("order"))?;
        let order_id = id_of(order).ok_or(WorkflowError::MissingInput("order.id"))?;
        let order_id = order_id.as_str();
        let line_items = items(order.get("line_items").unwrap_or(&Value::Null), "line_items")?;
        let gateway = ctx.gateway();

        let created = ctx
            .step("create-order", || {
                gateway.send(
                    GatewayRequest::post(Service::Ecommerce, "/orders")
                        .tenant(tenant_id)
                        .json(json!({
                            "externalId": order.get("id"),
                            "source": "shopify",
                            "items": line_items,
                            "total": order.get("total_price"),
                            "customer": order.get("customer"),
                        })),
                )
            })
            .await?;

        ctx.step("update-inventory", || async move {
            for item in &line_items {
                let Some(product_id) = string_field(item, "product_id") else {
                    tracing::warn!(order_id, "Line item without product id");
                    continue;
                };
                let quantity = item.get("quantity").and_then(Value::as_i64).unwrap_or(0);

                gateway
                    .send(
                        GatewayRequest::patch(
                            Service::Ecommerce,
                            format!("/products/{}/inventory", product_id),
                        )
                        .tenant(tenant_id)
                        .json(json!({
                            "adjustment": -quantity,
                            "reason": format!("Order {}", order_id),
                        })),
                    )
                    .await?;
            }
            Ok(json!({ "adjusted": line_items.len() }))
        })
        .await?;

        let customer_email = order.get("customer").and_then(|c| c.get("email"));
        ctx.step("send-confirmation", || {
            gateway.send(
                GatewayRequest::post(Service::Api, "/email/send")
                    .tenant(tenant_id)
                    .json(json!({
                        "template": "order-confirmation",
                        "to": customer_email,
                        "data": { "order": created },
                    })),
            )
        })
        .await?;

        Ok(json!({ "orderId": created.get("id"), "success": true }))
    }
}
