//! Domain event ingestion.
//!
//! - POST /api/v1/events - Publish an event on the bus
//! - GET/DELETE /api/v1/events/recent - Inspect or clear the recent event log
//! - GET /api/v1/events/mappings - List event types forwarded to realtime
//! - PUT/DELETE /api/v1/events/mappings/{event_type} - Restore or pause forwarding

use crate::{
    error::AppError,
    middleware::auth::AuthContext,
    models::event::{Event, EventMappingInfo, PublishEventRequest, PublishEventResponse},
    services::event_bridge::EventMappings,
    state::AppState,
};
use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};

/// Publish a domain event.
///
/// # Endpoint
///
/// `POST /api/v1/events`
///
/// # Request Body
///
/// ```json
/// {
///   "type": "order.created",
///   "data": { "orderId": "o-1", "userId": "u-7" },
///   "source": "billing",
///   "tenant_id": "42"
/// }
/// ```
///
/// `tenant_id` defaults to the caller's tenant and `source` to `api`.
/// Handlers on the bus (including the realtime bridge) run before the
/// response is sent.
///
/// # Response
///
/// - **202 Accepted**: `{ "id", "event_type", "timestamp" }`
/// - **400**: Empty event type
pub async fn publish_event(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<PublishEventRequest>,
) -> Result<(StatusCode, Json<PublishEventResponse>), AppError> {
    let event_type = request.event_type.trim();
    if event_type.is_empty() {
        return Err(AppError::InvalidRequest("Event type is required".to_string()));
    }

    let mut event = Event::new(event_type, request.data)
        .with_source(request.source.unwrap_or_else(|| "api".to_string()));
    if let Some(tenant_id) = request.tenant_id.or(auth.tenant_id) {
        event = event.with_tenant(tenant_id);
    }
    if let Some(correlation_id) = request.correlation_id {
        event = event.with_correlation(correlation_id);
    }

    let response = PublishEventResponse::from(&event);
    let handled = state.bus.publish(event).await;
    tracing::debug!(event_type = %response.event_type, handled, "Event published");

    Ok((StatusCode::ACCEPTED, Json(response)))
}

/// Recently published events, oldest first.
pub async fn recent_events(State(state): State<AppState>) -> Json<Vec<Event>> {
    Json(state.bus.recent_events().await)
}

pub async fn clear_recent_events(State(state): State<AppState>) -> StatusCode {
    state.bus.clear_log().await;
    StatusCode::NO_CONTENT
}

pub async fn list_mappings(
    State(state): State<AppState>,
) -> Result<Json<Vec<EventMappingInfo>>, AppError> {
    let mut mappings = Vec::new();
    for event_type in state.bridge.event_types().await? {
        let subscribers = state.bus.subscriber_count(&event_type).await;
        mappings.push(EventMappingInfo {
            event_type,
            subscribers,
        });
    }
    Ok(Json(mappings))
}

/// Stop forwarding an event type to realtime channels.
///
/// # Endpoint
///
/// `DELETE /api/v1/events/mappings/{event_type}`
///
/// - **204 No Content**: Forwarding stopped
/// - **404**: The event type was not forwarded
pub async fn pause_mapping(
    State(state): State<AppState>,
    Path(event_type): Path<String>,
) -> Result<StatusCode, AppError> {
    if !state.bridge.remove_mapping(&event_type).await? {
        return Err(AppError::MappingNotFound(event_type));
    }
    tracing::info!(event_type = %event_type, "Realtime forwarding paused");
    Ok(StatusCode::NO_CONTENT)
}

/// Resume forwarding an event type with its built-in rule.
///
/// # Endpoint
///
/// `PUT /api/v1/events/mappings/{event_type}`
///
/// - **204 No Content**: Forwarding active
/// - **404**: No built-in rule exists for the event type
pub async fn restore_mapping(
    State(state): State<AppState>,
    Path(event_type): Path<String>,
) -> Result<StatusCode, AppError> {
    let rule = EventMappings::defaults()
        .get(&event_type)
        .cloned()
        .ok_or_else(|| AppError::MappingNotFound(event_type.clone()))?;

    state.bridge.add_mapping(event_type.as_str(), rule).await?;
    tracing::info!(event_type = %event_type, "Realtime forwarding restored");
    Ok(StatusCode::NO_CONTENT)
}
