//! Realtime channel endpoints.
//!
//! - POST /api/v1/realtime/auth - Sign a private or presence subscription
//! - POST /api/v1/realtime/notify - Send one event to many users
//! - POST /api/v1/realtime/trigger - Send one event to a channel, tenant, or user

use crate::{
    error::AppError,
    middleware::auth::AuthContext,
    models::{
        channel::ChannelKind,
        realtime::{
            ChannelAuthRequest, ChannelAuthResponse, NotifyUsersRequest, NotifyUsersResponse,
            TriggerEventRequest, realtime_events,
        },
    },
    services::{
        channel_auth::validate_channel_access,
        realtime_service::{broadcast_to_tenant, notify_user, notify_users, trigger_event},
    },
    state::AppState,
};
use axum::{Extension, Form, Json, extract::State, http::StatusCode};

/// Authorize a channel subscription.
///
/// # Endpoint
///
/// `POST /api/v1/realtime/auth` (form encoded, as sent by the client library)
///
/// ```text
/// socket_id=1234.1234&channel_name=private-tenant-42
/// ```
///
/// # Response
///
/// - **200 OK**: `{ "auth": "key:signature" }`, plus `channel_data` for presence channels
/// - **400**: Missing or malformed `socket_id` / `channel_name`, or a public channel
/// - **403**: Caller may not join the channel (`User not in tenant`, `Not channel owner`)
pub async fn authorize_channel(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Form(request): Form<ChannelAuthRequest>,
) -> Result<Json<ChannelAuthResponse>, AppError> {
    if request.socket_id.is_empty() || request.channel_name.is_empty() {
        return Err(AppError::InvalidRequest(
            "Missing socket_id or channel_name".to_string(),
        ));
    }

    let kind = ChannelKind::parse(&request.channel_name);
    if !kind.requires_auth() {
        return Err(AppError::InvalidRequest(
            "Public channels do not need authorization".to_string(),
        ));
    }

    let user = auth.channel_user();
    validate_channel_access(&user, &request.channel_name).map_err(|reason| {
        tracing::warn!(
            user_id = %user.id,
            channel = %request.channel_name,
            "Channel access denied: {}",
            reason
        );
        AppError::Forbidden(reason)
    })?;

    let presence = match kind {
        ChannelKind::Presence(_) => Some(user.presence_data()),
        _ => None,
    };

    let response = state
        .authorizer
        .authorize(&request.socket_id, &request.channel_name, presence)?;

    Ok(Json(response))
}

/// Notify many users at once.
///
/// # Endpoint
///
/// `POST /api/v1/realtime/notify`
///
/// ```json
/// { "user_ids": ["u1", "u2"], "event": "notification", "data": { "title": "Hi" } }
/// ```
///
/// Recipients are sent in batches of ten, in order.
pub async fn notify(
    State(state): State<AppState>,
    Json(request): Json<NotifyUsersRequest>,
) -> Result<Json<NotifyUsersResponse>, AppError> {
    if request.event.is_empty() {
        return Err(AppError::InvalidRequest("Event name is required".to_string()));
    }

    let batches = notify_users(
        state.broadcaster.as_ref(),
        &request.user_ids,
        &request.event,
        &request.data,
    )
    .await?;

    Ok(Json(NotifyUsersResponse {
        recipients: request.user_ids.len(),
        batches,
    }))
}

/// Send one event to a single target.
///
/// # Endpoint
///
/// `POST /api/v1/realtime/trigger`
///
/// ```json
/// { "tenant_id": "42", "event": "record:updated", "data": { "id": "c-1" } }
/// ```
///
/// Exactly one of `channel`, `tenant_id`, `user_id` must be set.
///
/// # Response
///
/// - **204 No Content**: Delivered to the vendor
/// - **400**: No target, several targets, or an invalid channel name
/// - **502**: Vendor failure
pub async fn trigger(
    State(state): State<AppState>,
    Json(request): Json<TriggerEventRequest>,
) -> Result<StatusCode, AppError> {
    if request.event.is_empty() {
        return Err(AppError::InvalidRequest("Event name is required".to_string()));
    }
    if !realtime_events::is_client_event(&request.event) {
        tracing::debug!(event = %request.event, "Triggering event without a built-in client listener");
    }

    let broadcaster = state.broadcaster.as_ref();
    let (event, data) = (&request.event, &request.data);
    match (&request.channel, &request.tenant_id, &request.user_id) {
        (Some(channel), None, None) => trigger_event(broadcaster, channel, event, data).await?,
        (None, Some(tenant_id), None) => {
            broadcast_to_tenant(broadcaster, tenant_id, event, data).await?
        }
        (None, None, Some(user_id)) => notify_user(broadcaster, user_id, event, data).await?,
        _ => {
            return Err(AppError::InvalidRequest(
                "Exactly one of channel, tenant_id, user_id is required".to_string(),
            ));
        }
    }

    Ok(StatusCode::NO_CONTENT)
}
