//! Internal API key authentication middleware.
//!
//! Requests reach this service through the API gateway, which has already
//! authenticated the end user. This middleware:
//! 1. Checks the shared internal key in the Authorization header
//! 2. Reads the identity headers the gateway injected
//! 3. Inserts an `AuthContext` into the request
//! 4. Rejects anything else with HTTP 401

use crate::{error::AppError, services::channel_auth::ChannelUser, state::AppState};
use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use sha2::{Digest, Sha256};

pub const USER_ID_HEADER: &str = "x-user-id";
pub const TENANT_ID_HEADER: &str = "x-tenant-id";
pub const USER_NAME_HEADER: &str = "x-user-name";

/// Identity of the end user a request is made for.
///
/// Handlers extract it with `Extension<AuthContext>`.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthContext {
    pub user_id: String,

    /// Tenant the user is acting in, if any
    pub tenant_id: Option<String>,

    pub user_name: Option<String>,
}

impl AuthContext {
    pub fn channel_user(&self) -> ChannelUser {
        ChannelUser {
            id: self.user_id.clone(),
            tenant_id: self.tenant_id.clone(),
            name: self.user_name.clone(),
        }
    }
}

/// Hex SHA-256 of an API key.
pub fn hash_api_key(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

/// Authentication middleware function.
///
/// # Headers
///
/// ```text
/// Authorization: Bearer <INTERNAL_API_KEY>
/// x-user-id: u-7
/// x-tenant-id: 42        (optional)
/// x-user-name: Ada       (optional)
/// ```
///
/// # Returns
///
/// - `Ok(Response)` from the next handler when the key and user id are present
/// - `Err(AppError::Unauthorized)` otherwise (401)
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let api_key = request
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or(AppError::Unauthorized)?;

    if hash_api_key(api_key) != *state.api_key_hash {
        tracing::warn!("Rejected request with invalid internal API key");
        return Err(AppError::Unauthorized);
    }

    let auth_context = context_from_headers(request.headers()).ok_or(AppError::Unauthorized)?;
    request.extensions_mut().insert(auth_context);

    Ok(next.run(request).await)
}

fn context_from_headers(headers: &HeaderMap) -> Option<AuthContext> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|h| h.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };

    Some(AuthContext {
        user_id: header(USER_ID_HEADER)?,
        tenant_id: header(TENANT_ID_HEADER),
        user_name: header(USER_NAME_HEADER),
    })
}
