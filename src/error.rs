//! Error types and HTTP error response handling.
//!
//! This module defines the errors of each layer and how the HTTP-facing
//! `AppError` is converted into responses with appropriate status codes and JSON bodies.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::services::event_bridge::BridgeClosed;

/// Errors from the realtime vendor client.
#[derive(Debug, thiserror::Error)]
pub enum RealtimeError {
    /// Transport failure (connection refused, timeout, TLS).
    #[error("Realtime request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The vendor answered with a non-success status.
    #[error("Realtime API returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Batch of {0} events exceeds the vendor limit of 10")]
    BatchTooLarge(usize),

    #[error("Failed to encode realtime payload: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Invalid channel name: {0}")]
    InvalidChannel(String),

    #[error("Invalid socket id: {0}")]
    InvalidSocketId(String),

    /// A chunked notification stopped part way; earlier chunks were delivered.
    #[error("Notification stopped after {delivered} recipients: {source}")]
    PartialBatch {
        delivered: usize,
        #[source]
        source: Box<RealtimeError>,
    },
}

impl RealtimeError {
    /// Whether the request itself was rejected before reaching the vendor.
    pub fn is_invalid_request(&self) -> bool {
        match self {
            RealtimeError::InvalidChannel(_)
            | RealtimeError::InvalidSocketId(_)
            | RealtimeError::BatchTooLarge(_)
            | RealtimeError::Encode(_) => true,
            RealtimeError::PartialBatch { source, .. } => source.is_invalid_request(),
            RealtimeError::Http(_) | RealtimeError::Status { .. } => false,
        }
    }
}

/// Errors raised inside workflow steps.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    /// Transport failure talking to an internal service.
    #[error("Gateway request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// An internal service answered with a non-success status.
    #[error("{service} returned {status} for {path}")]
    Status {
        service: &'static str,
        path: String,
        status: u16,
    },

    /// A response or step output had an unexpected shape.
    #[error("Failed to decode {context}: {reason}")]
    Decode { context: String, reason: String },

    /// The trigger payload lacks a required field.
    #[error("Missing input field: {0}")]
    MissingInput(&'static str),

    #[error("Step '{step}' failed: {reason}")]
    StepFailed { step: String, reason: String },
}

impl WorkflowError {
    /// Whether re-running the workflow could succeed.
    ///
    /// Transport errors, 5xx and 429 responses are transient. Other
    /// statuses and malformed input are permanent.
    pub fn is_retryable(&self) -> bool {
        match self {
            WorkflowError::Transport(_) => true,
            WorkflowError::Status { status, .. } => *status >= 500 || *status == 429,
            WorkflowError::Decode { .. } | WorkflowError::MissingInput(_) => false,
            WorkflowError::StepFailed { .. } => true,
        }
    }

    pub fn decode(context: impl Into<String>, reason: impl ToString) -> Self {
        WorkflowError::Decode {
            context: context.into(),
            reason: reason.to_string(),
        }
    }
}

/// Errors returned by the workflow scheduler handle.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Unknown workflow: {0}")]
    NotFound(String),

    #[error("Workflow {0} is already running")]
    AlreadyRunning(String),

    #[error("Scheduler has shut down")]
    Closed,

    #[error("Failed to record workflow run: {0}")]
    Store(#[from] sqlx::Error),
}

/// Application-wide HTTP error type.
///
/// Each variant maps to a specific HTTP status code and error message.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Database operation failed (e.g., connection error, query error).
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Internal API key is missing or wrong, or identity headers are absent.
    ///
    /// Returns HTTP 401 Unauthorized.
    #[error("Unauthorized")]
    Unauthorized,

    /// Authenticated caller may not access the resource.
    ///
    /// Returns HTTP 403 Forbidden with the reason.
    #[error("{0}")]
    Forbidden(String),

    /// Request body or parameters are invalid.
    ///
    /// Returns HTTP 400 Bad Request.
    #[error("Invalid request")]
    InvalidRequest(String),

    #[error("Workflow not found")]
    WorkflowNotFound,

    #[error("Workflow run not found")]
    RunNotFound,

    /// No bridge mapping (or default rule) exists for the event type.
    #[error("No realtime mapping for event type {0}")]
    MappingNotFound(String),

    /// Returns HTTP 409 Conflict.
    #[error("Workflow is already running")]
    WorkflowAlreadyRunning,

    /// The workflow scheduler has shut down.
    #[error("Scheduler unavailable")]
    SchedulerUnavailable,

    /// The event bridge task has shut down.
    #[error("Event bridge unavailable")]
    BridgeUnavailable,

    /// Upstream realtime vendor failure.
    ///
    /// Returns HTTP 502 Bad Gateway.
    #[error("Realtime error: {0}")]
    Realtime(#[from] RealtimeError),
}

impl From<BridgeClosed> for AppError {
    fn from(_: BridgeClosed) -> Self {
        AppError::BridgeUnavailable
    }
}

impl From<SchedulerError> for AppError {
    fn from(e: SchedulerError) -> Self {
        match e {
            SchedulerError::NotFound(_) => AppError::WorkflowNotFound,
            SchedulerError::AlreadyRunning(_) => AppError::WorkflowAlreadyRunning,
            SchedulerError::Closed => AppError::SchedulerUnavailable,
            SchedulerError::Store(e) => AppError::Database(e),
        }
    }
}

/// Convert AppError into an HTTP response.
///
/// # Response Format
///
/// All errors return JSON in this format:
/// ```json
/// {
///   "error": {
///     "code": "error_type",
///     "message": "Human-readable error message"
///   }
/// }
/// ```
///
/// # Status Code Mapping
///
/// - `Unauthorized` → 401 Unauthorized
/// - `Forbidden` → 403 Forbidden
/// - `WorkflowNotFound`, `RunNotFound`, `MappingNotFound` → 404 Not Found
/// - `WorkflowAlreadyRunning` → 409 Conflict
/// - `InvalidRequest`, invalid channel/socket → 400 Bad Request
/// - `Realtime` → 502 Bad Gateway
/// - `SchedulerUnavailable`, `BridgeUnavailable` → 503 Service Unavailable
/// - `Database` → 500 Internal Server Error (hides details from client)
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized", self.to_string()),
            AppError::Forbidden(ref reason) => (StatusCode::FORBIDDEN, "forbidden", reason.clone()),
            AppError::InvalidRequest(ref msg) => {
                (StatusCode::BAD_REQUEST, "invalid_request", msg.clone())
            }
            AppError::WorkflowNotFound => {
                (StatusCode::NOT_FOUND, "workflow_not_found", self.to_string())
            }
            AppError::RunNotFound => (StatusCode::NOT_FOUND, "run_not_found", self.to_string()),
            AppError::MappingNotFound(_) => {
                (StatusCode::NOT_FOUND, "mapping_not_found", self.to_string())
            }
            AppError::WorkflowAlreadyRunning => {
                (StatusCode::CONFLICT, "workflow_running", self.to_string())
            }
            AppError::SchedulerUnavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                "scheduler_unavailable",
                self.to_string(),
            ),
            AppError::BridgeUnavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                "bridge_unavailable",
                self.to_string(),
            ),
            AppError::Realtime(ref e) if e.is_invalid_request() => {
                (StatusCode::BAD_REQUEST, "invalid_request", e.to_string())
            }
            AppError::Realtime(ref e) => {
                tracing::error!("Realtime vendor error: {}", e);
                (
                    StatusCode::BAD_GATEWAY,
                    "realtime_error",
                    "Realtime delivery failed".to_string(),
                )
            }
            AppError::Database(ref e) => {
                tracing::error!("Database error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_errors_classified_by_code() {
        let status = |code| WorkflowError::Status {
            service: "gateway",
            path: "/content/1".to_string(),
            status: code,
        };

        assert!(status(500).is_retryable());
        assert!(status(503).is_retryable());
        assert!(status(429).is_retryable());
        assert!(!status(404).is_retryable());
        assert!(!status(400).is_retryable());
    }

    #[test]
    fn test_input_errors_are_permanent() {
        assert!(!WorkflowError::MissingInput("contentId").is_retryable());
        assert!(!WorkflowError::decode("tenants", "expected array").is_retryable());
    }

    #[test]
    fn test_rejected_requests_look_through_partial_batches() {
        let wrapped = |source| RealtimeError::PartialBatch {
            delivered: 0,
            source: Box::new(source),
        };

        assert!(RealtimeError::BatchTooLarge(11).is_invalid_request());
        assert!(wrapped(RealtimeError::InvalidChannel("private-user-a b".into())).is_invalid_request());
        assert!(!wrapped(RealtimeError::Status { status: 500, body: String::new() }).is_invalid_request());
    }

    #[test]
    fn test_app_error_status_codes() {
        let cases = [
            (AppError::Unauthorized, StatusCode::UNAUTHORIZED),
            (AppError::Forbidden("Not channel owner".into()), StatusCode::FORBIDDEN),
            (AppError::InvalidRequest("x".into()), StatusCode::BAD_REQUEST),
            (AppError::WorkflowNotFound, StatusCode::NOT_FOUND),
            (AppError::WorkflowAlreadyRunning, StatusCode::CONFLICT),
            (SchedulerError::Closed.into(), StatusCode::SERVICE_UNAVAILABLE),
            (
                SchedulerError::NotFound("nope".into()).into(),
                StatusCode::NOT_FOUND,
            ),
            (
                AppError::Realtime(RealtimeError::InvalidSocketId("x".into())),
                StatusCode::BAD_REQUEST,
            ),
            (
                AppError::Realtime(RealtimeError::Status { status: 500, body: String::new() }),
                StatusCode::BAD_GATEWAY,
            ),
            (
                AppError::Realtime(RealtimeError::PartialBatch {
                    delivered: 10,
                    source: Box::new(RealtimeError::InvalidChannel("private-user-a b".into())),
                }),
                StatusCode::BAD_REQUEST,
            ),
            (
                AppError::Realtime(RealtimeError::PartialBatch {
                    delivered: 10,
                    source: Box::new(RealtimeError::Status { status: 503, body: String::new() }),
                }),
                StatusCode::BAD_GATEWAY,
            ),
        ];

        for (error, expected) in cases {
            assert_eq!(error.into_response().status(), expected);
        }
    }
}
