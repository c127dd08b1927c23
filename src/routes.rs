//! HTTP router.

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post, put},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{handlers, middleware, state::AppState};

pub fn build_router(state: AppState) -> Router {
    // Everything under /api/v1 is called by the API gateway
    let authenticated_routes = Router::new()
        .route("/api/v1/events", post(handlers::events::publish_event))
        .route(
            "/api/v1/events/recent",
            get(handlers::events::recent_events).delete(handlers::events::clear_recent_events),
        )
        .route("/api/v1/events/mappings", get(handlers::events::list_mappings))
        .route(
            "/api/v1/events/mappings/{event_type}",
            put(handlers::events::restore_mapping).delete(handlers::events::pause_mapping),
        )
        // Realtime channels
        .route(
            "/api/v1/realtime/auth",
            post(handlers::realtime::authorize_channel),
        )
        .route("/api/v1/realtime/notify", post(handlers::realtime::notify))
        .route("/api/v1/realtime/trigger", post(handlers::realtime::trigger))
        // Workflows
        .route("/api/v1/workflows", get(handlers::workflows::list_workflows))
        .route(
            "/api/v1/workflows/events",
            post(handlers::workflows::send_workflow_event),
        )
        .route(
            "/api/v1/workflows/{id}/run",
            post(handlers::workflows::run_workflow),
        )
        .route(
            "/api/v1/workflows/runs/{id}",
            get(handlers::workflows::get_run),
        )
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::auth_middleware,
        ));

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .merge(authenticated_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
