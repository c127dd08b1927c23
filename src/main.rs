//! Tenant Relay - Main Application Entry Point
//!
//! Backend companion of a multi-tenant SaaS platform. It forwards domain
//! events to realtime channels, authorizes channel subscriptions, and runs
//! durable background workflows on cron schedules and trigger events.
//!
//! # Architecture
//!
//! - **Web Framework**: Axum (async HTTP server)
//! - **Database**: PostgreSQL with sqlx (workflow run history)
//! - **Realtime**: Pusher HTTP API, signed with HMAC-SHA256
//! - **Authentication**: Internal API key plus gateway identity headers
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment variables
//! 2. Create database connection pool and run migrations
//! 3. Build the realtime client, gateway, event bus, and event bridge
//! 4. Start the workflow scheduler
//! 5. Serve HTTP until ctrl-c, then shut everything down in order

mod config;
mod db;
mod error;
mod handlers;
mod middleware;
mod models;
mod routes;
mod services;
mod state;
mod workflows;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use services::{
    channel_auth::ChannelAuthorizer,
    event_bridge::{EventBridge, EventMappings},
    event_bus::EventBus,
    gateway::{HttpGateway, ServiceUrls},
    realtime_service::{PusherClient, PusherSettings},
    run_store::PgRunStore,
};
use workflows::{runner::WorkflowRunner, scheduler::WorkflowScheduler};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging with tracing subscriber. Reads RUST_LOG environment variable (defaults to "info" level)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    // Load configuration
    let config = config::Config::from_env()?;
    tracing::info!("Configuration loaded");

    // Create database pool
    let pool = db::create_pool(&config.database_url).await?;
    tracing::info!("Database pool created");

    // Run migrations
    db::run_migrations(&pool).await?;
    tracing::info!("Database migrations complete");

    let run_store = Arc::new(PgRunStore::new(pool.clone()));
    let stale = run_store.mark_stale_runs_failed().await?;
    if stale > 0 {
        tracing::warn!("Marked {} interrupted workflow runs as failed", stale);
    }

    // Outbound clients, built once and shared
    let pusher_settings = PusherSettings::from_config(&config);
    let authorizer = Arc::new(ChannelAuthorizer::from_settings(&pusher_settings));
    let broadcaster = Arc::new(PusherClient::new(pusher_settings)?);
    let gateway = Arc::new(HttpGateway::new(
        ServiceUrls::from_config(&config),
        config.internal_api_key.clone(),
    )?);

    // Event bus with the realtime bridge subscribed
    let bus = Arc::new(EventBus::new());
    let bridge = EventBridge::start(bus.clone(), broadcaster.clone(), EventMappings::defaults()).await;

    // Workflows
    let cancel = CancellationToken::new();
    let runner = WorkflowRunner::new(gateway, run_store.clone(), config.retry_policy());
    let (scheduler, scheduler_task) = WorkflowScheduler::new(workflows::registry(&config), runner)?
        .with_cron(config.scheduler_enabled)
        .spawn(cancel.clone());

    let app_state = state::AppState {
        bus,
        bridge: bridge.clone(),
        broadcaster,
        authorizer,
        scheduler,
        runs: run_store,
        pool: Some(pool),
        api_key_hash: middleware::auth::hash_api_key(&config.internal_api_key).into(),
    };
    let app = routes::build_router(app_state);

    // Bind to network address and start server
    let addr = format!("0.0.0.0:{}", config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
        }
        tracing::info!("Shutdown signal received");
        shutdown.cancel();
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(cancel.clone().cancelled_owned())
        .await?;

    if let Err(e) = scheduler_task.await {
        tracing::error!("Workflow scheduler task failed: {}", e);
    }
    if let Err(e) = bridge.shutdown().await {
        tracing::warn!("{}", e);
    }
    tracing::info!("Shutdown complete");

    Ok(())
}
