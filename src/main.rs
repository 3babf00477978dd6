//! SkillCraft Engine - Storage quota accounting for TTRPG worlds
//!
//! The Engine keeps one quota ledger per world:
//! - Applies entity size changes to the ledger, refusing anything over quota
//! - Records every change in an append-only storage event log
//! - Rebuilds and audits ledgers from that log

mod application;
mod domain;
mod infrastructure;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{routing::get, Router};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::infrastructure::config::AppConfig;
use crate::infrastructure::http;
use crate::infrastructure::state::AppState;
use crate::infrastructure::storage_workers::{audit_worker, event_log_worker};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "skillcraft_engine=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting SkillCraft Engine");

    // Load configuration
    let config = AppConfig::from_env()?;
    tracing::info!("Configuration loaded");
    tracing::info!("  Storage backend: {}", config.storage.backend);
    tracing::info!(
        "  Default allocation: {} bytes",
        config.storage.default_allocated_bytes
    );

    // Initialize application state
    let state = AppState::new(config).await?;
    let state = Arc::new(state);
    tracing::info!("Application state initialized");

    // Log every storage event as it is published
    let event_log_task = tokio::spawn(event_log_worker(state.event_bus.subscribe()));

    // Periodic ledger audits
    let audit_task = state.config.storage.audit_interval().map(|interval| {
        let service = Arc::new(state.projection_service.clone());
        tokio::spawn(audit_worker(service, interval))
    });

    tracing::info!(
        subscribers = state.event_bus.subscriber_count(),
        "Background storage workers started"
    );

    // Build the router
    let app = Router::new()
        .route("/health", get(health_check))
        .merge(http::create_routes())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());

    // Start the server
    let addr = SocketAddr::from(([0, 0, 0, 0], state.config.server_port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    let server = axum::serve(listener, app);

    // Wait for shutdown signal (Ctrl+C)
    tokio::select! {
        result = server => {
            if let Err(e) = result {
                tracing::error!("Server error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received, stopping workers...");
            event_log_task.abort();
            if let Some(task) = audit_task {
                task.abort();
            }
            tracing::info!("Workers stopped");
        }
    }

    Ok(())
}

async fn health_check() -> &'static str {
    "OK"
}
