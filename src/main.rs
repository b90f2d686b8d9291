//! toolgate server entry point.
//!
//! Starts the Axum HTTP server with REST, RPC and WebSocket endpoints,
//! the event fan-out task and the idle-connection sweep.

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use toolgate::api;
use toolgate::app_state::AppState;
use toolgate::builtins::register_builtin_tools;
use toolgate::config::GatewayConfig;
use toolgate::domain::{EventBus, ToolRegistry};
use toolgate::persistence::{KvStore, MemoryKvStore, PostgresKvStore};
use toolgate::service::{AuthService, ConnectionManager, ToolService};
use toolgate::ws::broadcast::spawn_event_fanout;
use toolgate::ws::handler::ws_handler;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration
    let config = Arc::new(
        GatewayConfig::from_env().map_err(|e| anyhow::anyhow!("configuration: {e}"))?,
    );
    tracing::info!(addr = %config.listen_addr, "starting toolgate");

    // Persistence: PostgreSQL when enabled, in-memory otherwise
    let store: Arc<dyn KvStore> = if config.persistence_enabled {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .acquire_timeout(std::time::Duration::from_secs(
                config.database_connect_timeout_secs,
            ))
            .connect(&config.database_url)
            .await?;
        let store = PostgresKvStore::new(pool);
        store
            .ensure_schema()
            .await
            .map_err(|e| anyhow::anyhow!("schema setup: {e}"))?;
        tracing::info!("using postgresql store");
        Arc::new(store)
    } else {
        tracing::info!("using in-memory store");
        Arc::new(MemoryKvStore::new())
    };

    // Domain + service layer
    let registry = Arc::new(ToolRegistry::new());
    register_builtin_tools(&registry)
        .await
        .map_err(|e| anyhow::anyhow!("builtin tools: {e}"))?;

    let event_bus = EventBus::new(config.event_bus_capacity);
    let auth = Arc::new(AuthService::new(Arc::clone(&store), &config));
    let connections = Arc::new(ConnectionManager::new(Arc::clone(&store), &config));
    let tools = Arc::new(ToolService::new(registry));

    // Build application state
    let app_state = AppState {
        config: Arc::clone(&config),
        auth,
        connections: Arc::clone(&connections),
        tools,
        event_bus,
    };

    // Background tasks: event fan-out and idle sweep
    let fanout = spawn_event_fanout(app_state.clone());
    connections.start_sweep(config.sweep_interval).await;

    // Build router
    let app = Router::new()
        .merge(api::build_router())
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(app_state);

    // Start server
    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Drain: cancel the sweep and close remaining connections
    connections.shutdown().await;
    fanout.abort();
    tracing::info!("toolgate stopped");

    Ok(())
}

/// Resolves when the process receives SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
    tracing::info!("shutdown signal received");
}
