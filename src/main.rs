//! Binary entry point. Mirrors the teacher's `main.rs` wiring style (config load →
//! tracing init → pool construction → `ServiceBuilder` middleware → `axum::serve`),
//! reduced to the health-only HTTP surface this core exposes — the NL-to-SQL
//! pipeline is invoked through `orchestrator::QueryOrchestrator`, not an HTTP route.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::Router;
use sqlx::postgres::PgPoolOptions;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use pg_mcp_gateway::config::{self, AppConfig};
use pg_mcp_gateway::health::{self, HealthState};

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, Json(serde_json::json!({ "error": "not found" })))
}

async fn connect_pools(config: &AppConfig) -> Result<HashMap<String, sqlx::PgPool>, sqlx::Error> {
    let mut pools = HashMap::new();
    for (name, db_config) in &config.database {
        info!(database = %name, "connecting to database");
        let pool = PgPoolOptions::new()
            .min_connections(db_config.min_pool_size)
            .max_connections(db_config.max_pool_size)
            .acquire_timeout(Duration::from_secs(db_config.pool_timeout_secs))
            .connect(&db_config.connection_url())
            .await?;
        pools.insert(name.clone(), pool);
    }
    Ok(pools)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = config::load_config()?;
    config::init_tracing(&config.observability.log_level, config.observability.log_json);

    info!("pg-mcp-gateway starting");

    let pools = connect_pools(&config).await.map_err(|e| {
        error!("failed to connect to configured databases: {}", e);
        e
    })?;

    let health_state = HealthState::new(Arc::new(pools));

    let middleware = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any));

    let app = Router::new()
        .merge(health::health_routes(health_state))
        .fallback(not_found)
        .layer(middleware);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
