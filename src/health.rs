//! Liveness/readiness endpoints. Grounded on `health/mod.rs`'s `HealthStatus`/
//! `HealthInfo`/handler shape, trimmed to the liveness/readiness/version subset this
//! service needs and ported from `sea_orm::DatabaseConnection::ping` to `sqlx::PgPool`.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Up,
    Down,
}

#[derive(Serialize, Debug, Clone)]
pub struct HealthInfo {
    pub status: HealthStatus,
    pub version: String,
    pub timestamp: DateTime<Utc>,
    pub uptime_seconds: u64,
    pub databases: HashMap<String, HealthStatus>,
}

#[derive(Clone)]
pub struct HealthState {
    pub pools: Arc<HashMap<String, sqlx::PgPool>>,
    pub start_time: SystemTime,
}

impl HealthState {
    pub fn new(pools: Arc<HashMap<String, sqlx::PgPool>>) -> Self {
        Self { pools, start_time: SystemTime::now() }
    }

    fn uptime(&self) -> u64 {
        SystemTime::now().duration_since(self.start_time).unwrap_or(Duration::ZERO).as_secs()
    }

    async fn probe_databases(&self) -> HashMap<String, HealthStatus> {
        let mut statuses = HashMap::new();
        for (name, pool) in self.pools.iter() {
            let status = match sqlx::query("SELECT 1").execute(pool).await {
                Ok(_) => HealthStatus::Up,
                Err(e) => {
                    tracing::error!(database = %name, error = %e, "database health check failed");
                    HealthStatus::Down
                }
            };
            statuses.insert(name.clone(), status);
        }
        statuses
    }
}

pub fn health_routes(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(liveness))
        .route("/health/live", get(liveness))
        .route("/health/ready", get(readiness))
        .with_state(state)
}

async fn liveness() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "up" })))
}

async fn readiness(State(state): State<HealthState>) -> impl IntoResponse {
    let databases = state.probe_databases().await;
    let all_up = databases.values().all(|s| *s == HealthStatus::Up);

    let info = HealthInfo {
        status: if all_up { HealthStatus::Up } else { HealthStatus::Down },
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
        uptime_seconds: state.uptime(),
        databases,
    };

    let code = if all_up { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (code, Json(info))
}
