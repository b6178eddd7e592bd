//! SQL execution (C7). Grounded on `db.rs`'s resilient-pool composition pattern and
//! the nocodo `PostgresExecutor`'s transaction shape (`BEGIN` → `SET TRANSACTION READ
//! ONLY` → statement timeout → fetch → rollback), generalized to the true-unbounded
//! `total_count` semantics decided in DESIGN.md.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{Column, PgPool, Row, TypeInfo};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::DatabaseConfig;
use crate::models::QueryResult;

#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("failed to connect to database: {0}")]
    Connect(String),
    #[error("query execution failed: {0}")]
    Execution(String),
}

/// Capability boundary for running a validated query against some database.
/// `SqlExecutor` is the only production implementation; tests substitute
/// `FakeExecutor` in-process, mirroring the `LlmClient` indirection in
/// `generator`.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(&self, sql: &str) -> Result<QueryResult, ExecutorError>;
}

pub struct SqlExecutor {
    pool: PgPool,
    max_rows: u32,
    timeout: Duration,
}

impl SqlExecutor {
    pub async fn connect(db_config: &DatabaseConfig, max_rows: u32, timeout: Duration) -> Result<Self, ExecutorError> {
        let pool = PgPoolOptions::new()
            .min_connections(db_config.min_pool_size)
            .max_connections(db_config.max_pool_size)
            .acquire_timeout(Duration::from_secs(db_config.pool_timeout_secs))
            .connect(&db_config.connection_url())
            .await
            .map_err(|e| ExecutorError::Connect(e.to_string()))?;
        Ok(Self { pool, max_rows, timeout })
    }

    pub fn from_pool(pool: PgPool, max_rows: u32, timeout: Duration) -> Self {
        Self { pool, max_rows, timeout }
    }

    /// Runs a validated, single read-only SELECT. The row set is capped at
    /// `max_rows`; `total_count` reports the true unmodified-query row count via a
    /// second statement in the same read-only transaction (see DESIGN.md).
    async fn execute_inner(&self, sql: &str) -> Result<QueryResult, ExecutorError> {
        let start = Instant::now();
        let trimmed = sql.trim().trim_end_matches(';');

        let mut tx = self.pool.begin().await.map_err(|e| ExecutorError::Execution(e.to_string()))?;

        sqlx::query("SET TRANSACTION READ ONLY")
            .execute(&mut *tx)
            .await
            .map_err(|e| ExecutorError::Execution(e.to_string()))?;

        let timeout_ms = self.timeout.as_millis();
        sqlx::query(&format!("SET LOCAL statement_timeout = '{timeout_ms}ms'"))
            .execute(&mut *tx)
            .await
            .map_err(|e| ExecutorError::Execution(e.to_string()))?;

        let count_sql = format!("SELECT count(*) AS _total FROM ({trimmed}) AS _counted");
        let total_count: i64 = sqlx::query_scalar(&count_sql)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| ExecutorError::Execution(e.to_string()))?;

        let limited_sql = format!("SELECT * FROM ({trimmed}) AS _limited LIMIT {}", self.max_rows);
        let rows: Vec<PgRow> = sqlx::query(&limited_sql)
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| ExecutorError::Execution(e.to_string()))?;

        tx.rollback().await.map_err(|e| ExecutorError::Execution(e.to_string()))?;

        let columns: Vec<String> = rows
            .first()
            .map(|r| r.columns().iter().map(|c| c.name().to_string()).collect())
            .unwrap_or_default();

        let result_rows: Vec<HashMap<String, JsonValue>> = rows
            .iter()
            .map(|row| {
                row.columns()
                    .iter()
                    .enumerate()
                    .map(|(i, col)| (col.name().to_string(), extract_value(row, i, col.type_info().name())))
                    .collect()
            })
            .collect();

        Ok(QueryResult {
            row_count: result_rows.len(),
            columns,
            rows: result_rows,
            total_count,
            execution_time_ms: start.elapsed().as_secs_f64() * 1000.0,
        })
    }
}

#[async_trait]
impl QueryExecutor for SqlExecutor {
    async fn execute(&self, sql: &str) -> Result<QueryResult, ExecutorError> {
        self.execute_inner(sql).await
    }
}

fn extract_value(row: &PgRow, index: usize, type_name: &str) -> JsonValue {
    match type_name {
        "BOOL" => row.try_get::<Option<bool>, _>(index).ok().flatten().map(JsonValue::Bool).unwrap_or(JsonValue::Null),
        "INT2" => row
            .try_get::<Option<i16>, _>(index)
            .ok()
            .flatten()
            .map(|v| JsonValue::Number(v.into()))
            .unwrap_or(JsonValue::Null),
        "INT4" => row
            .try_get::<Option<i32>, _>(index)
            .ok()
            .flatten()
            .map(|v| JsonValue::Number(v.into()))
            .unwrap_or(JsonValue::Null),
        "INT8" => row
            .try_get::<Option<i64>, _>(index)
            .ok()
            .flatten()
            .map(|v| JsonValue::Number(v.into()))
            .unwrap_or(JsonValue::Null),
        "FLOAT4" => row
            .try_get::<Option<f32>, _>(index)
            .ok()
            .flatten()
            .and_then(|v| serde_json::Number::from_f64(v as f64))
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        "FLOAT8" | "NUMERIC" => row
            .try_get::<Option<f64>, _>(index)
            .ok()
            .flatten()
            .and_then(serde_json::Number::from_f64)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        "JSONB" | "JSON" => row
            .try_get::<Option<JsonValue>, _>(index)
            .ok()
            .flatten()
            .unwrap_or(JsonValue::Null),
        _ => row
            .try_get::<Option<String>, _>(index)
            .ok()
            .flatten()
            .map(JsonValue::String)
            .unwrap_or(JsonValue::Null),
    }
}

/// Dispatches by database name to the matching pooled executor, or a single
/// default when only one database is configured.
pub struct ExecutorManager {
    executors: HashMap<String, Arc<dyn QueryExecutor>>,
    default_database: Option<String>,
}

#[derive(Debug, thiserror::Error)]
#[error("database '{requested:?}' not found among {available:?}")]
pub struct DatabaseNotFoundError {
    pub requested: Option<String>,
    pub available: Vec<String>,
}

impl ExecutorManager {
    pub fn new(executors: HashMap<String, Arc<dyn QueryExecutor>>, default_database: Option<String>) -> Self {
        Self { executors, default_database }
    }

    pub fn resolve(&self, requested: Option<&str>) -> Result<Arc<dyn QueryExecutor>, DatabaseNotFoundError> {
        let available: Vec<String> = self.executors.keys().cloned().collect();
        match requested {
            Some(name) => self.executors.get(name).cloned().ok_or(DatabaseNotFoundError {
                requested: Some(name.to_string()),
                available,
            }),
            None => {
                if let Some(default) = &self.default_database {
                    return self.executors.get(default).cloned().ok_or(DatabaseNotFoundError {
                        requested: None,
                        available,
                    });
                }
                if self.executors.len() == 1 {
                    return Ok(self.executors.values().next().unwrap().clone());
                }
                Err(DatabaseNotFoundError { requested: None, available })
            }
        }
    }
}

/// In-process test double returning a fixed `QueryResult` regardless of the SQL
/// passed in, so orchestrator tests can drive the execution step without a live
/// database connection.
#[cfg(test)]
pub(crate) struct FakeExecutor {
    pub result: QueryResult,
}

#[cfg(test)]
#[async_trait]
impl QueryExecutor for FakeExecutor {
    async fn execute(&self, _sql: &str) -> Result<QueryResult, ExecutorError> {
        Ok(self.result.clone())
    }
}
