//! Application configuration, layered and validated the way the teacher's
//! `config.rs`/`load_config` does it — see DESIGN.md.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

const DEFAULT_ENV: &str = "development";
const CONFIG_DIR: &str = "config";

#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    pub host: String,
    #[serde(default = "default_db_port")]
    pub port: u16,
    pub name: String,
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_min_pool_size")]
    pub min_pool_size: u32,
    #[serde(default = "default_max_pool_size")]
    pub max_pool_size: u32,
    #[serde(default = "default_pool_timeout_secs")]
    pub pool_timeout_secs: u64,
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
}

impl DatabaseConfig {
    pub fn connection_url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, self.name
        )
    }
}

#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct LlmConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct SecurityConfig {
    /// Must remain false for this core; kept explicit rather than implied, so a
    /// misconfigured deployment fails loudly instead of silently.
    #[serde(default)]
    #[validate(custom = "validate_no_write_operations")]
    pub allow_write_operations: bool,
    #[serde(default)]
    pub blocked_functions: Vec<String>,
    #[serde(default = "default_max_rows")]
    #[validate(range(min = 1))]
    pub max_rows: u32,
    #[serde(default = "default_max_execution_time_secs")]
    pub max_execution_time_secs: u64,
    #[serde(default)]
    pub blocked_tables: Vec<String>,
    #[serde(default)]
    pub blocked_columns: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub allow_explain: bool,
    #[serde(default)]
    pub require_where_clause: Vec<String>,
    #[serde(default = "default_max_join_tables")]
    #[validate(range(min = 1))]
    pub max_join_tables: u32,
}

fn validate_no_write_operations(value: &bool) -> Result<(), ValidationError> {
    if *value {
        let mut err = ValidationError::new("allow_write_operations");
        err.message = Some("this core never allows write operations".into());
        return Err(err);
    }
    Ok(())
}

#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct ValidationConfig {
    #[serde(default = "default_max_question_length")]
    #[validate(range(min = 1))]
    pub max_question_length: usize,
    #[serde(default = "default_min_confidence_score")]
    pub min_confidence_score: u8,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_sample_rows")]
    pub sample_rows: usize,
    #[serde(default = "default_validation_timeout_secs")]
    pub timeout_seconds: u64,
    #[serde(default = "default_min_confidence_score")]
    pub confidence_threshold: u8,
}

#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    #[serde(default = "default_schema_ttl_secs")]
    pub schema_ttl_secs: u64,
    #[serde(default = "default_cache_max_size")]
    pub max_size: usize,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct ResilienceConfig {
    #[serde(default = "default_max_retries")]
    #[validate(range(min = 1))]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    #[serde(default = "default_circuit_breaker_threshold")]
    pub circuit_breaker_threshold: u32,
    #[serde(default = "default_circuit_breaker_timeout_secs")]
    pub circuit_breaker_timeout_secs: u64,
    #[serde(default = "default_rate_limit_permits_per_sec")]
    pub rate_limit_permits_per_sec: f64,
}

#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct ObservabilityConfig {
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_json: bool,
}

#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_environment")]
    pub environment: String,

    #[validate]
    pub database: HashMap<String, DatabaseConfig>,
    #[serde(default)]
    pub default_database: Option<String>,

    #[validate]
    pub llm: LlmConfig,
    #[validate]
    pub security: SecurityConfig,
    #[validate]
    pub validation: ValidationConfig,
    #[validate]
    pub cache: CacheConfig,
    #[validate]
    pub resilience: ResilienceConfig,
    #[validate]
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }
}

#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("configuration loading failed: {0}")]
    Load(#[from] ConfigError),
    #[error("configuration validation failed: {0}")]
    Validation(#[from] ValidationErrors),
}

fn default_db_port() -> u16 {
    5432
}
fn default_min_pool_size() -> u32 {
    1
}
fn default_max_pool_size() -> u32 {
    10
}
fn default_pool_timeout_secs() -> u64 {
    8
}
fn default_command_timeout_secs() -> u64 {
    30
}
fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_max_tokens() -> u32 {
    1024
}
fn default_temperature() -> f64 {
    0.0
}
fn default_llm_timeout_secs() -> u64 {
    20
}
fn default_max_rows() -> u32 {
    1000
}
fn default_max_execution_time_secs() -> u64 {
    30
}
fn default_max_join_tables() -> u32 {
    5
}
fn default_max_question_length() -> usize {
    5000
}
fn default_min_confidence_score() -> u8 {
    60
}
fn default_sample_rows() -> usize {
    10
}
fn default_validation_timeout_secs() -> u64 {
    10
}
fn default_schema_ttl_secs() -> u64 {
    300
}
fn default_cache_max_size() -> usize {
    100
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    200
}
fn default_backoff_factor() -> f64 {
    2.0
}
fn default_circuit_breaker_threshold() -> u32 {
    5
}
fn default_circuit_breaker_timeout_secs() -> u64 {
    60
}
fn default_rate_limit_permits_per_sec() -> f64 {
    10.0
}
fn default_metrics_port() -> u16 {
    9090
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_environment() -> String {
    DEFAULT_ENV.to_string()
}
fn default_true() -> bool {
    true
}

/// Initializes tracing using the configured log level as the default filter.
///
/// Mirrors the teacher's `config::init_tracing`, minus the optional OpenTelemetry
/// pipeline (dropped, see DESIGN.md: no OTLP collector is in scope here).
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("pg_mcp_gateway={level},tower_http=debug");
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt().with_env_filter(EnvFilter::new(filter_directive)).json().try_init();
    } else {
        let _ = fmt().with_env_filter(EnvFilter::new(filter_directive)).try_init();
    }
}

/// Loads application configuration, layering `config/default.toml`,
/// `config/{environment}.toml`, and `APP__`-prefixed environment variables.
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            CONFIG_DIR
        );
    }

    let builder = Config::builder()
        .set_default("host", default_host())?
        .set_default("port", default_port() as i64)?
        .set_default("environment", default_environment())?
        .add_source(File::with_name(&format!("{CONFIG_DIR}/default")).required(false))
        .add_source(File::with_name(&format!("{CONFIG_DIR}/{run_env}")).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"));

    let config = builder.build()?;
    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> AppConfig {
        let mut databases = HashMap::new();
        databases.insert(
            "db".to_string(),
            DatabaseConfig {
                host: "localhost".into(),
                port: default_db_port(),
                name: "app".into(),
                user: "app".into(),
                password: "secret".into(),
                min_pool_size: default_min_pool_size(),
                max_pool_size: default_max_pool_size(),
                pool_timeout_secs: default_pool_timeout_secs(),
                command_timeout_secs: default_command_timeout_secs(),
            },
        );
        AppConfig {
            host: default_host(),
            port: default_port(),
            environment: default_environment(),
            database: databases,
            default_database: Some("db".into()),
            llm: LlmConfig {
                api_key: "test".into(),
                model: default_llm_model(),
                max_tokens: default_max_tokens(),
                temperature: default_temperature(),
                timeout_secs: default_llm_timeout_secs(),
            },
            security: SecurityConfig {
                allow_write_operations: false,
                blocked_functions: vec![],
                max_rows: default_max_rows(),
                max_execution_time_secs: default_max_execution_time_secs(),
                blocked_tables: vec![],
                blocked_columns: HashMap::new(),
                allow_explain: false,
                require_where_clause: vec![],
                max_join_tables: default_max_join_tables(),
            },
            validation: ValidationConfig {
                max_question_length: default_max_question_length(),
                min_confidence_score: default_min_confidence_score(),
                enabled: true,
                sample_rows: default_sample_rows(),
                timeout_seconds: default_validation_timeout_secs(),
                confidence_threshold: default_min_confidence_score(),
            },
            cache: CacheConfig {
                schema_ttl_secs: default_schema_ttl_secs(),
                max_size: default_cache_max_size(),
                enabled: true,
            },
            resilience: ResilienceConfig {
                max_retries: default_max_retries(),
                retry_delay_ms: default_retry_delay_ms(),
                backoff_factor: default_backoff_factor(),
                circuit_breaker_threshold: default_circuit_breaker_threshold(),
                circuit_breaker_timeout_secs: default_circuit_breaker_timeout_secs(),
                rate_limit_permits_per_sec: default_rate_limit_permits_per_sec(),
            },
            observability: ObservabilityConfig {
                metrics_enabled: true,
                metrics_port: default_metrics_port(),
                log_level: default_log_level(),
                log_json: false,
            },
        }
    }

    #[test]
    fn valid_config_passes_validation() {
        assert!(base().validate().is_ok());
    }

    #[test]
    fn write_operations_rejected() {
        let mut cfg = base();
        cfg.security.allow_write_operations = true;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_max_rows_rejected() {
        let mut cfg = base();
        cfg.security.max_rows = 0;
        assert!(cfg.validate().is_err());
    }
}
