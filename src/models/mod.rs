//! Wire types shared between the orchestrator and its collaborators.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Whether a request wants the generated SQL only, or the executed result too.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReturnMode {
    SqlOnly,
    Result,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub question: String,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default = "default_return_mode")]
    pub return_mode: ReturnMode,
}

fn default_return_mode() -> ReturnMode {
    ReturnMode::Result
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub is_select: bool,
    pub allows_data_modification: bool,
    pub blocked_functions: Vec<String>,
    pub message: Option<String>,
}

impl ValidationResult {
    pub fn ok() -> Self {
        Self {
            is_valid: true,
            is_select: true,
            allows_data_modification: false,
            blocked_functions: Vec::new(),
            message: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<HashMap<String, serde_json::Value>>,
    pub row_count: usize,
    pub total_count: i64,
    pub execution_time_ms: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    QuestionTooLong,
    DatabaseNotFound,
    SchemaLoadError,
    LlmError,
    SqlParseError,
    SecurityViolation,
    DatabaseError,
    LowConfidence,
    InternalError,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(str::to_owned))
            .unwrap_or_else(|| "UNKNOWN".to_string());
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default)]
    pub details: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub success: bool,
    pub generated_sql: Option<String>,
    pub validation: Option<ValidationResult>,
    pub data: Option<QueryResult>,
    pub error: Option<ErrorDetail>,
    pub confidence: u8,
    pub tokens_used: Option<u32>,
}

impl QueryResponse {
    pub fn failure(error: ErrorDetail) -> Self {
        Self {
            success: false,
            generated_sql: None,
            validation: None,
            data: None,
            error: Some(error),
            confidence: 0,
            tokens_used: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    pub sql_type: String,
    pub nullable: bool,
    pub is_primary_key: bool,
    pub default_expr: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnSchema>,
    pub row_count_estimate: Option<i64>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSchema {
    pub database: String,
    pub tables: Vec<TableSchema>,
}

impl DatabaseSchema {
    /// Condensed `table(col type, ...)` summary used as LLM prompt context.
    pub fn summarize(&self) -> String {
        let mut out = String::new();
        for table in &self.tables {
            out.push_str(&table.name);
            out.push('(');
            let cols: Vec<String> = table
                .columns
                .iter()
                .map(|c| format!("{} {}", c.name, c.sql_type))
                .collect();
            out.push_str(&cols.join(", "));
            out.push_str(")\n");
        }
        out
    }
}
