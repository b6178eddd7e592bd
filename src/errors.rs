//! Application error taxonomy (SPEC_FULL.md §7) and its axum surface.
//!
//! Supersedes the teacher's `errors.rs`/`errors/mod.rs`, which target `actix-web` — a
//! framework this crate never depends on (see DESIGN.md).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;
use std::collections::HashMap;
use thiserror::Error;

use crate::models::{ErrorCode, ErrorDetail};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("question exceeds maximum length of {max_length} characters")]
    QuestionTooLong { question_length: usize, max_length: usize },

    #[error("database '{requested:?}' not found")]
    DatabaseNotFound {
        requested: Option<String>,
        available: Vec<String>,
    },

    #[error("failed to load schema for database '{database}': {reason}")]
    SchemaLoadError { database: String, reason: String },

    #[error("{message}")]
    LlmError {
        message: String,
        details: HashMap<String, serde_json::Value>,
    },

    #[error("SQL parse error: {0}")]
    SqlParseError(String),

    #[error("security violation: {0}")]
    SecurityViolation(String),

    #[error("database error: {message}")]
    DatabaseError {
        message: String,
        details: HashMap<String, serde_json::Value>,
    },

    #[error("result confidence {confidence}% is below required threshold of {threshold}%")]
    LowConfidence { confidence: u8, threshold: u8 },

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::QuestionTooLong { .. } => ErrorCode::QuestionTooLong,
            AppError::DatabaseNotFound { .. } => ErrorCode::DatabaseNotFound,
            AppError::SchemaLoadError { .. } => ErrorCode::SchemaLoadError,
            AppError::LlmError { .. } => ErrorCode::LlmError,
            AppError::SqlParseError(_) => ErrorCode::SqlParseError,
            AppError::SecurityViolation(_) => ErrorCode::SecurityViolation,
            AppError::DatabaseError { .. } => ErrorCode::DatabaseError,
            AppError::LowConfidence { .. } => ErrorCode::LowConfidence,
            AppError::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Converts to the wire-level `ErrorDetail`. Never leaks a stack trace or a Rust
    /// `Debug` rendering; only the curated `message`/`details` fields are exposed.
    pub fn to_error_detail(&self) -> ErrorDetail {
        let mut details = HashMap::new();
        match self {
            AppError::QuestionTooLong { question_length, max_length } => {
                details.insert("question_length".into(), json!(question_length));
                details.insert("max_length".into(), json!(max_length));
            }
            AppError::DatabaseNotFound { requested, available } => {
                if let Some(r) = requested {
                    details.insert("requested_database".into(), json!(r));
                }
                details.insert("available_databases".into(), json!(available));
            }
            AppError::SchemaLoadError { database, reason } => {
                details.insert("database".into(), json!(database));
                details.insert("error".into(), json!(reason));
            }
            AppError::LlmError { details: d, .. } => details = d.clone(),
            AppError::DatabaseError { details: d, .. } => details = d.clone(),
            AppError::LowConfidence { confidence, threshold } => {
                details.insert("confidence".into(), json!(confidence));
                details.insert("threshold".into(), json!(threshold));
            }
            AppError::SqlParseError(_) | AppError::SecurityViolation(_) | AppError::Internal(_) => {}
        }
        ErrorDetail {
            code: self.code(),
            message: self.to_string(),
            details,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self.code() {
            ErrorCode::QuestionTooLong => StatusCode::BAD_REQUEST,
            ErrorCode::DatabaseNotFound => StatusCode::NOT_FOUND,
            ErrorCode::SecurityViolation | ErrorCode::SqlParseError => StatusCode::BAD_REQUEST,
            ErrorCode::LowConfidence => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorCode::SchemaLoadError | ErrorCode::LlmError | ErrorCode::DatabaseError => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(self.to_error_detail())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn question_too_long_carries_lengths() {
        let err = AppError::QuestionTooLong { question_length: 5001, max_length: 5000 };
        let detail = err.to_error_detail();
        assert_eq!(detail.code, ErrorCode::QuestionTooLong);
        assert_eq!(detail.details["question_length"], json!(5001));
        assert_eq!(detail.details["max_length"], json!(5000));
    }

    #[test]
    fn database_not_found_lists_available() {
        let err = AppError::DatabaseNotFound {
            requested: None,
            available: vec!["a".into(), "b".into()],
        };
        let detail = err.to_error_detail();
        assert_eq!(detail.details["available_databases"], json!(["a", "b"]));
    }
}
