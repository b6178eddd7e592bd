//! SQL generation (C6). Grounded on `orchestrator.py`'s call site
//! (`sql_generator.generate(question, schema, previous_attempt, error_feedback)`) and
//! SPEC_FULL.md §10's LLM-indirection design note: the model provider is abstracted
//! behind a capability trait so the orchestrator is testable without a live API.

use async_trait::async_trait;
use std::collections::HashMap;

use crate::models::DatabaseSchema;

#[derive(Debug, thiserror::Error)]
#[error("LLM call failed: {message}")]
pub struct LlmClientError {
    pub message: String,
    pub details: HashMap<String, serde_json::Value>,
}

impl LlmClientError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), details: HashMap::new() }
    }
}

/// A single completion call, returning the generated text and the tokens the
/// provider reports spending on it (`None` if the provider doesn't report usage).
pub struct Completion {
    pub text: String,
    pub tokens_used: Option<u32>,
}

/// Capability boundary for whatever LLM provider is wired in. `complete` backs SQL
/// generation; `score` backs the advisory result-confidence check in C8. Keeping
/// both behind one trait lets tests substitute `FakeLlmClient` in-process.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<Completion, LlmClientError>;
    async fn score(&self, prompt: &str) -> Result<u8, LlmClientError>;
}

pub struct SqlGenerator {
    client: std::sync::Arc<dyn LlmClient>,
}

impl SqlGenerator {
    pub fn new(client: std::sync::Arc<dyn LlmClient>) -> Self {
        Self { client }
    }

    pub async fn generate(
        &self,
        question: &str,
        schema: &DatabaseSchema,
        previous_attempt: Option<&str>,
        error_feedback: Option<&str>,
    ) -> Result<Completion, LlmClientError> {
        let prompt = build_prompt(question, schema, previous_attempt, error_feedback);
        self.client.complete(&prompt).await
    }
}

fn build_prompt(
    question: &str,
    schema: &DatabaseSchema,
    previous_attempt: Option<&str>,
    error_feedback: Option<&str>,
) -> String {
    let mut prompt = String::new();
    prompt.push_str("You translate a natural-language question into a single read-only PostgreSQL SELECT statement.\n\n");
    prompt.push_str("Schema:\n");
    prompt.push_str(&schema.summarize());
    prompt.push_str("\nQuestion: ");
    prompt.push_str(question);
    prompt.push('\n');
    if let (Some(prev), Some(feedback)) = (previous_attempt, error_feedback) {
        prompt.push_str("\nThe previous attempt was rejected.\nPrevious SQL:\n");
        prompt.push_str(prev);
        prompt.push_str("\nRejection reason: ");
        prompt.push_str(feedback);
        prompt.push_str("\nProduce a corrected query.\n");
    }
    prompt
}

/// In-process test double. Maps substrings of the question (checked in insertion
/// order) to canned SQL, so tests can drive specific orchestrator branches without
/// a network call.
pub struct FakeLlmClient {
    pub responses: Vec<(String, String)>,
    pub score_response: u8,
}

impl FakeLlmClient {
    pub fn new() -> Self {
        Self { responses: Vec::new(), score_response: 100 }
    }

    pub fn with_response(mut self, question_contains: impl Into<String>, sql: impl Into<String>) -> Self {
        self.responses.push((question_contains.into(), sql.into()));
        self
    }

    pub fn with_score(mut self, score: u8) -> Self {
        self.score_response = score;
        self
    }
}

impl Default for FakeLlmClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmClient for FakeLlmClient {
    async fn complete(&self, prompt: &str) -> Result<Completion, LlmClientError> {
        for (needle, sql) in &self.responses {
            if prompt.contains(needle.as_str()) {
                return Ok(Completion { text: sql.clone(), tokens_used: Some(sql.len() as u32) });
            }
        }
        Err(LlmClientError::new("FakeLlmClient: no matching canned response"))
    }

    async fn score(&self, _prompt: &str) -> Result<u8, LlmClientError> {
        Ok(self.score_response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DatabaseSchema;

    #[tokio::test]
    async fn generates_from_canned_response() {
        let client = std::sync::Arc::new(
            FakeLlmClient::new().with_response("how many users", "SELECT count(*) FROM users"),
        );
        let generator = SqlGenerator::new(client);
        let schema = DatabaseSchema { database: "db".into(), tables: vec![] };
        let completion = generator.generate("how many users are there", &schema, None, None).await.unwrap();
        assert_eq!(completion.text, "SELECT count(*) FROM users");
    }

    #[tokio::test]
    async fn unmatched_question_errors() {
        let client = std::sync::Arc::new(FakeLlmClient::new());
        let generator = SqlGenerator::new(client);
        let schema = DatabaseSchema { database: "db".into(), tables: vec![] };
        let result = generator.generate("anything", &schema, None, None).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn retry_prompt_includes_feedback() {
        let client = std::sync::Arc::new(FakeLlmClient::new().with_response("corrected", "SELECT 1"));
        let generator = SqlGenerator::new(client);
        let schema = DatabaseSchema { database: "db".into(), tables: vec![] };
        let prompt = build_prompt("q", &schema, Some("SELECT * FROM x"), Some("blocked table"));
        assert!(prompt.contains("Previous SQL"));
        assert!(prompt.contains("blocked table"));
        let _ = generator.generate("q", &schema, Some("SELECT * FROM x"), Some("blocked table")).await;
    }
}
