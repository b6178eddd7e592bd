//! Result confidence check (C8). Grounded line-for-line on `orchestrator.py`'s
//! `_validate_results_safely`: disabled validation or any failure of the advisory
//! LLM call yields full confidence (100) rather than failing the query — see
//! DESIGN.md's open-question decision for the reasoning.

use std::collections::HashMap;
use std::sync::Arc;

use crate::generator::LlmClient;
use crate::models::QueryResult;

pub struct ResultValidator {
    client: Arc<dyn LlmClient>,
    enabled: bool,
    sample_rows: usize,
}

impl ResultValidator {
    pub fn new(client: Arc<dyn LlmClient>, enabled: bool, sample_rows: usize) -> Self {
        Self { client, enabled, sample_rows }
    }

    /// Never fails: an LLM error during this advisory check is logged and treated
    /// as full confidence, since a failed call carries no signal either way.
    pub async fn validate(&self, question: &str, sql: &str, result: &QueryResult) -> u8 {
        if !self.enabled {
            return 100;
        }

        let prompt = build_prompt(question, sql, result, self.sample_rows);
        match self.client.score(&prompt).await {
            Ok(confidence) => confidence,
            Err(e) => {
                tracing::warn!(error = %e, "result confidence check failed, defaulting to full confidence");
                100
            }
        }
    }
}

fn build_prompt(question: &str, sql: &str, result: &QueryResult, sample_rows: usize) -> String {
    let mut prompt = String::new();
    prompt.push_str("On a scale of 0 to 100, how well do these results answer the question?\n\n");
    prompt.push_str("Question: ");
    prompt.push_str(question);
    prompt.push_str("\nSQL: ");
    prompt.push_str(sql);
    prompt.push_str(&format!("\nRow count: {}\nSample rows:\n", result.total_count));
    for row in result.rows.iter().take(sample_rows) {
        prompt.push_str(&row_to_line(row));
        prompt.push('\n');
    }
    prompt
}

fn row_to_line(row: &HashMap<String, serde_json::Value>) -> String {
    let mut pairs: Vec<String> = row.iter().map(|(k, v)| format!("{k}={v}")).collect();
    pairs.sort();
    pairs.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::FakeLlmClient;

    fn sample_result() -> QueryResult {
        let mut row = HashMap::new();
        row.insert("count".to_string(), serde_json::json!(42));
        QueryResult {
            columns: vec!["count".into()],
            rows: vec![row],
            row_count: 1,
            total_count: 1,
            execution_time_ms: 1.0,
        }
    }

    #[tokio::test]
    async fn disabled_returns_full_confidence() {
        let client: Arc<dyn LlmClient> = Arc::new(FakeLlmClient::new().with_score(10));
        let validator = ResultValidator::new(client, false, 5);
        let confidence = validator.validate("q", "SELECT 1", &sample_result()).await;
        assert_eq!(confidence, 100);
    }

    #[tokio::test]
    async fn enabled_returns_scored_confidence() {
        let client: Arc<dyn LlmClient> = Arc::new(FakeLlmClient::new().with_score(72));
        let validator = ResultValidator::new(client, true, 5);
        let confidence = validator.validate("q", "SELECT 1", &sample_result()).await;
        assert_eq!(confidence, 72);
    }
}
