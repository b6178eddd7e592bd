//! Metric emission through the `metrics` crate facade (SPEC_FULL.md §10.2).
//!
//! Installing a recorder and hosting `/metrics` is left to the deployer; this module
//! only names and emits the counters/histograms the orchestrator is responsible for.

use metrics::{counter, histogram};

pub fn record_query_request(status: &str, database: &str) {
    counter!("query_requests_total", "status" => status.to_string(), "database" => database.to_string()).increment(1);
}

pub fn observe_query_duration(seconds: f64) {
    histogram!("query_duration_seconds").record(seconds);
}

pub fn record_llm_call(operation: &str) {
    counter!("llm_calls_total", "operation" => operation.to_string()).increment(1);
}

pub fn observe_llm_latency(operation: &str, seconds: f64) {
    histogram!("llm_latency_seconds", "operation" => operation.to_string()).record(seconds);
}

pub fn record_llm_tokens(operation: &str, tokens: u32) {
    counter!("llm_tokens_total", "operation" => operation.to_string()).increment(tokens as u64);
}

pub fn observe_db_query_duration(seconds: f64) {
    histogram!("db_query_duration_seconds").record(seconds);
}

pub fn record_sql_rejected(code: &str) {
    counter!("sql_rejected_total", "code" => code.to_string()).increment(1);
}
