//! Stands a fake OpenAI-compatible endpoint up behind `wiremock` so scenario
//! runs exercise the real `AiEnrichmentClient` wire path (request building,
//! retries, circuit breaker, cost accounting) without reaching the network.

use ai_enrichment::schema::ExtractionResult;
use common::utils::config::{AiConfig, BudgetPolicy};
use serde_json::json;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

pub async fn start() -> MockServer {
    MockServer::start().await
}

/// Builds an `AiConfig` pointed at a mock server, generous enough on
/// budget/rate limits that scenarios aren't accidentally throttled.
#[must_use]
pub fn test_ai_config(base_url: &str, embedding_dimensions: u32) -> AiConfig {
    AiConfig {
        openai_api_key: "test-key".to_string(),
        openai_base_url: base_url.to_string(),
        extraction_model: "gpt-test-extraction".to_string(),
        embedding_model: "text-embedding-test".to_string(),
        embedding_dimensions,
        budget_policy: BudgetPolicy::HardGate,
        daily_budget_usd: 1000.0,
        cost_alert_usd: 900.0,
        rate_limit_rps: 1000,
        embed_cache_capacity: 256,
        rate_limit_max_wait_secs: 5,
    }
}

fn chat_completion_body(extraction: &ExtractionResult) -> serde_json::Value {
    let content = serde_json::to_string(extraction).unwrap_or_default();
    json!({
        "id": "chatcmpl-test",
        "object": "chat.completion",
        "created": 0,
        "model": "gpt-test-extraction",
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": content },
            "finish_reason": "stop",
        }],
        "usage": { "prompt_tokens": 42, "completion_tokens": 17, "total_tokens": 59 },
    })
}

/// Stubs a single successful extraction response, consumed once.
pub async fn stub_extraction_once(server: &MockServer, extraction: &ExtractionResult) {
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_completion_body(extraction)))
        .up_to_n_times(1)
        .mount(server)
        .await;
}

/// Stubs `count` consecutive failing extraction calls (used to trip the
/// circuit breaker).
pub async fn stub_extraction_failures(server: &MockServer, count: u64) {
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(count)
        .mount(server)
        .await;
}

/// Stubs a single successful embedding response, consumed once.
pub async fn stub_embedding_once(server: &MockServer, vector: &[f32]) {
    let body = json!({
        "object": "list",
        "data": [{ "object": "embedding", "embedding": vector, "index": 0 }],
        "model": "text-embedding-test",
        "usage": { "prompt_tokens": 8, "total_tokens": 8 },
    });
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .up_to_n_times(1)
        .mount(server)
        .await;
}

/// Stubs an always-on successful extraction response for an unbounded number
/// of calls (used when a scenario processes many rows and doesn't care about
/// distinct extraction content per row).
pub async fn stub_extraction_always(server: &MockServer, extraction: &ExtractionResult) {
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_completion_body(extraction)))
        .mount(server)
        .await;
}

/// Stubs an always-on successful embedding response for an unbounded number
/// of calls.
pub async fn stub_embedding_always(server: &MockServer, vector: &[f32]) {
    let body = json!({
        "object": "list",
        "data": [{ "object": "embedding", "embedding": vector, "index": 0 }],
        "model": "text-embedding-test",
        "usage": { "prompt_tokens": 8, "total_tokens": 8 },
    });
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

#[must_use]
pub fn sample_extraction() -> ExtractionResult {
    ExtractionResult {
        keywords: vec!["pump".to_string(), "vibration".to_string()],
        primary_symptom: "excess vibration".to_string(),
        root_cause: "bearing wear".to_string(),
        summary: "pump bearing replaced after vibration complaint".to_string(),
        solution: "replaced bearing assembly".to_string(),
        solution_type: "repair".to_string(),
        components: vec!["bearing".to_string()],
        processes: vec!["maintenance".to_string()],
        main_component: "bearing".to_string(),
        main_process: "maintenance".to_string(),
        confidence: 0.82,
        model_version: "gpt-test-extraction".to_string(),
    }
}
