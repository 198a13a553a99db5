use std::sync::Arc;
use std::time::Duration;

use async_openai::types::{
    ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage,
    CreateChatCompletionRequestArgs, CreateEmbeddingRequestArgs, ResponseFormat,
    ResponseFormatJsonSchema,
};
use common::{
    error::{AiError, AppError},
    progress::{Alert, AlertKind, AlertSink, ProgressCounters},
    resilience::{
        backoff::{retry_with_backoff, BackoffPolicy},
        circuit_breaker::CircuitBreaker,
    },
    utils::config::AiConfig,
};
use tracing::{debug, warn};

use crate::{
    cache::EmbedCache,
    cost::CostTracker,
    rate_limiter::TokenBucket,
    schema::{extraction_json_schema, ExtractionResult, EXTRACTION_SYSTEM_MESSAGE},
};

/// Structured-output extraction retries up to this many times with an
/// instruction-stiffened prompt before the row is quarantined.
const MAX_PARSE_RETRIES: usize = 2;

/// Cost model: OpenAI-style per-1k-token pricing. A fixed approximation is
/// used rather than fetching live pricing: callers need an estimated USD
/// figure, not billing-grade precision.
const PROMPT_COST_PER_1K_USD: f64 = 0.0005;
const COMPLETION_COST_PER_1K_USD: f64 = 0.0015;
const EMBED_COST_PER_1K_USD: f64 = 0.0001;

/// Rough token estimate used to pre-check budget before making a network
/// call.
fn estimate_tokens(text: &str) -> u32 {
    #[allow(clippy::cast_possible_truncation)]
    let estimate = (text.chars().count() / 4).max(1) as u32;
    estimate
}

/// AI enrichment client: wraps `async_openai` chat/embeddings calls with a
/// rate limiter, circuit breaker, embed cache, and cost accounting.
pub struct AiEnrichmentClient {
    openai_client: async_openai::Client<async_openai::config::OpenAIConfig>,
    config: AiConfig,
    rate_limiter: TokenBucket,
    circuit_breaker: CircuitBreaker,
    backoff_policy: BackoffPolicy,
    cache: EmbedCache,
    cost_tracker: CostTracker,
    counters: Arc<ProgressCounters>,
    alert_sink: Arc<dyn AlertSink>,
    run_id: String,
}

impl AiEnrichmentClient {
    #[must_use]
    pub fn new(
        config: AiConfig,
        counters: Arc<ProgressCounters>,
        alert_sink: Arc<dyn AlertSink>,
        run_id: String,
    ) -> Self {
        let openai_config = async_openai::config::OpenAIConfig::new()
            .with_api_key(&config.openai_api_key)
            .with_api_base(&config.openai_base_url);
        let openai_client = async_openai::Client::with_config(openai_config);

        let rate_limiter = TokenBucket::new(
            config.rate_limit_rps,
            Duration::from_secs(config.rate_limit_max_wait_secs),
        );
        let circuit_breaker = CircuitBreaker::new("ai-endpoint", 5, Duration::from_secs(60));
        let backoff_policy = BackoffPolicy::default();
        let cache = EmbedCache::new(config.embed_cache_capacity);
        let cost_tracker = CostTracker::new(&config, Arc::clone(&alert_sink), run_id.clone());

        Self {
            openai_client,
            config,
            rate_limiter,
            circuit_breaker,
            backoff_policy,
            cache,
            cost_tracker,
            counters,
            alert_sink,
            run_id,
        }
    }

    /// Runs structured extraction against the configured chat model.
    pub async fn extract(&self, text: &str) -> Result<ExtractionResult, AppError> {
        let estimated_prompt_tokens = estimate_tokens(text) + estimate_tokens(EXTRACTION_SYSTEM_MESSAGE);
        let estimated_cost = f64::from(estimated_prompt_tokens) / 1000.0 * PROMPT_COST_PER_1K_USD;
        self.cost_tracker.pre_check(estimated_cost).await?;

        if !self.circuit_breaker.allow_call() {
            return Err(AppError::Ai(AiError::CircuitOpen("ai-endpoint".to_string())));
        }
        self.rate_limiter.acquire().await?;

        let mut last_err = None;
        for attempt in 0..=MAX_PARSE_RETRIES {
            let stiffened = attempt > 0;
            match self.try_extract_once(text, stiffened).await {
                Ok((result, prompt_tokens, completion_tokens)) => {
                    self.circuit_breaker.record_success();
                    let cost = Self::extraction_cost(prompt_tokens, completion_tokens);
                    self.cost_tracker.record_spend(cost).await;
                    self.counters
                        .record_ai_call(u64::from(prompt_tokens), u64::from(completion_tokens), cost);
                    return Ok(result);
                }
                Err(err) => {
                    warn!(attempt, error = %err, "structured extraction attempt failed");
                    last_err = Some(err);
                }
            }
        }

        self.circuit_breaker.record_failure();
        Err(last_err.unwrap_or(AppError::LLMParsing(
            "extraction failed with no recorded error".to_string(),
        )))
    }

    async fn try_extract_once(
        &self,
        text: &str,
        stiffened: bool,
    ) -> Result<(ExtractionResult, u32, u32), AppError> {
        let system_message = if stiffened {
            format!(
                "{EXTRACTION_SYSTEM_MESSAGE} Your previous response did not match the required \
                 JSON schema exactly. Return ONLY a JSON object with exactly the required fields."
            )
        } else {
            EXTRACTION_SYSTEM_MESSAGE.to_string()
        };

        let response_format = ResponseFormat::JsonSchema {
            json_schema: ResponseFormatJsonSchema {
                description: Some("Structured extraction of a scrubbed work order".into()),
                name: "work_order_extraction".into(),
                schema: Some(extraction_json_schema()),
                strict: Some(true),
            },
        };

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.config.extraction_model)
            .messages([
                ChatCompletionRequestSystemMessage::from(system_message).into(),
                ChatCompletionRequestUserMessage::from(text).into(),
            ])
            .response_format(response_format)
            .build()?;

        let response = retry_with_backoff(self.backoff_policy, "ai-extract-call", || {
            let request = request.clone();
            async move { self.openai_client.chat().create(request).await }
        })
        .await?;

        let usage = response.usage.as_ref();
        let prompt_tokens = usage.map_or(0, |u| u.prompt_tokens);
        let completion_tokens = usage.map_or(0, |u| u.completion_tokens);

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.as_ref())
            .ok_or_else(|| AppError::LLMParsing("no content in extraction response".to_string()))?;

        let mut result: ExtractionResult = serde_json::from_str(content)
            .map_err(|e| AppError::LLMParsing(format!("failed to parse extraction result: {e}")))?;
        result.model_version.clone_from(&self.config.extraction_model);

        Ok((result, prompt_tokens, completion_tokens))
    }

    /// Returns the embedding vector for `text`. Cache hits bypass both the
    /// network call and the rate limiter.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, AppError> {
        let cache_key = EmbedCache::cache_key(text, &self.config.embedding_model);
        if let Some(cached) = self.cache.get(&cache_key).await {
            debug!(run_id = %self.run_id, "embed cache hit");
            return Ok(cached);
        }

        let estimated_tokens = estimate_tokens(text);
        let estimated_cost = f64::from(estimated_tokens) / 1000.0 * EMBED_COST_PER_1K_USD;
        self.cost_tracker.pre_check(estimated_cost).await?;

        if !self.circuit_breaker.allow_call() {
            return Err(AppError::Ai(AiError::CircuitOpen("ai-endpoint".to_string())));
        }
        self.rate_limiter.acquire().await?;

        let request = CreateEmbeddingRequestArgs::default()
            .model(&self.config.embedding_model)
            .input([text])
            .dimensions(self.config.embedding_dimensions)
            .build()?;

        let response = match retry_with_backoff(self.backoff_policy, "ai-embed-call", || {
            let request = request.clone();
            async move { self.openai_client.embeddings().create(request).await }
        })
        .await
        {
            Ok(response) => {
                self.circuit_breaker.record_success();
                response
            }
            Err(err) => {
                self.circuit_breaker.record_failure();
                return Err(AppError::OpenAI(err));
            }
        };

        let vector = response
            .data
            .first()
            .ok_or_else(|| AppError::LLMParsing("no embedding data received".to_string()))?
            .embedding
            .clone();

        let cost = f64::from(estimated_tokens) / 1000.0 * EMBED_COST_PER_1K_USD;
        self.cost_tracker.record_spend(cost).await;
        self.counters.record_ai_call(u64::from(estimated_tokens), 0, cost);

        self.cache.put(cache_key, vector.clone()).await;
        Ok(vector)
    }

    fn extraction_cost(prompt_tokens: u32, completion_tokens: u32) -> f64 {
        f64::from(prompt_tokens) / 1000.0 * PROMPT_COST_PER_1K_USD
            + f64::from(completion_tokens) / 1000.0 * COMPLETION_COST_PER_1K_USD
    }

    /// Raises a C10 alert directly (used by the orchestrator for
    /// conditions it observes outside this client, e.g. SLO breaches).
    pub async fn raise_alert(&self, kind: AlertKind, message: String) {
        self.alert_sink
            .send(&Alert {
                run_id: self.run_id.clone(),
                kind,
                message,
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_tokens_is_proportional_to_length() {
        assert!(estimate_tokens("a short sentence") < estimate_tokens(&"word ".repeat(200)));
    }

    #[test]
    fn extraction_cost_accounts_for_both_token_kinds() {
        let cost = AiEnrichmentClient::extraction_cost(1000, 1000);
        assert!((cost - (PROMPT_COST_PER_1K_USD + COMPLETION_COST_PER_1K_USD)).abs() < 1e-9);
    }
}
