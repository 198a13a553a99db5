use async_openai::types::CreateEmbeddingRequestArgs;
use tracing::debug;

use crate::{error::AppError, utils::config::AiConfig};

/// Generates an embedding vector for the given input text, using the model
/// and dimension configured for the AI enrichment client (C7).
///
/// # Errors
///
/// Returns `AppError::OpenAI` if the request fails, or `AppError::LLMParsing`
/// if the response contains no embedding data.
pub async fn generate_embedding(
    client: &async_openai::Client<async_openai::config::OpenAIConfig>,
    input: &str,
    config: &AiConfig,
) -> Result<Vec<f32>, AppError> {
    generate_embedding_with_params(
        client,
        input,
        &config.embedding_model,
        config.embedding_dimensions,
    )
    .await
}

/// Generates an embedding vector using an explicit model and dimension,
/// independent of the currently configured model. Used by the re-embedding
/// path so a batch started under one model version finishes under that same
/// version even if the configuration changes mid-run.
pub async fn generate_embedding_with_params(
    client: &async_openai::Client<async_openai::config::OpenAIConfig>,
    input: &str,
    model: &str,
    dimensions: u32,
) -> Result<Vec<f32>, AppError> {
    let request = CreateEmbeddingRequestArgs::default()
        .model(model)
        .input([input])
        .dimensions(dimensions)
        .build()?;

    let response = client.embeddings().create(request).await?;

    let embedding = response
        .data
        .first()
        .ok_or_else(|| AppError::LLMParsing("No embedding data received from API".into()))?
        .embedding
        .clone();

    debug!(
        "Embedding was created with {:?} dimensions",
        embedding.len()
    );

    Ok(embedding)
}
