#![allow(clippy::missing_docs_in_private_items)]

pub mod cursor;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{
    error::AppError, resilience::circuit_breaker::CircuitBreaker, utils::config::SourceConfig,
};

pub use cursor::{Cursor, HttpCursor, SourceRow};

/// Opens a streaming read against a source table.
#[async_trait]
pub trait SourceReader: Send + Sync {
    async fn open_stream(
        &self,
        table: &str,
        since: i64,
        batch_size: usize,
    ) -> Result<Box<dyn Cursor>, AppError>;
}

/// HTTP-backed reader against a warehouse's SQL-REST endpoint.
pub struct HttpSourceReader {
    client: reqwest::Client,
    config: SourceConfig,
    circuit_breaker: Arc<CircuitBreaker>,
}

impl HttpSourceReader {
    #[must_use]
    pub fn new(config: SourceConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
            .build()
            .unwrap_or_default();
        let circuit_breaker = Arc::new(CircuitBreaker::new("warehouse", 5, Duration::from_secs(60)));
        Self {
            client,
            config,
            circuit_breaker,
        }
    }
}

#[async_trait]
impl SourceReader for HttpSourceReader {
    async fn open_stream(
        &self,
        table: &str,
        since: i64,
        batch_size: usize,
    ) -> Result<Box<dyn Cursor>, AppError> {
        Ok(Box::new(HttpCursor::new(
            self.client.clone(),
            self.config.clone(),
            table.to_string(),
            since,
            batch_size,
            Arc::clone(&self.circuit_breaker),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::utils::config::SourceAuthMode;

    fn config() -> SourceConfig {
        SourceConfig {
            base_url: "https://warehouse.example.com".to_string(),
            warehouse: "WH_ETL".to_string(),
            auth_mode: SourceAuthMode::Password,
            username: Some("svc_etl".to_string()),
            password: Some("secret".to_string()),
            oauth_token: None,
            request_timeout_secs: 5,
        }
    }

    #[tokio::test]
    async fn open_stream_returns_a_cursor_without_issuing_a_request() {
        let reader = HttpSourceReader::new(config());
        let cursor = reader.open_stream("work_orders", 0, 100).await;
        assert!(cursor.is_ok());
    }
}
