use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{
    error::{AppError, SourceError},
    resilience::circuit_breaker::CircuitBreaker,
    utils::config::{SourceAuthMode, SourceConfig},
};
use futures::StreamExt;
use json_stream_parser::JsonStreamParser;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

/// One record as the warehouse represents it: an opaque identity, a
/// monotonic watermark used for the `(watermark, identity)` total order,
/// and the row's fields verbatim.
#[derive(Debug, Clone)]
pub struct SourceRow {
    pub identity: String,
    pub watermark: i64,
    pub fields: Value,
}

/// A page of rows returned by the warehouse, plus an opaque continuation
/// token the next request must echo back.
#[derive(Debug, Deserialize)]
struct WarehousePage {
    rows: Vec<WarehouseRow>,
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WarehouseRow {
    identity: String,
    watermark: i64,
    #[serde(flatten)]
    fields: Value,
}

/// Streams rows for a single table forward from a watermark, one bounded
/// page at a time.
#[async_trait]
pub trait Cursor: Send {
    /// Returns the next page of rows, or an empty vec once the stream is
    /// exhausted. Never returns more than `batch_size` rows.
    async fn fetch_batch(&mut self) -> Result<Vec<SourceRow>, AppError>;
}

pub struct HttpCursor {
    client: reqwest::Client,
    config: SourceConfig,
    table: String,
    batch_size: usize,
    next_watermark: i64,
    continuation: Option<String>,
    exhausted: bool,
    circuit_breaker: Arc<CircuitBreaker>,
}

impl HttpCursor {
    pub(crate) fn new(
        client: reqwest::Client,
        config: SourceConfig,
        table: String,
        since: i64,
        batch_size: usize,
        circuit_breaker: Arc<CircuitBreaker>,
    ) -> Self {
        Self {
            client,
            config,
            table,
            batch_size,
            next_watermark: since,
            continuation: None,
            exhausted: false,
            circuit_breaker,
        }
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.config.auth_mode {
            SourceAuthMode::Password => {
                let username = self.config.username.as_deref().unwrap_or_default();
                let password = self.config.password.as_deref();
                builder.basic_auth(username, password)
            }
            SourceAuthMode::OAuth => {
                let token = self.config.oauth_token.as_deref().unwrap_or_default();
                builder.bearer_auth(token)
            }
            SourceAuthMode::ExternalBrowser => builder,
        }
    }

    /// Reads the response body as a byte stream and feeds it through the
    /// incremental JSON parser rather than buffering the whole page via
    /// `.json()`, so a slow or oversized page never holds more than one
    /// chunk in memory at a time.
    async fn stream_page(&self, response: reqwest::Response) -> Result<WarehousePage, AppError> {
        let mut parser = JsonStreamParser::new();
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| AppError::Source(SourceError::Query(e.to_string())))?;
            let text = String::from_utf8_lossy(&chunk);
            for ch in text.chars() {
                parser
                    .add_char(ch)
                    .map_err(|e| AppError::Source(SourceError::Query(e)))?;
            }
        }

        serde_json::from_value(parser.get_result().clone())
            .map_err(|e| AppError::Source(SourceError::Query(format!("malformed page: {e}"))))
    }
}

#[async_trait]
impl Cursor for HttpCursor {
    async fn fetch_batch(&mut self) -> Result<Vec<SourceRow>, AppError> {
        if self.exhausted {
            return Ok(Vec::new());
        }

        if !self.circuit_breaker.allow_call() {
            return Err(AppError::Source(SourceError::Connect(
                "circuit breaker open for warehouse".to_string(),
            )));
        }

        let url = format!(
            "{}/warehouses/{}/tables/{}/rows",
            self.config.base_url.trim_end_matches('/'),
            self.config.warehouse,
            self.table
        );

        let mut request = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(self.config.request_timeout_secs))
            .query(&[
                ("since", self.next_watermark.to_string()),
                ("limit", self.batch_size.to_string()),
            ]);
        if let Some(token) = &self.continuation {
            request = request.query(&[("cursor", token.as_str())]);
        }
        request = self.authorize(request);

        let response = match request.send().await {
            Ok(response) => response,
            Err(_) => {
                self.circuit_breaker.record_failure();
                return Err(AppError::Source(SourceError::Connect(url.clone())));
            }
        };

        if !response.status().is_success() {
            self.circuit_breaker.record_failure();
            return Err(AppError::Source(SourceError::Query(format!(
                "warehouse returned status {}",
                response.status()
            ))));
        }

        let page = match self.stream_page(response).await {
            Ok(page) => {
                self.circuit_breaker.record_success();
                page
            }
            Err(err) => {
                self.circuit_breaker.record_failure();
                return Err(err);
            }
        };

        self.continuation = page.next_cursor;
        self.exhausted = self.continuation.is_none();

        if let Some(max_watermark) = page.rows.iter().map(|r| r.watermark).max() {
            self.next_watermark = max_watermark;
        }

        debug!(
            table = %self.table,
            rows = page.rows.len(),
            exhausted = self.exhausted,
            "fetched source page"
        );

        if page.rows.is_empty() && !self.exhausted {
            warn!(table = %self.table, "warehouse page was empty but reported a continuation token");
        }

        Ok(page
            .rows
            .into_iter()
            .map(|row| SourceRow {
                identity: row.identity,
                watermark: row.watermark,
                fields: row.fields,
            })
            .collect())
    }
}
