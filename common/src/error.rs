use std::time::Duration;

use async_openai::error::OpenAIError;
use thiserror::Error;
use tokio::task::JoinError;

/// Errors raised while loading or validating a configuration bundle (C1).
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required configuration value: {0}")]
    Missing(&'static str),
    #[error("invalid configuration value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
    #[error("configuration error: {0}")]
    Source(#[from] config::ConfigError),
}

/// Errors raised by the source reader (C2).
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("failed to connect to source warehouse: {0}")]
    Connect(String),
    #[error("source query failed: {0}")]
    Query(String),
    #[error("source read timed out after {0:?}")]
    ReadTimeout(Duration),
}

/// Errors raised by the sink writer (C3).
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("failed to connect to sink: {0}")]
    Connect(String),
    #[error("sink constraint violation ({code}): {message}")]
    Constraint { code: String, message: String },
    #[error("sink operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("sink transient failure: {0}")]
    Transient(String),
}

/// Errors raised by the watermark / metadata store (C4).
#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("could not acquire lease for table {table}: {reason}")]
    Conflict { table: String, reason: String },
}

/// Errors raised by the AI enrichment client (C7).
#[derive(Error, Debug)]
pub enum AiError {
    #[error("AI request rate limited after waiting {waited:?}")]
    RateLimited { waited: Duration },
    #[error("AI request timed out after {0:?}")]
    Timeout(Duration),
    #[error("AI transient failure: {0}")]
    Transient(String),
    #[error("AI persistent failure: {0}")]
    Persistent(String),
    #[error("AI cost budget exceeded: spent ${spent_usd:.4} against ${limit_usd:.4} limit")]
    BudgetExceeded { spent_usd: f64, limit_usd: f64 },
    #[error("AI circuit breaker open for {0}")]
    CircuitOpen(String),
}

/// The error kinds used by the error handler to decide how to treat a
/// failure: retry, escalate, quarantine the row, or back off on cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Persistent,
    Data,
    CircuitOpen,
    Budget,
}

/// Core internal error type, shared across every crate in the workspace.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("database error: {0}")]
    Database(#[from] surrealdb::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Sink(#[from] SinkError),
    #[error(transparent)]
    Metadata(#[from] MetadataError),
    #[error(transparent)]
    Ai(#[from] AiError),
    #[error("AI provider error: {0}")]
    OpenAI(#[from] OpenAIError),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("LLM response parsing error: {0}")]
    LLMParsing(String),
    #[error("task join error: {0}")]
    Join(#[from] JoinError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("http client error: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("{0}")]
    Anyhow(#[from] anyhow::Error),
    #[error("processing error: {0}")]
    Processing(String),
    #[error("internal service error: {0}")]
    InternalError(String),
}

impl AppError {
    /// Classify this error into one of the five kinds the error handler (C5)
    /// dispatches retry/escalation policy on.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Source(SourceError::Connect(_) | SourceError::ReadTimeout(_)) => {
                ErrorKind::Transient
            }
            AppError::Source(SourceError::Query(_)) => ErrorKind::Persistent,
            AppError::Sink(
                SinkError::Connect(_) | SinkError::Transient(_) | SinkError::Timeout(_),
            ) => ErrorKind::Transient,
            AppError::Sink(SinkError::Constraint { .. }) => ErrorKind::Data,
            AppError::Metadata(_) => ErrorKind::Persistent,
            AppError::Ai(
                AiError::RateLimited { .. } | AiError::Timeout(_) | AiError::Transient(_),
            ) => ErrorKind::Transient,
            AppError::Ai(AiError::Persistent(_)) => ErrorKind::Persistent,
            AppError::Ai(AiError::BudgetExceeded { .. }) => ErrorKind::Budget,
            AppError::Ai(AiError::CircuitOpen(_)) => ErrorKind::CircuitOpen,
            AppError::Config(_) | AppError::Validation(_) | AppError::OpenAI(_) => {
                ErrorKind::Persistent
            }
            AppError::LLMParsing(_) => ErrorKind::Data,
            AppError::Database(_) | AppError::Reqwest(_) | AppError::Io(_) | AppError::Join(_) => {
                ErrorKind::Transient
            }
            AppError::NotFound(_)
            | AppError::Processing(_)
            | AppError::InternalError(_)
            | AppError::Anyhow(_) => ErrorKind::Persistent,
        }
    }

    /// Whether the error handler should retry the operation that produced this error.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transient)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constraint_errors_classify_as_data() {
        let err = AppError::Sink(SinkError::Constraint {
            code: "23502".into(),
            message: "null value in column notified_at".into(),
        });
        assert_eq!(err.kind(), ErrorKind::Data);
        assert!(!err.is_retryable());
    }

    #[test]
    fn transient_sink_errors_are_retryable() {
        let err = AppError::Sink(SinkError::Transient("deadlock detected".into()));
        assert_eq!(err.kind(), ErrorKind::Transient);
        assert!(err.is_retryable());
    }

    #[test]
    fn circuit_open_is_not_retryable() {
        let err = AppError::Ai(AiError::CircuitOpen("ai-endpoint".into()));
        assert_eq!(err.kind(), ErrorKind::CircuitOpen);
        assert!(!err.is_retryable());
    }

    #[test]
    fn budget_exceeded_is_not_retryable() {
        let err = AppError::Ai(AiError::BudgetExceeded {
            spent_usd: 10.5,
            limit_usd: 10.0,
        });
        assert_eq!(err.kind(), ErrorKind::Budget);
        assert!(!err.is_retryable());
    }
}
