#![allow(clippy::missing_docs_in_private_items, clippy::result_large_err)]

pub mod cache;
pub mod client;
pub mod cost;
pub mod pipeline;
pub mod rate_limiter;
pub mod schema;

pub use client::AiEnrichmentClient;
pub use pipeline::{enrich_row, EnrichedRow, RawRow};
pub use schema::ExtractionResult;
