#![allow(clippy::missing_docs_in_private_items)]

//! In-memory seed scenarios and property checks exercising the real
//! orchestrators, sink, and AI client against fakes instead of a live
//! warehouse or model provider.

pub mod fake_source;
pub mod mock_ai;
pub mod scenario_state;
pub mod scenarios;

pub use scenarios::{run_all, ScenarioOutcome};
