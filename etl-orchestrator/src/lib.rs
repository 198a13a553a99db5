#![allow(clippy::missing_docs_in_private_items)]

pub mod backfill;
pub mod memory_optimizer;
pub mod run_state;
pub mod sync;

pub use backfill::{BackfillOrchestrator, BackfillSummary};
pub use memory_optimizer::MemoryOptimizer;
pub use sync::{RunSummary, SyncOrchestrator};
