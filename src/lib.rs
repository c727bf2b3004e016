// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod error;
pub mod metrics;
pub mod model;
pub mod retry;
pub mod state_file;

// Phases, leaf to root
pub mod ingest;
pub mod ledger;
pub mod analyze;
pub mod publish;
pub mod archive;

pub mod config;
pub mod pipeline;
pub mod scheduler;

// ---- Re-exports for stable public API ----
pub use crate::config::{build_pipeline, PipelineConfig, Secrets};
pub use crate::error::{PipelineError, Result};
pub use crate::pipeline::{Pipeline, PipelineDeps, RunSummary};
