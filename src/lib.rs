// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 etlflow contributors

//! # etlflow - daily ETL orchestrator
//!
//! `etlflow` runs a dependency graph of extract, transform and load steps
//! once per logical date.
//!
//! ## Features
//!
//! - **Sensor gating** - a step waits until its upstream API answers
//! - **Retries** - transient failures back off exponentially, permanent ones fail fast
//! - **Partial success** - a failed branch only skips its own dependents
//! - **Idempotent re-runs** - artifacts and rows are keyed by logical date
//! - **One report per run** - delivered after every step has settled
//!
//! ## Quick Start
//!
//! ```bash
//! # Check the pipeline file
//! etlflow validate
//!
//! # Run one date
//! etlflow run --date 2023-04-01
//!
//! # Catch up from the configured start date
//! etlflow backfill
//! ```

pub mod cli;
pub mod connectors;
pub mod errors;
pub mod notify;
pub mod pipeline;
pub mod utils;

// Re-export commonly used types
pub use errors::{EtlflowError, EtlflowResult};
pub use pipeline::{Graph, LogicalDate, PipelineConfig, RunContext, RunReport, Scheduler};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
