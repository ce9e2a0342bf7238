// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 etlflow contributors

//! Pipeline core
//!
//! Steps, sensors, the dependency graph, and the scheduler that runs one
//! logical date through it. Nothing here knows about HTTP or SQL; the
//! concrete steps live in [`crate::connectors`].

pub mod artifacts;
mod context;
mod dag;
mod definition;
mod report;
pub mod retry;
mod scheduler;
mod sensor;
mod step;
mod validation;

pub use artifacts::{ArtifactKind, Artifacts};
pub use context::{LogicalDate, RunContext};
pub use dag::Graph;
pub use definition::*;
pub use report::{ReportEntry, RunReport, RunReportBuilder, RunStatus};
pub use retry::{run_step, StepOutcome};
pub use scheduler::Scheduler;
pub use sensor::{await_ready, ProbeError, Readiness, Sensor, SensorTimeout};
pub use step::{
    ErrorKind, Payload, RetryPolicy, SkipReason, Step, StepError, StepId, StepInputs, StepResult,
    StepSpec, MAX_BACKOFF,
};
pub use validation::{is_identifier, PipelineValidator, ValidationResult, LOGICAL_DATE_COLUMN};
