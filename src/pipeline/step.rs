// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 etlflow contributors

//! Step model
//!
//! A [`Step`] is the unit of work in a graph. The scheduler wraps it in a
//! [`StepSpec`] that carries its position in the graph (upstream ids), its
//! retry policy and an optional readiness sensor.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::errors::EtlflowError;
use crate::pipeline::{RunContext, Sensor};

/// Identifier of a step, unique within a graph
pub type StepId = String;

/// Opaque handle a successful step hands to its dependents
///
/// The scheduler never looks inside; only the consuming step does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Payload {
    /// Nothing to pass on
    Empty,
    /// A staged artifact on disk
    Path { path: PathBuf },
    /// Number of rows written
    Rows { count: u64 },
}

impl Payload {
    pub fn path(path: impl Into<PathBuf>) -> Self {
        Self::Path { path: path.into() }
    }

    pub fn rows(count: u64) -> Self {
        Self::Rows { count }
    }

    pub fn as_path(&self) -> Option<&PathBuf> {
        match self {
            Self::Path { path } => Some(path),
            _ => None,
        }
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "-"),
            Self::Path { path } => write!(f, "{}", path.display()),
            Self::Rows { count } => write!(f, "{} rows", count),
        }
    }
}

/// Classification of a step failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Network unreachable, connection reset, 5xx
    Connectivity,
    /// Request or operation timed out
    Timeout,
    /// Source asked us to slow down
    RateLimit,
    /// Credentials rejected
    Auth,
    /// Payload or schema did not match expectations
    Validation,
    /// Destination rejected the rows
    Constraint,
    /// Local filesystem failure
    Io,
    /// Attempt was cancelled by the run deadline
    Cancelled,
    /// The step's task died without returning
    Internal,
}

impl ErrorKind {
    /// Whether a retry can reasonably succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connectivity | Self::Timeout | Self::RateLimit)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Connectivity => "connectivity",
            Self::Timeout => "timeout",
            Self::RateLimit => "rate_limit",
            Self::Auth => "auth",
            Self::Validation => "validation",
            Self::Constraint => "constraint",
            Self::Io => "io",
            Self::Cancelled => "cancelled",
            Self::Internal => "internal",
        };
        write!(f, "{}", s)
    }
}

/// Error returned by a single `execute` attempt
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct StepError {
    pub kind: ErrorKind,
    pub message: String,
}

impl StepError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn connectivity(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Connectivity, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }
}

impl From<EtlflowError> for StepError {
    fn from(e: EtlflowError) -> Self {
        let kind = match &e {
            EtlflowError::Http { .. } | EtlflowError::Database { .. } => ErrorKind::Connectivity,
            EtlflowError::Json { .. }
            | EtlflowError::Csv { .. }
            | EtlflowError::Yaml { .. }
            | EtlflowError::Toml { .. } => ErrorKind::Validation,
            EtlflowError::InvalidConfig { .. } => ErrorKind::Validation,
            _ => ErrorKind::Io,
        };
        Self::new(kind, e.to_string())
    }
}

/// Why a step was not attempted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The step's readiness sensor timed out
    UpstreamUnavailable,
    /// An upstream step failed
    UpstreamFailed,
    /// The run deadline passed before the step started
    RunTimeout,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UpstreamUnavailable => write!(f, "upstream unavailable"),
            Self::UpstreamFailed => write!(f, "upstream failed"),
            Self::RunTimeout => write!(f, "run timeout"),
        }
    }
}

/// Terminal outcome of a step within a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepResult {
    Success { payload: Payload },
    Failed { kind: ErrorKind, message: String },
    Skipped { reason: SkipReason },
}

impl StepResult {
    pub fn success(payload: Payload) -> Self {
        Self::Success { payload }
    }

    pub fn skipped(reason: SkipReason) -> Self {
        Self::Skipped { reason }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped { .. })
    }

    pub fn payload(&self) -> Option<&Payload> {
        match self {
            Self::Success { payload } => Some(payload),
            _ => None,
        }
    }

    /// Short status word used in reports
    pub fn label(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::Failed { .. } => "failed",
            Self::Skipped { .. } => "skipped",
        }
    }
}

impl From<StepError> for StepResult {
    fn from(e: StepError) -> Self {
        Self::Failed {
            kind: e.kind,
            message: e.message,
        }
    }
}

impl fmt::Display for StepResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success { payload } => write!(f, "success ({})", payload),
            Self::Failed { kind, message } => write!(f, "failed [{}] {}", kind, message),
            Self::Skipped { reason } => write!(f, "skipped ({})", reason),
        }
    }
}

/// Payloads of a step's upstream steps, keyed by step id
///
/// Only ever built from successful upstream results.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepInputs {
    payloads: BTreeMap<StepId, Payload>,
}

impl StepInputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, step: impl Into<StepId>, payload: Payload) {
        self.payloads.insert(step.into(), payload);
    }

    pub fn get(&self, step: &str) -> Option<&Payload> {
        self.payloads.get(step)
    }

    /// The payload of the only upstream step, if there is exactly one
    pub fn single(&self) -> Option<&Payload> {
        if self.payloads.len() == 1 {
            self.payloads.values().next()
        } else {
            None
        }
    }

    pub fn is_empty(&self) -> bool {
        self.payloads.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&StepId, &Payload)> {
        self.payloads.iter()
    }
}

/// Longest wait between two attempts
pub const MAX_BACKOFF: Duration = Duration::from_secs(24 * 60 * 60);

/// Retry behaviour for a step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total number of `execute` calls allowed, including the first
    pub max_attempts: u32,
    /// Wait before the second attempt
    pub backoff_base: Duration,
    /// Multiplier applied to the wait after every further attempt
    pub backoff_factor: f64,
}

impl RetryPolicy {
    /// A single attempt, no retries
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff_base: Duration::ZERO,
            backoff_factor: 1.0,
        }
    }

    pub fn exponential(max_attempts: u32, backoff_base: Duration, backoff_factor: f64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_base,
            backoff_factor,
        }
    }

    /// Wait after failed attempt number `attempt` (1-based)
    ///
    /// `backoff_base * backoff_factor^(attempt - 1)`, capped at [`MAX_BACKOFF`]
    pub fn backoff(&self, attempt: u32) -> Duration {
        if self.backoff_base.is_zero() {
            return Duration::ZERO;
        }
        let exp = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.backoff_base.as_secs_f64() * self.backoff_factor.powi(exp);
        Duration::try_from_secs_f64(secs).map_or(MAX_BACKOFF, |wait| wait.min(MAX_BACKOFF))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(4, Duration::from_secs(300), 2.0)
    }
}

/// A unit of work
///
/// # Idempotency
///
/// `execute` may be called several times for the same run (retries) and the
/// same logical date may be run again later. Implementations must make every
/// call for a given `ctx.logical_date()` overwrite what an earlier call wrote,
/// never add to it. The scheduler cannot check this.
#[async_trait]
pub trait Step: Send + Sync {
    /// Run one attempt
    async fn execute(&self, ctx: &RunContext, inputs: &StepInputs) -> Result<Payload, StepError>;
}

/// A step together with everything the scheduler needs to place and run it
#[derive(Clone)]
pub struct StepSpec {
    pub id: StepId,
    pub upstream: Vec<StepId>,
    pub retry: RetryPolicy,
    pub sensor: Option<Arc<dyn Sensor>>,
    pub step: Arc<dyn Step>,
}

impl StepSpec {
    /// A root step with no retries and no sensor
    pub fn new(id: impl Into<StepId>, step: Arc<dyn Step>) -> Self {
        Self {
            id: id.into(),
            upstream: Vec::new(),
            retry: RetryPolicy::none(),
            sensor: None,
            step,
        }
    }

    /// Declare the steps that must finish before this one
    pub fn after<I, S>(mut self, upstream: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<StepId>,
    {
        self.upstream.extend(upstream.into_iter().map(Into::into));
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Block this step until `sensor` reports ready
    pub fn gated_by(mut self, sensor: Arc<dyn Sensor>) -> Self {
        self.sensor = Some(sensor);
        self
    }
}

impl fmt::Debug for StepSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepSpec")
            .field("id", &self.id)
            .field("upstream", &self.upstream)
            .field("retry", &self.retry)
            .field("sensor", &self.sensor.as_ref().map(|s| s.target_id().to_string()))
            .finish()
    }
}
