// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 etlflow contributors

//! Run scheduler
//!
//! Executes a [`Graph`] for one logical date. Layers run strictly one after
//! another; the steps of a layer run concurrently as separate tasks. Every
//! step ends in a terminal result, the report covers every step of the
//! graph, and the notifier is called exactly once at the end of the run.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;
use tracing::{error, info, info_span, warn, Instrument};

use crate::notify::Notifier;
use crate::pipeline::retry::{run_step, StepOutcome};
use crate::pipeline::{
    ErrorKind, Graph, ReportEntry, RunContext, RunReport, RunReportBuilder, SkipReason, StepId,
    StepResult,
};

/// Runs a graph once per logical date
pub struct Scheduler {
    name: String,
    graph: Arc<Graph>,
    notifier: Arc<dyn Notifier>,
    run_timeout: Option<Duration>,
}

impl Scheduler {
    /// Create a scheduler for the pipeline `name`
    pub fn new(name: impl Into<String>, graph: Arc<Graph>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            name: name.into(),
            graph,
            notifier,
            run_timeout: None,
        }
    }

    /// Bound the wall-clock duration of a whole run
    ///
    /// When it elapses, steps still running are cancelled and recorded as
    /// failed, and steps in later layers are skipped.
    pub fn with_run_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.run_timeout = timeout;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Execute every step of the graph for `ctx.logical_date()`
    ///
    /// Never fails: step errors are captured in the returned report, which
    /// is also handed to the notifier.
    pub async fn run(&self, ctx: RunContext) -> RunReport {
        let span = info_span!(
            "run",
            run_id = %ctx.run_id(),
            logical_date = %ctx.logical_date()
        );

        async move {
            info!(steps = self.graph.len(), layers = self.graph.depth(), "run started");

            let report = self.execute_layers(&ctx).await;

            info!(
                succeeded = report.succeeded().count(),
                failed = report.failed().count(),
                skipped = report.skipped().count(),
                "run finished"
            );

            if let Err(e) = self.notifier.notify(&report).await {
                error!(error = %e, "report delivery failed");
            }

            report
        }
        .instrument(span)
        .await
    }

    async fn execute_layers(&self, ctx: &RunContext) -> RunReport {
        let deadline = self.run_timeout.map(|t| Instant::now() + t);
        let mut builder = RunReportBuilder::new(&self.name, ctx.run_id(), ctx.logical_date());
        let mut results: HashMap<StepId, StepResult> = HashMap::new();
        let mut timed_out = false;

        for (index, layer) in self.graph.topological_layers().enumerate() {
            let layer: Vec<StepId> = layer.into_iter().map(String::from).collect();

            if !timed_out && deadline.is_some_and(|d| Instant::now() >= d) {
                warn!("run deadline reached");
                timed_out = true;
            }

            if timed_out {
                for id in layer {
                    let outcome = StepOutcome::not_attempted(SkipReason::RunTimeout);
                    record_now(&mut builder, &mut results, id, outcome);
                }
                continue;
            }

            info!(layer = index + 1, steps = ?layer, "starting layer");
            timed_out = self
                .execute_layer(ctx, &layer, deadline, &mut builder, &mut results)
                .await;
        }

        builder.finish()
    }

    /// Run one layer to completion; returns `true` if the deadline hit
    async fn execute_layer(
        &self,
        ctx: &RunContext,
        layer: &[StepId],
        deadline: Option<Instant>,
        builder: &mut RunReportBuilder,
        results: &mut HashMap<StepId, StepResult>,
    ) -> bool {
        // Earlier layers are complete; this snapshot is all the layer may see.
        let upstream = Arc::new(results.clone());
        let layer_started = Utc::now();
        let layer_clock = Instant::now();
        let mut tasks = JoinSet::new();

        for id in layer {
            let Some(spec) = self.graph.step(id).cloned() else {
                continue;
            };
            let ctx = ctx.clone();
            let upstream = Arc::clone(&upstream);
            let span = info_span!("step", step = %spec.id);

            tasks.spawn(
                async move {
                    let started_at = Utc::now();
                    let clock = Instant::now();
                    let outcome = run_step(&spec, &ctx, &upstream).await;
                    (spec.id, outcome, started_at, clock.elapsed())
                }
                .instrument(span),
            );
        }

        let mut timed_out = false;
        loop {
            let next = match deadline {
                Some(d) => match tokio::time::timeout_at(d, tasks.join_next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        timed_out = cancel_remaining(&mut tasks, builder, results);
                        break;
                    }
                },
                None => tasks.join_next().await,
            };

            match next {
                None => break,
                Some(joined) => record_joined(joined, builder, results),
            }
        }

        // Whatever has no result now was cancelled or died.
        for id in layer {
            if results.contains_key(id) {
                continue;
            }
            let result = if timed_out {
                StepResult::Failed {
                    kind: ErrorKind::Cancelled,
                    message: "cancelled: run deadline exceeded".into(),
                }
            } else {
                StepResult::Failed {
                    kind: ErrorKind::Internal,
                    message: "step task aborted".into(),
                }
            };
            builder.record(ReportEntry {
                step_id: id.clone(),
                result: result.clone(),
                attempts: 0,
                started_at: layer_started,
                finished_at: Utc::now(),
                duration: layer_clock.elapsed(),
            });
            results.insert(id.clone(), result);
        }

        timed_out
    }
}

type Joined = (StepId, StepOutcome, DateTime<Utc>, Duration);

/// Record the steps that already finished, then abort the rest
///
/// Returns `true` if any step was still running.
fn cancel_remaining(
    tasks: &mut JoinSet<Joined>,
    builder: &mut RunReportBuilder,
    results: &mut HashMap<StepId, StepResult>,
) -> bool {
    while let Some(joined) = tasks.try_join_next() {
        record_joined(joined, builder, results);
    }
    if tasks.is_empty() {
        return false;
    }
    warn!(running = tasks.len(), "run deadline reached, cancelling running steps");
    tasks.abort_all();
    true
}

fn record_joined(
    joined: Result<Joined, JoinError>,
    builder: &mut RunReportBuilder,
    results: &mut HashMap<StepId, StepResult>,
) {
    match joined {
        Ok((id, outcome, started_at, elapsed)) => {
            let entry = ReportEntry {
                step_id: id.clone(),
                result: outcome.result.clone(),
                attempts: outcome.attempts,
                started_at,
                finished_at: Utc::now(),
                duration: elapsed,
            };
            results.insert(id, outcome.result);
            builder.record(entry);
        }
        Err(e) => {
            error!(error = %e, "step task did not complete");
        }
    }
}

fn record_now(
    builder: &mut RunReportBuilder,
    results: &mut HashMap<StepId, StepResult>,
    id: StepId,
    outcome: StepOutcome,
) {
    let now = Utc::now();
    builder.record(ReportEntry {
        step_id: id.clone(),
        result: outcome.result.clone(),
        attempts: outcome.attempts,
        started_at: now,
        finished_at: now,
        duration: Duration::ZERO,
    });
    results.insert(id, outcome.result);
}
