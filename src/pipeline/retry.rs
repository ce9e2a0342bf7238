// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 etlflow contributors

//! Running a single step
//!
//! Upstream gating, sensor wait and the retry/backoff loop for one step
//! instance. Errors never escape: whatever happens ends up in the returned
//! [`StepResult`].

use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::pipeline::sensor::await_ready;
use crate::pipeline::{
    RunContext, SkipReason, StepError, StepId, StepInputs, StepResult, StepSpec,
};

/// Result of running one step, with the number of `execute` calls made
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    pub result: StepResult,
    pub attempts: u32,
}

impl StepOutcome {
    pub fn not_attempted(reason: SkipReason) -> Self {
        Self {
            result: StepResult::skipped(reason),
            attempts: 0,
        }
    }
}

/// Decide whether the upstream results allow `spec` to run
///
/// Returns the inputs to pass on, or the reason the step must be skipped.
/// A failure anywhere upstream wins over any skip reason.
pub fn gate_on_upstream(
    spec: &StepSpec,
    upstream: &HashMap<StepId, StepResult>,
) -> Result<StepInputs, SkipReason> {
    let mut inputs = StepInputs::new();
    let mut skip = None;

    for dep in &spec.upstream {
        match upstream.get(dep) {
            Some(StepResult::Success { payload }) => inputs.insert(dep.clone(), payload.clone()),
            Some(StepResult::Failed { .. }) => return Err(SkipReason::UpstreamFailed),
            Some(StepResult::Skipped { reason }) => {
                if *reason == SkipReason::UpstreamFailed {
                    return Err(SkipReason::UpstreamFailed);
                }
                skip.get_or_insert(*reason);
            }
            None => {
                warn!(step = %spec.id, upstream = %dep, "upstream has no result");
                return Err(SkipReason::UpstreamFailed);
            }
        }
    }

    match skip {
        Some(reason) => Err(reason),
        None => Ok(inputs),
    }
}

/// Run `spec` to a terminal state
///
/// 1. Skip without executing if any upstream did not succeed.
/// 2. Wait for the step's sensor, skipping on timeout.
/// 3. Call `execute`, retrying transient errors with exponential backoff
///    until `retry.max_attempts` calls have been made. Permanent errors stop
///    immediately.
pub async fn run_step(
    spec: &StepSpec,
    ctx: &RunContext,
    upstream: &HashMap<StepId, StepResult>,
) -> StepOutcome {
    let inputs = match gate_on_upstream(spec, upstream) {
        Ok(inputs) => inputs,
        Err(reason) => {
            info!(step = %spec.id, %reason, "skipping step");
            return StepOutcome::not_attempted(reason);
        }
    };

    if let Some(sensor) = &spec.sensor {
        debug!(step = %spec.id, target_id = sensor.target_id(), "waiting for sensor");
        if let Err(e) = await_ready(sensor.as_ref()).await {
            warn!(step = %spec.id, error = %e, "sensor timed out");
            return StepOutcome::not_attempted(SkipReason::UpstreamUnavailable);
        }
    }

    execute_with_retry(spec, ctx, &inputs).await
}

async fn execute_with_retry(spec: &StepSpec, ctx: &RunContext, inputs: &StepInputs) -> StepOutcome {
    let policy = spec.retry;
    let mut attempt = 1;

    loop {
        let attempt_ctx = ctx.for_attempt(attempt);
        debug!(step = %spec.id, attempt, "executing");

        let error: StepError = match spec.step.execute(&attempt_ctx, inputs).await {
            Ok(payload) => {
                info!(step = %spec.id, attempt, %payload, "step succeeded");
                return StepOutcome {
                    result: StepResult::success(payload),
                    attempts: attempt,
                };
            }
            Err(e) => e,
        };

        if !error.is_transient() || attempt >= policy.max_attempts {
            warn!(step = %spec.id, attempt, error = %error, "step failed");
            return StepOutcome {
                result: error.into(),
                attempts: attempt,
            };
        }

        let wait = policy.backoff(attempt);
        warn!(step = %spec.id, attempt, error = %error, ?wait, "transient failure, retrying");
        tokio::time::sleep(wait).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{ErrorKind, LogicalDate, Payload, RetryPolicy, Step, MAX_BACKOFF};
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::time::Instant;

    /// Fails with the scripted errors in order, then succeeds
    struct Scripted {
        errors: Mutex<Vec<StepError>>,
        calls: Mutex<Vec<Instant>>,
    }

    impl Scripted {
        fn new(errors: Vec<StepError>) -> Arc<Self> {
            Arc::new(Self {
                errors: Mutex::new(errors.into_iter().rev().collect()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn call_times(&self) -> Vec<Instant> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Step for Scripted {
        async fn execute(&self, ctx: &RunContext, _: &StepInputs) -> Result<Payload, StepError> {
            self.calls.lock().unwrap().push(Instant::now());
            match self.errors.lock().unwrap().pop() {
                Some(e) => Err(e),
                None => Ok(Payload::rows(ctx.attempt() as u64)),
            }
        }
    }

    fn ctx() -> RunContext {
        RunContext::new("test", LogicalDate::from_ymd(2023, 4, 1).unwrap(), "bucket")
    }

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::exponential(max_attempts, Duration::from_secs(10), 2.0)
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_exhaust_attempts_with_growing_waits() {
        let step = Scripted::new(vec![StepError::connectivity("reset"); 10]);
        let spec = StepSpec::new("fetch", step.clone()).with_retry(policy(4));

        let outcome = run_step(&spec, &ctx(), &HashMap::new()).await;

        assert_eq!(outcome.attempts, 4);
        assert_eq!(
            outcome.result,
            StepResult::Failed {
                kind: ErrorKind::Connectivity,
                message: "reset".into()
            }
        );

        let times = step.call_times();
        assert_eq!(times.len(), 4);
        let waits: Vec<Duration> = times.windows(2).map(|w| w[1] - w[0]).collect();
        assert_eq!(
            waits,
            vec![Duration::from_secs(10), Duration::from_secs(20), Duration::from_secs(40)]
        );
        assert!(waits.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_factor_waits_at_most_the_cap() {
        let step = Scripted::new(vec![StepError::connectivity("reset"); 10]);
        let retry = RetryPolicy::exponential(3, Duration::from_secs(10), f64::INFINITY);
        let spec = StepSpec::new("fetch", step.clone()).with_retry(retry);

        let outcome = run_step(&spec, &ctx(), &HashMap::new()).await;

        assert_eq!(outcome.attempts, 3);
        assert!(matches!(
            outcome.result,
            StepResult::Failed { kind: ErrorKind::Connectivity, .. }
        ));

        let times = step.call_times();
        let waits: Vec<Duration> = times.windows(2).map(|w| w[1] - w[0]).collect();
        assert_eq!(waits, vec![Duration::from_secs(10), MAX_BACKOFF]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_fails_after_one_attempt() {
        let step = Scripted::new(vec![StepError::new(ErrorKind::Auth, "401")]);
        let spec = StepSpec::new("fetch", step.clone()).with_retry(policy(4));

        let outcome = run_step(&spec, &ctx(), &HashMap::new()).await;

        assert_eq!(outcome.attempts, 1);
        assert!(outcome.result.is_failed());
        assert_eq!(step.call_times().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_third_attempt() {
        let step = Scripted::new(vec![
            StepError::new(ErrorKind::RateLimit, "429"),
            StepError::new(ErrorKind::Timeout, "slow"),
        ]);
        let spec = StepSpec::new("fetch", step).with_retry(policy(3));

        let outcome = run_step(&spec, &ctx(), &HashMap::new()).await;

        assert_eq!(outcome.attempts, 3);
        // the step sees the attempt number through its context
        assert_eq!(outcome.result, StepResult::success(Payload::rows(3)));
    }

    #[tokio::test]
    async fn test_failed_upstream_skips_without_executing() {
        let step = Scripted::new(vec![]);
        let spec = StepSpec::new("load", step.clone()).after(["transform"]);

        let mut upstream = HashMap::new();
        upstream.insert(
            "transform".to_string(),
            StepResult::Failed {
                kind: ErrorKind::Validation,
                message: "bad json".into(),
            },
        );

        let outcome = run_step(&spec, &ctx(), &upstream).await;

        assert_eq!(outcome, StepOutcome::not_attempted(SkipReason::UpstreamFailed));
        assert!(step.call_times().is_empty());
    }

    #[test]
    fn test_gate_prefers_failure_over_skip() {
        let spec = StepSpec::new("join", Scripted::new(vec![])).after(["a", "b", "c"]);

        let mut upstream = HashMap::new();
        upstream.insert("a".to_string(), StepResult::success(Payload::rows(1)));
        upstream.insert("b".to_string(), StepResult::skipped(SkipReason::UpstreamUnavailable));
        upstream.insert(
            "c".to_string(),
            StepResult::Failed {
                kind: ErrorKind::Constraint,
                message: "duplicate key".into(),
            },
        );
        assert_eq!(gate_on_upstream(&spec, &upstream), Err(SkipReason::UpstreamFailed));

        upstream.insert("c".to_string(), StepResult::success(Payload::Empty));
        assert_eq!(gate_on_upstream(&spec, &upstream), Err(SkipReason::UpstreamUnavailable));

        upstream.insert(
            "c".to_string(),
            StepResult::skipped(SkipReason::UpstreamFailed),
        );
        assert_eq!(gate_on_upstream(&spec, &upstream), Err(SkipReason::UpstreamFailed));

        upstream.insert("b".to_string(), StepResult::success(Payload::Empty));
        upstream.insert("c".to_string(), StepResult::success(Payload::Empty));
        let inputs = gate_on_upstream(&spec, &upstream).unwrap();
        assert_eq!(inputs.get("a"), Some(&Payload::rows(1)));
    }
}
