// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 etlflow contributors

//! Readiness sensors
//!
//! A sensor is polled before a gated step is allowed to run. It only answers
//! "is the dependency up right now"; the polling loop lives in
//! [`await_ready`].

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info};

/// Answer of a single probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    NotReady,
}

/// Transport failure while probing; treated like `NotReady`
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("probe of '{target}' failed: {message}")]
pub struct ProbeError {
    pub target: String,
    pub message: String,
}

/// The sensor never reported ready within its timeout
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("sensor '{target}' not ready after {waited:?} ({probes} probes)")]
pub struct SensorTimeout {
    pub target: String,
    pub waited: Duration,
    pub probes: u32,
}

/// Polling precondition for a step
///
/// Stateless; `probe` may be called any number of times.
#[async_trait]
pub trait Sensor: Send + Sync {
    /// Name of the dependency being watched
    fn target_id(&self) -> &str;

    /// Check readiness once
    async fn probe(&self) -> Result<Readiness, ProbeError>;

    /// Delay between probes
    fn poll_interval(&self) -> Duration;

    /// Give up once this much time has passed since the first probe
    fn timeout(&self) -> Duration;
}

/// Poll `sensor` until it is ready or its timeout elapses
///
/// Probe errors are logged and retried, never returned.
pub async fn await_ready(sensor: &dyn Sensor) -> Result<(), SensorTimeout> {
    let started = Instant::now();
    let deadline = started + sensor.timeout();
    let mut probes = 0u32;

    loop {
        probes += 1;
        match sensor.probe().await {
            Ok(Readiness::Ready) => {
                info!(target_id = sensor.target_id(), probes, "sensor ready");
                return Ok(());
            }
            Ok(Readiness::NotReady) => {
                debug!(target_id = sensor.target_id(), probes, "sensor not ready");
            }
            Err(e) => {
                debug!(target_id = sensor.target_id(), probes, error = %e, "probe failed");
            }
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(SensorTimeout {
                target: sensor.target_id().to_string(),
                waited: now - started,
                probes,
            });
        }

        let next = (now + sensor.poll_interval()).min(deadline);
        tokio::time::sleep_until(next).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Reports ready on the n-th probe, errors on every other probe before it
    struct CountdownSensor {
        ready_on: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl Sensor for CountdownSensor {
        fn target_id(&self) -> &str {
            "countdown"
        }

        async fn probe(&self) -> Result<Readiness, ProbeError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n >= self.ready_on {
                Ok(Readiness::Ready)
            } else if n % 2 == 0 {
                Err(ProbeError {
                    target: "countdown".into(),
                    message: "connection refused".into(),
                })
            } else {
                Ok(Readiness::NotReady)
            }
        }

        fn poll_interval(&self) -> Duration {
            Duration::from_secs(60)
        }

        fn timeout(&self) -> Duration {
            Duration::from_secs(300)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_after_errors_and_not_ready() {
        let sensor = CountdownSensor {
            ready_on: 4,
            calls: AtomicU32::new(0),
        };

        let start = Instant::now();
        await_ready(&sensor).await.unwrap();

        assert_eq!(sensor.calls.load(Ordering::SeqCst), 4);
        assert_eq!(start.elapsed(), Duration::from_secs(180));
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out() {
        let sensor = CountdownSensor {
            ready_on: u32::MAX,
            calls: AtomicU32::new(0),
        };

        let err = await_ready(&sensor).await.unwrap_err();

        assert_eq!(err.target, "countdown");
        assert_eq!(err.waited, Duration::from_secs(300));
        // probes at 0, 60, 120, 180, 240, 300
        assert_eq!(err.probes, 6);
    }
}
