// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 etlflow contributors

//! Run-scoped execution context
//!
//! A run is identified by its logical date. Everything a step writes must be
//! keyed by that date so that re-running the same date overwrites instead of
//! duplicating.

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::errors::EtlflowError;
use crate::pipeline::artifacts::{ArtifactKind, Artifacts};
use crate::utils::hash_string;

/// The calendar day a run is responsible for
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogicalDate(NaiveDate);

impl LogicalDate {
    pub fn new(date: NaiveDate) -> Self {
        Self(date)
    }

    /// Build from year/month/day, `None` if the date does not exist
    pub fn from_ymd(year: i32, month: u32, day: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, day).map(Self)
    }

    pub fn date(&self) -> NaiveDate {
        self.0
    }

    /// The following calendar day (end of this date's data interval)
    pub fn next(&self) -> Self {
        Self(self.0.checked_add_days(Days::new(1)).unwrap_or(self.0))
    }

    /// Inclusive range of logical dates, used for backfills
    pub fn range_inclusive(from: LogicalDate, to: LogicalDate) -> Vec<LogicalDate> {
        from.0
            .iter_days()
            .take_while(|d| *d <= to.0)
            .map(Self)
            .collect()
    }
}

impl fmt::Display for LogicalDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d"))
    }
}

impl FromStr for LogicalDate {
    type Err = EtlflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
            .map(Self)
            .map_err(|_| EtlflowError::InvalidDate { value: s.to_string() })
    }
}

/// Execution context handed to every step attempt
///
/// Immutable: the scheduler derives a fresh context per attempt with
/// [`RunContext::for_attempt`] rather than mutating a shared one.
#[derive(Debug, Clone)]
pub struct RunContext {
    logical_date: LogicalDate,
    run_id: String,
    attempt: u32,
    artifacts: Artifacts,
}

impl RunContext {
    /// Create the context for one run of `pipeline` over `logical_date`
    pub fn new(pipeline: &str, logical_date: LogicalDate, artifact_root: impl Into<PathBuf>) -> Self {
        Self {
            logical_date,
            run_id: format!("{}__{}", pipeline, logical_date),
            attempt: 1,
            artifacts: Artifacts::new(artifact_root),
        }
    }

    pub fn logical_date(&self) -> LogicalDate {
        self.logical_date
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// 1-based attempt number of the current `execute` call
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn artifact_root(&self) -> &Path {
        self.artifacts.root()
    }

    /// Context for the given attempt of a step
    pub fn for_attempt(&self, attempt: u32) -> Self {
        Self {
            attempt,
            ..self.clone()
        }
    }

    /// Stable key for a step within this run
    ///
    /// Identical for every attempt and every re-run of the same logical date.
    pub fn idempotency_key(&self, step_id: &str) -> String {
        hash_string(&format!("{}\0{}", self.run_id, step_id))
    }

    /// Date-keyed artifact path for `name` at the given pipeline stage
    pub fn artifact_path(&self, kind: ArtifactKind, name: &str) -> PathBuf {
        self.artifacts.path_for(kind, name, self.logical_date)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> LogicalDate {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_and_display() {
        let d = date("2023-04-01");
        assert_eq!(d.to_string(), "2023-04-01");
        assert_eq!(d.next().to_string(), "2023-04-02");
        assert!("2023-02-30".parse::<LogicalDate>().is_err());
        assert!("yesterday".parse::<LogicalDate>().is_err());
    }

    #[test]
    fn test_range_inclusive() {
        let days = LogicalDate::range_inclusive(date("2023-03-30"), date("2023-04-02"));
        let shown: Vec<_> = days.iter().map(|d| d.to_string()).collect();
        assert_eq!(shown, vec!["2023-03-30", "2023-03-31", "2023-04-01", "2023-04-02"]);

        assert!(LogicalDate::range_inclusive(date("2023-04-02"), date("2023-04-01")).is_empty());
    }

    #[test]
    fn test_idempotency_key_stable_across_attempts() {
        let ctx = RunContext::new("daily", date("2023-04-01"), "bucket");
        let retry = ctx.for_attempt(3);

        assert_eq!(retry.attempt(), 3);
        assert_eq!(ctx.idempotency_key("load_users"), retry.idempotency_key("load_users"));
        assert_ne!(ctx.idempotency_key("load_users"), ctx.idempotency_key("load_contacts"));

        let other_day = RunContext::new("daily", date("2023-04-02"), "bucket");
        assert_ne!(ctx.idempotency_key("load_users"), other_day.idempotency_key("load_users"));
    }

    #[test]
    fn test_run_id_is_date_scoped() {
        let ctx = RunContext::new("daily", date("2023-04-01"), "bucket");
        assert_eq!(ctx.run_id(), "daily__2023-04-01");
    }
}
