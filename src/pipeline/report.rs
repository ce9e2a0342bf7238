// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 etlflow contributors

//! Run report
//!
//! Entries are appended in completion order by the scheduler, one per step.
//! Once [`RunReportBuilder::finish`] is called the report is frozen and
//! handed to the notifier.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::pipeline::{LogicalDate, StepId, StepResult};

/// Outcome of one step instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportEntry {
    pub step_id: StepId,
    pub result: StepResult,
    /// Number of `execute` calls; 0 when the step was skipped
    pub attempts: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(with = "duration_ms")]
    pub duration: Duration,
}

/// Overall verdict of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every step succeeded
    Success,
    /// At least one step failed or was skipped
    Degraded,
}

/// Complete status picture of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub pipeline: String,
    pub run_id: String,
    pub logical_date: LogicalDate,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub entries: Vec<ReportEntry>,
}

impl RunReport {
    pub fn status(&self) -> RunStatus {
        if self.entries.iter().all(|e| e.result.is_success()) {
            RunStatus::Success
        } else {
            RunStatus::Degraded
        }
    }

    pub fn entry(&self, step_id: &str) -> Option<&ReportEntry> {
        self.entries.iter().find(|e| e.step_id == step_id)
    }

    pub fn result_of(&self, step_id: &str) -> Option<&StepResult> {
        self.entry(step_id).map(|e| &e.result)
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &ReportEntry> {
        self.entries.iter().filter(|e| e.result.is_success())
    }

    pub fn failed(&self) -> impl Iterator<Item = &ReportEntry> {
        self.entries.iter().filter(|e| e.result.is_failed())
    }

    pub fn skipped(&self) -> impl Iterator<Item = &ReportEntry> {
        self.entries.iter().filter(|e| e.result.is_skipped())
    }

    pub fn has_failures(&self) -> bool {
        self.failed().next().is_some()
    }

    pub fn duration(&self) -> Duration {
        (self.finished_at - self.started_at).to_std().unwrap_or_default()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Append-only accumulator owned by the scheduler for one run
#[derive(Debug)]
pub struct RunReportBuilder {
    pipeline: String,
    run_id: String,
    logical_date: LogicalDate,
    started_at: DateTime<Utc>,
    entries: Vec<ReportEntry>,
}

impl RunReportBuilder {
    pub fn new(pipeline: &str, run_id: &str, logical_date: LogicalDate) -> Self {
        Self {
            pipeline: pipeline.to_string(),
            run_id: run_id.to_string(),
            logical_date,
            started_at: Utc::now(),
            entries: Vec::new(),
        }
    }

    /// Record a terminal step; each step is recorded at most once
    pub fn record(&mut self, entry: ReportEntry) {
        debug_assert!(
            !self.contains(&entry.step_id),
            "step '{}' recorded twice",
            entry.step_id
        );
        self.entries.push(entry);
    }

    pub fn contains(&self, step_id: &str) -> bool {
        self.entries.iter().any(|e| e.step_id == step_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn finish(self) -> RunReport {
        RunReport {
            pipeline: self.pipeline,
            run_id: self.run_id,
            logical_date: self.logical_date,
            started_at: self.started_at,
            finished_at: Utc::now(),
            entries: self.entries,
        }
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{ErrorKind, Payload, SkipReason};

    fn entry(id: &str, result: StepResult, attempts: u32) -> ReportEntry {
        let now = Utc::now();
        ReportEntry {
            step_id: id.into(),
            result,
            attempts,
            started_at: now,
            finished_at: now,
            duration: Duration::from_millis(1500),
        }
    }

    #[test]
    fn test_status_and_partitions() {
        let date = LogicalDate::from_ymd(2023, 4, 1).unwrap();
        let mut builder = RunReportBuilder::new("daily", "daily__2023-04-01", date);
        builder.record(entry("fetch", StepResult::success(Payload::path("a.json")), 1));
        builder.record(entry(
            "load",
            StepResult::Failed {
                kind: ErrorKind::Constraint,
                message: "dup".into(),
            },
            1,
        ));
        builder.record(entry("notify_prep", StepResult::skipped(SkipReason::UpstreamFailed), 0));
        let report = builder.finish();

        assert_eq!(report.status(), RunStatus::Degraded);
        assert!(report.has_failures());
        assert_eq!(report.succeeded().count(), 1);
        assert_eq!(report.failed().count(), 1);
        assert_eq!(report.skipped().count(), 1);
        assert_eq!(report.entry("load").unwrap().attempts, 1);
    }

    #[test]
    fn test_json_keeps_completion_order_and_millis() {
        let date = LogicalDate::from_ymd(2023, 4, 1).unwrap();
        let mut builder = RunReportBuilder::new("daily", "daily__2023-04-01", date);
        builder.record(entry("b", StepResult::success(Payload::Empty), 1));
        builder.record(entry("a", StepResult::success(Payload::rows(2)), 2));
        let report = builder.finish();

        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["logical_date"], "2023-04-01");
        assert_eq!(json["entries"][0]["step_id"], "b");
        assert_eq!(json["entries"][1]["step_id"], "a");
        assert_eq!(json["entries"][1]["duration"], 1500);
        assert_eq!(report.status(), RunStatus::Success);
    }
}
