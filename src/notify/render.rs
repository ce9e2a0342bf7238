// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 etlflow contributors

//! Report rendering

use std::fmt::Write;

use crate::pipeline::{ReportEntry, RunReport, RunStatus};

/// Message subject line
pub fn subject(report: &RunReport) -> String {
    let status = match report.status() {
        RunStatus::Success => "ok",
        RunStatus::Degraded => "degraded",
    };
    format!("Pipeline Report - {} ({})", report.logical_date, status)
}

/// Plain-text summary, one line per step in completion order
pub fn render_text(report: &RunReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", subject(report));
    let _ = writeln!(out, "run: {}", report.run_id);
    let _ = writeln!(
        out,
        "succeeded: {}, failed: {}, skipped: {}",
        report.succeeded().count(),
        report.failed().count(),
        report.skipped().count()
    );

    for entry in &report.entries {
        let _ = writeln!(
            out,
            "  {:<8} {} (attempts: {}, {:.2}s) {}",
            entry.result.label(),
            entry.step_id,
            entry.attempts,
            entry.duration.as_secs_f64(),
            detail(entry)
        );
    }

    out
}

/// HTML message body addressed to `target`
pub fn render_html(report: &RunReport, target: &str) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "<!-- to: {} -->", escape(target));
    let _ = writeln!(out, "<!-- subject: {} -->", escape(&subject(report)));
    let _ = writeln!(out, "<h3>Task Report for {}</h3>", report.logical_date);

    section(&mut out, "Successful tasks", report.succeeded());
    section(&mut out, "Failed tasks", report.failed());
    section(&mut out, "Skipped tasks", report.skipped());

    out
}

fn section<'a>(out: &mut String, title: &str, entries: impl Iterator<Item = &'a ReportEntry>) {
    let entries: Vec<_> = entries.collect();
    if entries.is_empty() {
        return;
    }

    let _ = writeln!(out, "<p>{}:</p>", title);
    let _ = writeln!(out, "<ul>");
    for entry in entries {
        let _ = writeln!(
            out,
            "    <li>{} - {} ({})</li>",
            escape(&entry.step_id),
            entry.finished_at.format("%Y-%m-%dT%H:%M:%SZ"),
            escape(&detail(entry))
        );
    }
    let _ = writeln!(out, "</ul>");
}

fn detail(entry: &ReportEntry) -> String {
    entry.result.to_string()
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{
        ErrorKind, LogicalDate, Payload, RunReportBuilder, SkipReason, StepResult,
    };
    use chrono::Utc;
    use std::time::Duration;

    fn entry(id: &str, result: StepResult) -> ReportEntry {
        ReportEntry {
            step_id: id.into(),
            result,
            attempts: 1,
            started_at: Utc::now(),
            finished_at: Utc::now(),
            duration: Duration::from_millis(250),
        }
    }

    fn degraded_report() -> RunReport {
        let date = LogicalDate::from_ymd(2023, 4, 1).unwrap();
        let mut builder = RunReportBuilder::new("daily", "daily__2023-04-01", date);
        builder.record(entry("fetch_users", StepResult::success(Payload::path("u.json"))));
        builder.record(entry(
            "fetch_contacts",
            StepResult::Failed {
                kind: ErrorKind::Auth,
                message: "<401>".into(),
            },
        ));
        builder.record(entry("load_contacts", StepResult::skipped(SkipReason::UpstreamFailed)));
        builder.finish()
    }

    #[test]
    fn test_html_lists_real_successes() {
        let html = render_html(&degraded_report(), "ops@example.com");

        assert!(html.contains("<h3>Task Report for 2023-04-01</h3>"));
        assert!(html.contains("<p>Successful tasks:</p>"));
        assert!(html.contains("<li>fetch_users - "));
        assert!(html.contains("<p>Failed tasks:</p>"));
        assert!(html.contains("&lt;401&gt;"));
        assert!(html.contains("load_contacts"));
    }

    #[test]
    fn test_subject_and_text() {
        let report = degraded_report();
        assert_eq!(subject(&report), "Pipeline Report - 2023-04-01 (degraded)");

        let text = render_text(&report);
        assert!(text.contains("succeeded: 1, failed: 1, skipped: 1"));
        assert!(text.contains("skipped  load_contacts"));
    }
}
