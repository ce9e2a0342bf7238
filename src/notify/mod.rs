// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 etlflow contributors

//! Run notifications
//!
//! A notifier receives the finished [`RunReport`] exactly once per run.
//! Delivery failures are the caller's to log; they never re-open a run.

mod render;

pub use render::{render_html, render_text, subject};

use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::pipeline::artifacts::{write_atomic, ArtifactKind, Artifacts};
use crate::pipeline::RunReport;

/// The report could not be delivered
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("failed to deliver report to '{target}': {message}")]
pub struct DeliveryError {
    pub target: String,
    pub message: String,
}

/// Consumer of run reports
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, report: &RunReport) -> Result<(), DeliveryError>;
}

/// Emits the report summary through tracing
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, report: &RunReport) -> Result<(), DeliveryError> {
        let succeeded = report.succeeded().count();
        let failed = report.failed().count();
        let skipped = report.skipped().count();

        if failed + skipped == 0 {
            info!(run_id = %report.run_id, succeeded, "{}", subject(report));
        } else {
            warn!(run_id = %report.run_id, succeeded, failed, skipped, "{}", subject(report));
        }

        for entry in report.failed().chain(report.skipped()) {
            warn!(step = %entry.step_id, attempts = entry.attempts, "{}", entry.result);
        }
        debug!("\n{}", render_text(report));

        Ok(())
    }
}

/// Writes an HTML message for `target` into a date-keyed outbox file
///
/// Whatever picks messages up from the outbox (a mail relay, a chat bot)
/// is outside this crate. Re-running a date replaces that date's message.
#[derive(Debug, Clone)]
pub struct OutboxNotifier {
    target: String,
    outbox: Artifacts,
}

impl OutboxNotifier {
    pub fn new(target: impl Into<String>, outbox_root: impl Into<PathBuf>) -> Self {
        Self {
            target: target.into(),
            outbox: Artifacts::new(outbox_root),
        }
    }

    /// File the message for `report` is written to
    pub fn message_path(&self, report: &RunReport) -> PathBuf {
        self.outbox
            .path_for(ArtifactKind::Report, "report", report.logical_date)
    }
}

#[async_trait]
impl Notifier for OutboxNotifier {
    async fn notify(&self, report: &RunReport) -> Result<(), DeliveryError> {
        let path = self.message_path(report);
        let html = render_html(report, &self.target);

        write_atomic(&path, html.as_bytes())
            .await
            .map_err(|e| DeliveryError {
                target: self.target.clone(),
                message: e.to_string(),
            })?;

        info!(target_addr = %self.target, path = %path.display(), "report written to outbox");
        Ok(())
    }
}

/// Delivers to several notifiers; every one is attempted
pub struct FanoutNotifier {
    notifiers: Vec<Box<dyn Notifier>>,
}

impl FanoutNotifier {
    pub fn new(notifiers: Vec<Box<dyn Notifier>>) -> Self {
        Self { notifiers }
    }
}

#[async_trait]
impl Notifier for FanoutNotifier {
    /// Returns the first delivery error after trying all notifiers
    async fn notify(&self, report: &RunReport) -> Result<(), DeliveryError> {
        let mut first_error = None;

        for notifier in &self.notifiers {
            if let Err(e) = notifier.notify(report).await {
                warn!(error = %e, "notifier failed");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
