// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 etlflow contributors

//! Run command - execute the pipeline for one logical date

use colored::Colorize;
use miette::Result;
use std::path::PathBuf;

use super::{build_scheduler, default_logical_date, load_config, warn_missing_tokens};
use crate::connectors::steps::SourceSteps;
use crate::errors::RecoverySuggestion;
use crate::pipeline::{
    ArtifactKind, Artifacts, LogicalDate, PipelineConfig, RunContext, RunReport, Scheduler,
    SkipReason, StepResult,
};
use crate::utils::{code, print_header, print_info, print_section, result_label, run_status};

/// Run the pipeline
pub async fn run(
    config_path: PathBuf,
    date: Option<LogicalDate>,
    dry_run: bool,
    verbose: bool,
) -> Result<()> {
    let config = load_config(&config_path, verbose)?;
    let date = date.unwrap_or_else(default_logical_date);
    let scheduler = build_scheduler(&config)?;

    if dry_run {
        print_plan(&config, &scheduler, date);
        return Ok(());
    }

    warn_missing_tokens(&config);

    println!(
        "{} {} for {}",
        "Running".bold(),
        config.name,
        date.to_string().cyan()
    );

    let report = scheduler
        .run(RunContext::new(&config.name, date, &config.bucket))
        .await;

    print_report(&config, &report, verbose);

    if report.has_failures() {
        return Err(miette::miette!(
            "{} step(s) failed for {}",
            report.failed().count(),
            date
        ));
    }

    Ok(())
}

/// What a run of `date` would do, without touching any source
fn print_plan(config: &PipelineConfig, scheduler: &Scheduler, date: LogicalDate) {
    let ctx = RunContext::new(&config.name, date, &config.bucket);
    print_header(&format!("Execution plan for {}", ctx.run_id()));
    println!("{}", scheduler.graph().to_text());

    let artifacts = Artifacts::new(&config.bucket);
    print_section("Artifacts");
    for source in &config.sources {
        for kind in [ArtifactKind::Extracted, ArtifactKind::Transformed] {
            print_info(&artifacts.path_for(kind, &source.name, date).display().to_string());
        }
    }

    if let Some(timeout) = config.run_timeout() {
        print_section("Run timeout");
        print_info(&format!("{}s", timeout.as_secs()));
    }

    println!();
    println!("{}", "Dry run: nothing was executed.".dimmed());
}

/// Per-step results and the overall status of one run
pub(crate) fn print_report(config: &PipelineConfig, report: &RunReport, verbose: bool) {
    println!();
    for entry in &report.entries {
        let mut line = format!(
            "  {} {} {}",
            result_label(&entry.result),
            entry.step_id,
            format!(
                "({} attempt(s), {:.2}s)",
                entry.attempts,
                entry.duration.as_secs_f64()
            )
            .dimmed()
        );
        match &entry.result {
            StepResult::Success { payload } if verbose => {
                line.push_str(&format!(" {}", payload.to_string().dimmed()));
            }
            StepResult::Failed { kind, message } => {
                line.push_str(&format!(" [{}] {}", kind, message));
            }
            StepResult::Skipped { reason } => {
                line.push_str(&format!(" ({})", reason));
            }
            _ => {}
        }
        println!("{}", line);
    }

    // sources whose sensor never came up
    for source in &config.sources {
        let fetch = SourceSteps::for_source(&source.name).fetch;
        if report.result_of(&fetch) == Some(&StepResult::skipped(SkipReason::UpstreamUnavailable)) {
            println!();
            println!(
                "{}",
                RecoverySuggestion::check_source(&format!("{}_api", source.name), &source.url())
            );
        }
    }

    println!();
    println!(
        "{} {} ({} succeeded, {} failed, {} skipped in {:.1}s)",
        "Run".bold(),
        run_status(report.status()),
        report.succeeded().count(),
        report.failed().count(),
        report.skipped().count(),
        report.duration().as_secs_f64()
    );

    if config.notify.target.is_some() {
        let path = Artifacts::new(config.outbox()).path_for(
            ArtifactKind::Report,
            "report",
            report.logical_date,
        );
        println!("  Report: {}", code(&path.display().to_string()));
    }
}
