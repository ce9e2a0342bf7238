// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 etlflow contributors

//! Backfill command - run a range of logical dates, oldest first

use colored::Colorize;
use miette::Result;
use std::path::PathBuf;

use super::run::print_report;
use super::{build_scheduler, default_logical_date, load_config, warn_missing_tokens};
use crate::pipeline::{LogicalDate, RunContext};
use crate::utils::{print_header, print_warning, result_label, run_status};

/// Run the backfill command
pub async fn run(
    config_path: PathBuf,
    from: Option<LogicalDate>,
    to: Option<LogicalDate>,
    verbose: bool,
) -> Result<()> {
    let config = load_config(&config_path, verbose)?;

    let from = from.or(config.start_date).ok_or_else(|| {
        miette::miette!(
            help = "Pass --from YYYY-MM-DD or set start_date in the pipeline file",
            "No start date for the backfill"
        )
    })?;
    let to = to.unwrap_or_else(default_logical_date);

    if from > to {
        return Err(miette::miette!(
            "Backfill range is empty: {} is after {}",
            from,
            to
        ));
    }

    let dates = LogicalDate::range_inclusive(from, to);
    let scheduler = build_scheduler(&config)?;
    warn_missing_tokens(&config);

    print_header(&format!(
        "Backfilling {} from {} to {} ({} runs)",
        config.name,
        from,
        to,
        dates.len()
    ));

    let mut failed_dates = Vec::new();

    for date in dates {
        let report = scheduler
            .run(RunContext::new(&config.name, date, &config.bucket))
            .await;

        if verbose {
            print_report(&config, &report, verbose);
        } else {
            println!(
                "  {} {} {}",
                date,
                run_status(report.status()),
                format!(
                    "({} succeeded, {} failed, {} skipped)",
                    report.succeeded().count(),
                    report.failed().count(),
                    report.skipped().count()
                )
                .dimmed()
            );
            for entry in report.failed() {
                println!("      {} {}", result_label(&entry.result), entry.step_id);
            }
        }

        if report.has_failures() {
            failed_dates.push(date);
        }
    }

    println!();
    if failed_dates.is_empty() {
        println!("{}", "Backfill complete.".green().bold());
        return Ok(());
    }

    for date in &failed_dates {
        print_warning(&format!(
            "{} had failed steps; re-run it with `etlflow run --date {}`",
            date, date
        ));
    }
    Err(miette::miette!(
        "{} of the backfilled dates had failed steps",
        failed_dates.len()
    ))
}
