// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 etlflow contributors

//! CLI command definitions and handlers
//!
//! Defines the command-line interface for etlflow.

pub mod backfill;
pub mod graph;
pub mod run;
pub mod validate;

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use miette::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::connectors::{daily_graph, http_bindings, SqlLoader};
use crate::errors::{EtlflowError, RecoverySuggestion};
use crate::notify::{FanoutNotifier, LogNotifier, Notifier, OutboxNotifier};
use crate::pipeline::{Graph, LogicalDate, PipelineConfig, PipelineValidator, Scheduler};

/// Daily extract/transform/load runner
///
/// Pulls each source for one logical date, stages the data as files and
/// replaces that date's rows in the destination database.
#[derive(Parser, Debug)]
#[clap(
    name = "etlflow",
    version,
    about = "Daily ETL runner with dependency-aware scheduling",
    long_about = None,
    after_help = "Examples:\n\
        etlflow validate                     Check etlflow.yaml\n\
        etlflow run                          Run yesterday's date\n\
        etlflow run --date 2023-04-01        Run (or re-run) one date\n\
        etlflow backfill --from 2023-04-01   Run every date up to yesterday\n\
        etlflow graph --format mermaid       Show the step graph\n\n\
        See 'etlflow <command> --help' for more information on a specific command."
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[clap(short, long, global = true)]
    pub verbose: bool,

    /// Change to directory before executing
    #[clap(short = 'C', long, global = true, value_name = "DIR")]
    pub directory: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the pipeline for one logical date
    Run {
        /// Pipeline file
        #[clap(short, long, default_value = "etlflow.yaml")]
        config: PathBuf,

        /// Logical date (YYYY-MM-DD), defaults to yesterday
        #[clap(short, long)]
        date: Option<LogicalDate>,

        /// Show the execution plan without running anything
        #[clap(long)]
        dry_run: bool,
    },

    /// Run the pipeline for every date in a range, oldest first
    Backfill {
        /// Pipeline file
        #[clap(short, long, default_value = "etlflow.yaml")]
        config: PathBuf,

        /// First date, defaults to the pipeline's start_date
        #[clap(long)]
        from: Option<LogicalDate>,

        /// Last date (inclusive), defaults to yesterday
        #[clap(long)]
        to: Option<LogicalDate>,
    },

    /// Validate pipeline configuration
    Validate {
        /// Pipeline file to validate
        #[clap(short, long, default_value = "etlflow.yaml")]
        config: PathBuf,
    },

    /// Show the step graph
    Graph {
        /// Pipeline file
        #[clap(short, long, default_value = "etlflow.yaml")]
        config: PathBuf,

        /// Output format
        #[clap(short, long, value_enum, default_value_t = GraphFormat::Text)]
        format: GraphFormat,
    },
}

/// Graph output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum GraphFormat {
    Text,
    Dot,
    Mermaid,
}

/// The date a scheduled daily run processes: yesterday, in UTC
pub fn default_logical_date() -> LogicalDate {
    let today = chrono::Utc::now().date_naive();
    LogicalDate::new(today.pred_opt().unwrap_or(today))
}

/// Load and validate the pipeline file, printing any problems
pub(crate) fn load_config(path: &Path, verbose: bool) -> Result<PipelineConfig> {
    let config = match PipelineConfig::from_file(path) {
        Ok(config) => config,
        Err(e @ EtlflowError::ConfigNotFound { .. }) => {
            eprintln!("{}", RecoverySuggestion::create_pipeline());
            return Err(e.into());
        }
        Err(e) => return Err(e.into()),
    };

    let validation = PipelineValidator::validate(&config)?;

    if !validation.is_valid() {
        eprintln!("{}", "Pipeline validation failed:".red().bold());
        for error in &validation.errors {
            eprintln!("  {} {}", "✗".red(), error);
        }
        return Err(miette::miette!("Pipeline configuration is invalid"));
    }

    if validation.has_warnings() && verbose {
        eprintln!("{}", "Pipeline warnings:".yellow().bold());
        for warning in &validation.warnings {
            eprintln!("  {} {}", "⚠".yellow(), warning);
        }
        eprintln!();
    }

    Ok(config)
}

/// Build the step graph of `config` with HTTP sources and the SQL loader
///
/// Nothing connects yet: the database pool is lazy and tokens are only
/// needed once a fetch runs.
pub(crate) fn build_graph(config: &PipelineConfig) -> Result<Graph> {
    let loader = Arc::new(SqlLoader::lazy(&config.database_url)?);
    let bindings = http_bindings(config)?;

    daily_graph(config, bindings, loader).map_err(|e| {
        if let EtlflowError::CircularDependency { steps } = &e {
            eprintln!("{}", RecoverySuggestion::fix_circular_dependency(steps));
        }
        e.into()
    })
}

/// Notifiers configured for `config`
pub(crate) fn build_notifier(config: &PipelineConfig) -> Arc<dyn Notifier> {
    let mut notifiers: Vec<Box<dyn Notifier>> = Vec::new();

    if config.notify.log {
        notifiers.push(Box::new(LogNotifier));
    }
    if let Some(target) = &config.notify.target {
        notifiers.push(Box::new(OutboxNotifier::new(target.clone(), config.outbox())));
    }

    Arc::new(FanoutNotifier::new(notifiers))
}

/// Scheduler ready to run any logical date of `config`
pub(crate) fn build_scheduler(config: &PipelineConfig) -> Result<Scheduler> {
    let graph = build_graph(config)?;

    Ok(
        Scheduler::new(config.name.clone(), Arc::new(graph), build_notifier(config))
            .with_run_timeout(config.run_timeout()),
    )
}

/// Warn about tokens missing from the environment
pub(crate) fn warn_missing_tokens(config: &PipelineConfig) {
    for (source, var) in PipelineValidator::validate_environment(config) {
        eprintln!(
            "  {} Source '{}': {} is not set, its fetch will fail",
            "⚠".yellow(),
            source,
            var
        );
        eprintln!("{}", RecoverySuggestion::set_token(&var));
    }
}
