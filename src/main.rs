// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 etlflow contributors

//! etlflow - daily ETL runner
//!
//! Extracts every configured source for a logical date, stages the data as
//! files, and replaces that date's rows in the destination database.

use clap::Parser;
use miette::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use etlflow::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over --verbose
    let default_filter = if cli.verbose { "etlflow=debug" } else { "etlflow=info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    etlflow::utils::apply_color_preference();

    // Change to specified directory if provided
    if let Some(ref dir) = cli.directory {
        std::env::set_current_dir(dir).map_err(|e| {
            miette::miette!("Failed to change to directory '{}': {}", dir.display(), e)
        })?;
    }

    // Dispatch to command handlers
    match cli.command {
        Commands::Run {
            config,
            date,
            dry_run,
        } => etlflow::cli::run::run(config, date, dry_run, cli.verbose).await,
        Commands::Backfill { config, from, to } => {
            etlflow::cli::backfill::run(config, from, to, cli.verbose).await
        }
        Commands::Validate { config } => etlflow::cli::validate::run(config, cli.verbose).await,
        Commands::Graph { config, format } => {
            etlflow::cli::graph::run(config, format, cli.verbose).await
        }
    }
}
