// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 etlflow contributors

//! Validate command - check pipeline configuration

use colored::Colorize;
use miette::Result;
use std::path::PathBuf;

use super::build_graph;
use crate::errors::{EtlflowError, RecoverySuggestion};
use crate::pipeline::{PipelineConfig, PipelineValidator};

/// Run the validate command
pub async fn run(config_path: PathBuf, verbose: bool) -> Result<()> {
    println!("{}", "Validating pipeline...".bold());
    println!();

    let config = match PipelineConfig::from_file(&config_path) {
        Ok(config) => config,
        Err(e @ EtlflowError::ConfigNotFound { .. }) => {
            eprintln!("{}", RecoverySuggestion::create_pipeline());
            return Err(e.into());
        }
        Err(e) => {
            eprintln!("  {} Failed to parse pipeline", "✗".red());
            eprintln!();
            return Err(e.into());
        }
    };

    println!("  {} Pipeline file parses", "✓".green());

    let validation = PipelineValidator::validate(&config)?;
    let missing_tokens = PipelineValidator::validate_environment(&config);

    let mut has_issues = false;

    if !validation.errors.is_empty() {
        has_issues = true;
        println!();
        println!("{}:", "Errors".red().bold());
        for error in &validation.errors {
            println!("  {} {}", "✗".red(), error);
        }
    }

    if !missing_tokens.is_empty() {
        has_issues = true;
        println!();
        println!("{}:", "Missing tokens".yellow().bold());
        for (source, var) in &missing_tokens {
            println!("  {} Source '{}': {} is not set", "⚠".yellow(), source, var);
        }
    }

    if !validation.warnings.is_empty() {
        println!();
        println!("{}:", "Warnings".yellow().bold());
        for warning in &validation.warnings {
            println!("  {} {}", "⚠".yellow(), warning);
        }
    }

    if validation.is_valid() {
        let graph = build_graph(&config)?;
        println!();
        println!(
            "  {} {} steps in {} layers",
            "✓".green(),
            graph.len(),
            graph.depth()
        );

        if verbose {
            println!();
            println!("{}:", "Pipeline summary".bold());
            println!("  Name: {}", config.name);
            println!("  Database: {}", config.database_url);
            println!("  Bucket: {}", config.bucket.display());
            for source in &config.sources {
                println!(
                    "    - {} ({}) → {} {}",
                    source.name,
                    source.kind,
                    source.table,
                    format!("[{} columns]", source.columns.len()).dimmed()
                );
            }
        }
    }

    println!();

    if !validation.is_valid() {
        return Err(miette::miette!("Pipeline validation failed"));
    }

    if has_issues {
        println!("{}", "Pipeline is valid but has warnings.".yellow().bold());
    } else {
        println!("{}", "Pipeline is valid!".green().bold());
    }
    Ok(())
}
