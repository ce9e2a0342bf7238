// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 etlflow contributors

//! Terminal output helpers

use colored::{ColoredString, Colorize};

use crate::pipeline::{RunStatus, StepResult};

/// Turn colors off when NO_COLOR is set
pub fn apply_color_preference() {
    if std::env::var_os("NO_COLOR").is_some() {
        colored::control::set_override(false);
    }
}

/// Fixed-width label for a step result
pub fn result_label(result: &StepResult) -> ColoredString {
    let label = format!("{:<8}", result.label());
    match result {
        StepResult::Success { .. } => label.green(),
        StepResult::Failed { .. } => label.red(),
        StepResult::Skipped { .. } => label.yellow(),
    }
}

pub fn run_status(status: RunStatus) -> ColoredString {
    match status {
        RunStatus::Success => "success".green().bold(),
        RunStatus::Degraded => "degraded".yellow().bold(),
    }
}

/// Style for code/commands
pub fn code(msg: &str) -> ColoredString {
    msg.cyan()
}

/// Print a styled header
pub fn print_header(title: &str) {
    println!("{}", title.bold());
    println!("{}", "═".repeat(title.chars().count().max(40)));
}

/// Print a styled section
pub fn print_section(title: &str) {
    println!();
    println!("{}:", title.bold());
}

pub fn print_warning(msg: &str) {
    println!("  {} {}", "⚠".yellow(), msg);
}

pub fn print_info(msg: &str) {
    println!("  {} {}", "→".blue(), msg);
}
