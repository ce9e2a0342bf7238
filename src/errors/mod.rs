// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 etlflow contributors

//! Error types with actionable messages
//!
//! `EtlflowError` covers everything that can abort a command: graph
//! construction, configuration loading and the I/O around them. Failures
//! inside a running step never surface here; they are captured into the
//! step's result and reported through the notifier.

mod recovery;

pub use recovery::RecoverySuggestion;

use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for etlflow operations
pub type EtlflowResult<T> = Result<T, EtlflowError>;

/// Main error type for etlflow
#[derive(Error, Debug, Diagnostic)]
pub enum EtlflowError {
    // ─────────────────────────────────────────────────────────────────────────
    // Graph Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Circular dependency detected: {}", steps.join(" → "))]
    #[diagnostic(
        code(etlflow::circular_dependency),
        help("Review the upstream lists of these steps to remove the cycle")
    )]
    CircularDependency { steps: Vec<String> },

    #[error("Step '{step}' depends on unknown step '{dependency}'")]
    #[diagnostic(
        code(etlflow::unknown_dependency),
        help("Check that '{dependency}' is declared in the graph")
    )]
    UnknownDependency { step: String, dependency: String },

    #[error("Step '{step}' is declared more than once")]
    #[diagnostic(code(etlflow::duplicate_step))]
    DuplicateStep { step: String },

    // ─────────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Pipeline file not found: {path}")]
    #[diagnostic(
        code(etlflow::config_not_found),
        help("Create etlflow.yaml or pass --config <FILE>")
    )]
    ConfigNotFound { path: PathBuf },

    #[error("Invalid pipeline configuration: {reason}")]
    #[diagnostic(code(etlflow::invalid_config))]
    InvalidConfig {
        reason: String,
        #[help]
        help: Option<String>,
    },

    #[error("Invalid logical date '{value}'")]
    #[diagnostic(
        code(etlflow::invalid_date),
        help("Logical dates use the YYYY-MM-DD format, e.g. 2023-04-01")
    )]
    InvalidDate { value: String },

    // ─────────────────────────────────────────────────────────────────────────
    // File Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Failed to read file '{path}': {error}")]
    #[diagnostic(code(etlflow::file_read_error))]
    FileReadError { path: PathBuf, error: String },

    #[error("Failed to write file '{path}': {error}")]
    #[diagnostic(code(etlflow::file_write_error))]
    FileWriteError { path: PathBuf, error: String },

    // ─────────────────────────────────────────────────────────────────────────
    // Format and Backend Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("YAML parsing error: {message}")]
    #[diagnostic(code(etlflow::yaml_error))]
    Yaml { message: String },

    #[error("JSON parsing error: {message}")]
    #[diagnostic(code(etlflow::json_error))]
    Json { message: String },

    #[error("TOML parsing error: {message}")]
    #[diagnostic(code(etlflow::toml_error))]
    Toml { message: String },

    #[error("CSV error: {message}")]
    #[diagnostic(code(etlflow::csv_error))]
    Csv { message: String },

    #[error("Database error: {message}")]
    #[diagnostic(
        code(etlflow::database_error),
        help("Check database_url in the pipeline file")
    )]
    Database { message: String },

    #[error("HTTP client error: {message}")]
    #[diagnostic(code(etlflow::http_error))]
    Http { message: String },
}

impl From<serde_yaml::Error> for EtlflowError {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Yaml { message: e.to_string() }
    }
}

impl From<serde_json::Error> for EtlflowError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json { message: e.to_string() }
    }
}

impl From<toml::de::Error> for EtlflowError {
    fn from(e: toml::de::Error) -> Self {
        Self::Toml { message: e.to_string() }
    }
}

impl From<csv::Error> for EtlflowError {
    fn from(e: csv::Error) -> Self {
        Self::Csv { message: e.to_string() }
    }
}

impl From<sqlx::Error> for EtlflowError {
    fn from(e: sqlx::Error) -> Self {
        Self::Database { message: e.to_string() }
    }
}

impl From<reqwest::Error> for EtlflowError {
    fn from(e: reqwest::Error) -> Self {
        Self::Http { message: e.to_string() }
    }
}

impl EtlflowError {
    /// Create an invalid-config error with a hint
    pub fn invalid_config(reason: impl Into<String>, help: Option<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
            help,
        }
    }
}
