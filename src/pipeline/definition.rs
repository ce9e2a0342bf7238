// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 etlflow contributors

//! Pipeline definition structures
//!
//! Defines the schema for etlflow.yaml files.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::EtlflowError;
use crate::pipeline::{LogicalDate, RetryPolicy};

/// Pipeline definition from etlflow.yaml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pipeline name, part of every run id
    pub name: String,

    /// First logical date, used as the default start of a backfill
    #[serde(default)]
    pub start_date: Option<LogicalDate>,

    /// Root directory for staged artifacts
    #[serde(default = "default_bucket")]
    pub bucket: PathBuf,

    /// Destination database, e.g. `sqlite://warehouse.db`
    pub database_url: String,

    /// Upper bound on one run, in seconds
    #[serde(default)]
    pub run_timeout_secs: Option<u64>,

    /// Default retry policy for steps that talk to the outside world
    #[serde(default)]
    pub retry: RetryConfig,

    /// Report delivery
    #[serde(default)]
    pub notify: NotifyConfig,

    /// Upstream sources, one branch each
    pub sources: Vec<SourceConfig>,
}

fn default_bucket() -> PathBuf {
    PathBuf::from("bucket")
}

impl PipelineConfig {
    /// Load a pipeline from a YAML or TOML file, chosen by extension
    pub fn from_file(path: &Path) -> Result<Self, EtlflowError> {
        if !path.exists() {
            return Err(EtlflowError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| EtlflowError::FileReadError {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml(&content),
            _ => Self::from_yaml(&content),
        }
    }

    /// Parse pipeline from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, EtlflowError> {
        serde_yaml::from_str(yaml).map_err(Into::into)
    }

    /// Parse pipeline from TOML string
    pub fn from_toml(s: &str) -> Result<Self, EtlflowError> {
        toml::from_str(s).map_err(Into::into)
    }

    /// Serialize pipeline to YAML
    pub fn to_yaml(&self) -> Result<String, EtlflowError> {
        serde_yaml::to_string(self).map_err(Into::into)
    }

    /// Get a source by name
    pub fn get_source(&self, name: &str) -> Option<&SourceConfig> {
        self.sources.iter().find(|s| s.name == name)
    }

    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_secs.map(Duration::from_secs)
    }

    /// Where run reports are written
    pub fn outbox(&self) -> PathBuf {
        self.notify.outbox.clone().unwrap_or_else(|| self.bucket.clone())
    }
}

/// Retry settings as written in the pipeline file
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_backoff_base_secs")]
    pub backoff_base_secs: u64,

    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
}

fn default_max_attempts() -> u32 {
    4
}

fn default_backoff_base_secs() -> u64 {
    300
}

fn default_backoff_factor() -> f64 {
    2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_base_secs: default_backoff_base_secs(),
            backoff_factor: default_backoff_factor(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::exponential(
            self.max_attempts,
            Duration::from_secs(self.backoff_base_secs),
            self.backoff_factor,
        )
    }
}

/// Report delivery settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Recipient written into the outbox message; no outbox message if unset
    #[serde(default)]
    pub target: Option<String>,

    /// Outbox root directory (defaults to the bucket)
    #[serde(default)]
    pub outbox: Option<PathBuf>,

    /// Also log the summary
    #[serde(default = "default_true")]
    pub log: bool,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            target: None,
            outbox: None,
            log: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Kind of upstream API
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Paginated CRM API (`page`/`limit` query, `has_more` flag)
    Crm,
    /// Document-store API filtered by day
    Docstore,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Crm => write!(f, "crm"),
            Self::Docstore => write!(f, "docstore"),
        }
    }
}

/// How the token is attached to requests
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuthStyle {
    /// No authentication
    None,
    /// Token sent as a query parameter with this name
    QueryParam(String),
    /// Token sent in a header with this name
    Header(String),
}

/// One upstream source and the table it loads into
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Source name (must be unique); prefixes its step ids
    pub name: String,

    pub kind: SourceKind,

    /// API base URL
    pub base_url: String,

    /// Path below `base_url` that lists records
    pub endpoint: String,

    /// Environment variable holding the API token
    #[serde(default)]
    pub token_env: Option<String>,

    /// Token placement (defaults depend on `kind`)
    #[serde(default, with = "serde_yaml::with::singleton_map")]
    pub auth: Option<AuthStyle>,

    /// Field of the response object holding the records
    /// (CRM default: the endpoint name; docstore default: top-level array)
    #[serde(default)]
    pub records_field: Option<String>,

    /// Page size for paginated sources
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Stop after this many pages
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,

    /// Destination table
    pub table: String,

    /// Readiness probe settings
    #[serde(default)]
    pub sensor: SensorConfig,

    /// Overrides the pipeline retry policy for this source's fetch
    #[serde(default)]
    pub retry: Option<RetryConfig>,

    /// Output columns, in order
    pub columns: Vec<ColumnConfig>,
}

fn default_page_size() -> u32 {
    200
}

fn default_max_pages() -> u32 {
    1000
}

impl SourceConfig {
    pub fn auth(&self) -> AuthStyle {
        match (&self.auth, self.kind) {
            (Some(auth), _) => auth.clone(),
            (None, SourceKind::Crm) => AuthStyle::QueryParam("token".into()),
            (None, SourceKind::Docstore) => AuthStyle::Header("x-auth-token".into()),
        }
    }

    pub fn records_field(&self) -> Option<String> {
        match (&self.records_field, self.kind) {
            (Some(field), _) => Some(field.clone()),
            (None, SourceKind::Crm) => self.endpoint.rsplit('/').next().map(String::from),
            (None, SourceKind::Docstore) => None,
        }
    }

    /// Full URL of the record listing
    pub fn url(&self) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            self.endpoint.trim_start_matches('/')
        )
    }

    pub fn fetch_retry(&self, default: &RetryConfig) -> RetryPolicy {
        self.retry.unwrap_or(*default).policy()
    }
}

/// Readiness probe settings
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct SensorConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_sensor_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_poll_interval_secs() -> u64 {
    60
}

fn default_sensor_timeout_secs() -> u64 {
    120
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            timeout_secs: default_sensor_timeout_secs(),
        }
    }
}

impl SensorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// One output column
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ColumnConfig {
    /// Column name in the destination table
    pub name: String,

    /// JSON pointer into each record, e.g. `/emails/0/email`
    pub pointer: String,
}
