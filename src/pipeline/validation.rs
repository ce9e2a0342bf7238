// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 etlflow contributors

//! Pipeline validation
//!
//! Validates pipeline configuration before any step is built.

use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

use crate::errors::EtlflowError;
use crate::pipeline::{PipelineConfig, RetryConfig, SourceConfig};

/// Column every destination table carries in addition to the configured ones
pub const LOGICAL_DATE_COLUMN: &str = "logical_date";

/// SQL-safe identifier: letters, digits, underscore; no leading digit
pub fn is_identifier(name: &str) -> bool {
    static IDENT: OnceLock<Option<Regex>> = OnceLock::new();
    IDENT
        .get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").ok())
        .as_ref()
        .is_some_and(|re| re.is_match(name))
}

/// Pipeline validator
pub struct PipelineValidator;

impl PipelineValidator {
    /// Validate a pipeline configuration
    pub fn validate(config: &PipelineConfig) -> Result<ValidationResult, EtlflowError> {
        let mut result = ValidationResult::new();

        if !is_identifier(&config.name) {
            result.add_error(&format!(
                "Pipeline name '{}' must be a plain identifier",
                config.name
            ));
        }

        if config.sources.is_empty() {
            result.add_error("Pipeline has no sources defined");
        }

        let mut seen_names = HashSet::new();
        let mut seen_tables = HashSet::new();
        for source in &config.sources {
            if !seen_names.insert(&source.name) {
                result.add_error(&format!("Duplicate source name: '{}'", source.name));
            }
            if !seen_tables.insert(&source.table) {
                result.add_error(&format!(
                    "Source '{}': table '{}' is already loaded by another source",
                    source.name, source.table
                ));
            }
        }

        Self::validate_retry("Pipeline", &config.retry, &mut result);

        if config.run_timeout_secs == Some(0) {
            result.add_error("run_timeout_secs must be greater than zero");
        }

        if config.database_url.trim().is_empty() {
            result.add_error("database_url is empty");
        }

        for source in &config.sources {
            Self::validate_source(source, &mut result);
        }

        Ok(result)
    }

    /// Validate a single source
    fn validate_source(source: &SourceConfig, result: &mut ValidationResult) {
        if !is_identifier(&source.name) {
            result.add_error(&format!(
                "Source '{}': name must be a plain identifier",
                source.name
            ));
        }

        if !is_identifier(&source.table) {
            result.add_error(&format!(
                "Source '{}': table '{}' is not a valid identifier",
                source.name, source.table
            ));
        }

        if let Err(e) = reqwest::Url::parse(&source.url()) {
            result.add_error(&format!(
                "Source '{}': invalid URL '{}': {}",
                source.name,
                source.url(),
                e
            ));
        }

        if source.page_size == 0 {
            result.add_error(&format!("Source '{}': page_size must be positive", source.name));
        }

        if source.columns.is_empty() {
            result.add_error(&format!("Source '{}': no columns defined", source.name));
        }

        let mut seen_columns = HashSet::new();
        for column in &source.columns {
            if !is_identifier(&column.name) {
                result.add_error(&format!(
                    "Source '{}': column '{}' is not a valid identifier",
                    source.name, column.name
                ));
            } else if column.name == LOGICAL_DATE_COLUMN {
                result.add_error(&format!(
                    "Source '{}': column name '{}' is reserved",
                    source.name, LOGICAL_DATE_COLUMN
                ));
            }

            if !seen_columns.insert(&column.name) {
                result.add_error(&format!(
                    "Source '{}': duplicate column '{}'",
                    source.name, column.name
                ));
            }

            if !column.pointer.is_empty() && !column.pointer.starts_with('/') {
                result.add_error(&format!(
                    "Source '{}': pointer '{}' for column '{}' must start with '/'",
                    source.name, column.pointer, column.name
                ));
            }
        }

        if source.sensor.poll_interval_secs == 0 {
            result.add_error(&format!(
                "Source '{}': sensor poll interval must be positive",
                source.name
            ));
        } else if source.sensor.timeout_secs < source.sensor.poll_interval_secs {
            result.add_warning(&format!(
                "Source '{}': sensor timeout is shorter than its poll interval; \
                 only one probe will run",
                source.name
            ));
        }

        if let Some(retry) = &source.retry {
            Self::validate_retry(&format!("Source '{}'", source.name), retry, result);
        }

        if source.token_env.is_none() {
            result.add_warning(&format!(
                "Source '{}': no token_env set; requests are sent unauthenticated",
                source.name
            ));
        }
    }

    fn validate_retry(scope: &str, retry: &RetryConfig, result: &mut ValidationResult) {
        if retry.max_attempts == 0 {
            result.add_error(&format!("{}: retry.max_attempts must be at least 1", scope));
        }
        if !(retry.backoff_factor.is_finite() && retry.backoff_factor >= 1.0) {
            result.add_error(&format!(
                "{}: retry.backoff_factor must be a finite number of at least 1.0",
                scope
            ));
        }
    }

    /// `(source, variable)` for every token variable that is unset (runtime validation)
    pub fn validate_environment(config: &PipelineConfig) -> Vec<(String, String)> {
        config
            .sources
            .iter()
            .filter_map(|source| {
                let var = source.token_env.as_ref()?;
                match std::env::var(var) {
                    Ok(value) if !value.is_empty() => None,
                    _ => Some((source.name.clone(), var.clone())),
                }
            })
            .collect()
    }
}

/// Result of pipeline validation
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, message: &str) {
        self.errors.push(message.to_string());
    }

    pub fn add_warning(&mut self, message: &str) {
        self.warnings.push(message.to_string());
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    /// Collapse into the first error, if any
    pub fn into_result(self) -> Result<Vec<String>, EtlflowError> {
        match self.errors.into_iter().next() {
            Some(reason) => Err(EtlflowError::invalid_config(
                reason,
                Some("Run `etlflow validate` to list every problem".into()),
            )),
            None => Ok(self.warnings),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(extra_source: &str) -> PipelineConfig {
        let yaml = format!(
            r#"
name: daily
database_url: "sqlite::memory:"
sources:
  - name: contacts
    kind: crm
    base_url: https://crm.example.com/api/v1
    endpoint: contacts
    token_env: ETLFLOW_TEST_UNSET_TOKEN
    table: contacts
    columns:
      - {{ name: id, pointer: /id }}
{}"#,
            extra_source
        );
        PipelineConfig::from_yaml(&yaml).unwrap()
    }

    #[test]
    fn test_valid_pipeline() {
        let result = PipelineValidator::validate(&config("")).unwrap();
        assert!(result.is_valid(), "{:?}", result.errors);
        assert!(!result.has_warnings());
    }

    #[test]
    fn test_validate_empty_pipeline() {
        let mut config = config("");
        config.sources.clear();

        let result = PipelineValidator::validate(&config).unwrap();
        assert!(!result.is_valid());
        assert!(result.errors[0].contains("no sources"));
    }

    #[test]
    fn test_validate_duplicate_names_and_tables() {
        let result = PipelineValidator::validate(&config(
            r#"
  - name: contacts
    kind: docstore
    base_url: http://localhost:3000
    endpoint: users
    table: contacts
    columns:
      - { name: id, pointer: /_id }
"#,
        ))
        .unwrap();

        assert!(result.errors.iter().any(|e| e.contains("Duplicate source")));
        assert!(result.errors.iter().any(|e| e.contains("already loaded")));
        assert!(result.warnings.iter().any(|w| w.contains("unauthenticated")));
    }

    #[test]
    fn test_validate_columns() {
        let result = PipelineValidator::validate(&config(
            r#"
  - name: users
    kind: docstore
    base_url: http://localhost:3000
    endpoint: users
    table: users
    columns:
      - { name: "drop table", pointer: /a }
      - { name: logical_date, pointer: /b }
      - { name: email, pointer: email }
      - { name: email, pointer: /email }
"#,
        ))
        .unwrap();

        assert!(result.errors.iter().any(|e| e.contains("not a valid identifier")));
        assert!(result.errors.iter().any(|e| e.contains("reserved")));
        assert!(result.errors.iter().any(|e| e.contains("must start with '/'")));
        assert!(result.errors.iter().any(|e| e.contains("duplicate column")));
    }

    #[test]
    fn test_validate_retry_bounds() {
        let mut config = config("");
        config.retry.max_attempts = 0;
        config.retry.backoff_factor = 0.5;

        let result = PipelineValidator::validate(&config).unwrap();
        assert_eq!(result.errors.len(), 2);
        assert!(result.into_result().is_err());
    }

    #[test]
    fn test_validate_rejects_infinite_backoff() {
        let config = config("retry:\n  backoff_factor: .inf\n");
        assert!(config.retry.backoff_factor.is_infinite());

        let result = PipelineValidator::validate(&config).unwrap();
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("finite"));
    }

    #[test]
    fn test_environment_reports_unset_tokens() {
        let missing = PipelineValidator::validate_environment(&config(""));
        assert_eq!(
            missing,
            vec![("contacts".to_string(), "ETLFLOW_TEST_UNSET_TOKEN".to_string())]
        );
    }

    #[test]
    fn test_identifier() {
        assert!(is_identifier("crm_contacts"));
        assert!(is_identifier("_x1"));
        assert!(!is_identifier("1abc"));
        assert!(!is_identifier("a-b"));
        assert!(!is_identifier(""));
    }
}
