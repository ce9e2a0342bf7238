// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 etlflow contributors

//! Error recovery suggestions
//!
//! Provides actionable suggestions for recovering from errors.

/// A recovery suggestion with concrete steps
#[derive(Debug, Clone)]
pub struct RecoverySuggestion {
    /// Brief description of what to do
    pub action: String,
    /// Detailed steps
    pub steps: Vec<String>,
    /// Commands to run
    pub commands: Vec<String>,
}

impl RecoverySuggestion {
    /// Suggest fixing a circular dependency
    pub fn fix_circular_dependency(steps: &[String]) -> Self {
        Self {
            action: "Remove circular dependency".into(),
            steps: vec![
                format!("Detected cycle: {}", steps.join(" → ")),
                "Review the upstream lists of the steps above".into(),
                "Ensure steps form a directed acyclic graph (DAG)".into(),
            ],
            commands: vec![
                "# Visualize the graph:".into(),
                "etlflow graph --format mermaid".into(),
            ],
        }
    }

    /// Suggest creating a pipeline file
    pub fn create_pipeline() -> Self {
        Self {
            action: "Create a pipeline configuration".into(),
            steps: vec![
                "No etlflow.yaml found in current directory".into(),
                "Create the file or point to one with --config".into(),
            ],
            commands: vec!["etlflow validate --config path/to/etlflow.yaml".into()],
        }
    }

    /// Suggest exporting a missing source token
    pub fn set_token(var: &str) -> Self {
        Self {
            action: format!("Export {}", var),
            steps: vec![
                "Tokens are read from the environment, never from the pipeline file".into(),
            ],
            commands: vec![format!("export {}=<token>", var)],
        }
    }

    /// Suggest checking an upstream that never became ready
    pub fn check_source(target: &str, endpoint: &str) -> Self {
        Self {
            action: format!("Check that '{}' is reachable", target),
            steps: vec![
                format!("The readiness probe against {} never returned HTTP 200", endpoint),
                "Its branch was skipped; re-run the date once the source is back".into(),
            ],
            commands: vec![format!("curl -i '{}'", endpoint)],
        }
    }
}

impl std::fmt::Display for RecoverySuggestion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "→ {}", self.action)?;

        for step in &self.steps {
            writeln!(f, "  {}", step)?;
        }

        if !self.commands.is_empty() {
            writeln!(f)?;
            for cmd in &self.commands {
                writeln!(f, "  {}", cmd)?;
            }
        }

        Ok(())
    }
}
