// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 etlflow contributors

//! The daily extract/transform/load steps and the graph they form
//!
//! Each source becomes a chain of four steps:
//!
//! ```text
//! [sensor] → fetch_<src> → transform_<src> → stage_<src> → load_<src>
//! ```
//!
//! Every step writes a date-keyed artifact or replaces a date-keyed set of
//! rows, so re-running a date overwrites instead of duplicating.

use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::errors::{EtlflowError, EtlflowResult};
use crate::pipeline::artifacts::write_atomic;
use crate::pipeline::{
    ArtifactKind, ErrorKind, Graph, Payload, PipelineConfig, RetryPolicy, RunContext, Sensor,
    SourceConfig, SourceKind, Step, StepError, StepInputs, StepSpec,
};
use crate::utils::hash_bytes;

use super::{
    fetch_all, read_csv, to_tabular, write_csv, CrmExtractor, DocStoreExtractor, Extractor,
    HttpSensor, Loader, TabularSchema,
};

/// Ids of the four steps of one source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSteps {
    pub fetch: String,
    pub transform: String,
    pub stage: String,
    pub load: String,
}

impl SourceSteps {
    pub fn for_source(name: &str) -> Self {
        Self {
            fetch: format!("fetch_{}", name),
            transform: format!("transform_{}", name),
            stage: format!("stage_{}", name),
            load: format!("load_{}", name),
        }
    }
}

/// Runtime pieces behind one configured source
#[derive(Clone)]
pub struct SourceBinding {
    pub source: SourceConfig,
    pub extractor: Arc<dyn Extractor>,
    pub sensor: Option<Arc<dyn Sensor>>,
}

/// HTTP extractor and sensor for every configured source
///
/// Tokens are read from the environment here; a missing token surfaces as
/// an auth failure of the fetch step, not as an error now.
pub fn http_bindings(config: &PipelineConfig) -> EtlflowResult<Vec<SourceBinding>> {
    config
        .sources
        .iter()
        .map(|source| {
            let extractor: Arc<dyn Extractor> = match source.kind {
                SourceKind::Crm => Arc::new(CrmExtractor::new(source)?),
                SourceKind::Docstore => Arc::new(DocStoreExtractor::new(source)?),
            };
            let sensor: Arc<dyn Sensor> = Arc::new(HttpSensor::new(source)?);

            Ok(SourceBinding {
                source: source.clone(),
                extractor,
                sensor: Some(sensor),
            })
        })
        .collect()
}

/// Build the daily graph: one independent chain per source
pub fn daily_graph(
    config: &PipelineConfig,
    bindings: Vec<SourceBinding>,
    loader: Arc<dyn Loader>,
) -> EtlflowResult<Graph> {
    let io_retry = config.retry.policy();
    let mut steps = Vec::with_capacity(bindings.len() * 4);

    for binding in bindings {
        let source = &binding.source;
        let ids = SourceSteps::for_source(&source.name);
        let schema = Arc::new(TabularSchema::from_source(source));

        let mut fetch = StepSpec::new(
            ids.fetch.clone(),
            Arc::new(FetchStep {
                name: source.name.clone(),
                extractor: binding.extractor.clone(),
                max_pages: source.max_pages,
            }),
        )
        .with_retry(source.fetch_retry(&config.retry));
        if let Some(sensor) = binding.sensor {
            fetch = fetch.gated_by(sensor);
        }

        let transform = StepSpec::new(
            ids.transform.clone(),
            Arc::new(TransformStep {
                name: source.name.clone(),
                schema: schema.clone(),
            }),
        )
        .after([ids.fetch.clone()])
        .with_retry(RetryPolicy::none());

        let stage = StepSpec::new(
            ids.stage.clone(),
            Arc::new(StageStep {
                loader: loader.clone(),
                schema: schema.clone(),
            }),
        )
        .after([ids.transform.clone()])
        .with_retry(io_retry);

        let load = StepSpec::new(
            ids.load.clone(),
            Arc::new(LoadStep {
                loader: loader.clone(),
                schema,
            }),
        )
        .after([ids.stage.clone()])
        .with_retry(io_retry);

        steps.extend([fetch, transform, stage, load]);
    }

    Graph::build(steps)
}

/// The staged file handed over by the single upstream step
fn upstream_file(inputs: &StepInputs) -> Result<&PathBuf, StepError> {
    inputs
        .single()
        .and_then(Payload::as_path)
        .ok_or_else(|| StepError::new(ErrorKind::Internal, "expected a staged file from upstream"))
}

async fn read_artifact(path: &Path) -> Result<Vec<u8>, StepError> {
    tokio::fs::read(path).await.map_err(|e| {
        EtlflowError::FileReadError {
            path: path.to_path_buf(),
            error: e.to_string(),
        }
        .into()
    })
}

/// Pulls all records for the date and stages them as a JSON array
pub struct FetchStep {
    name: String,
    extractor: Arc<dyn Extractor>,
    max_pages: u32,
}

#[async_trait]
impl Step for FetchStep {
    async fn execute(&self, ctx: &RunContext, _inputs: &StepInputs) -> Result<Payload, StepError> {
        debug!(
            source = %self.name,
            attempt = ctx.attempt(),
            key = %ctx.idempotency_key(&self.name),
            "fetching"
        );

        let records =
            fetch_all(self.extractor.as_ref(), ctx.logical_date(), self.max_pages).await?;

        let path = ctx.artifact_path(ArtifactKind::Extracted, &self.name);
        let body = serde_json::to_vec_pretty(&records).map_err(EtlflowError::from)?;
        write_atomic(&path, &body).await?;

        info!(source = %self.name, records = records.len(), path = %path.display(), "extracted");
        Ok(Payload::path(path))
    }
}

/// Projects the staged records onto the source's columns as CSV
pub struct TransformStep {
    name: String,
    schema: Arc<TabularSchema>,
}

#[async_trait]
impl Step for TransformStep {
    async fn execute(&self, ctx: &RunContext, inputs: &StepInputs) -> Result<Payload, StepError> {
        let input = upstream_file(inputs)?;
        let bytes = read_artifact(input).await?;
        let records: Vec<Value> = serde_json::from_slice(&bytes).map_err(EtlflowError::from)?;

        let rows = to_tabular(&self.schema, &records)?;
        let csv = write_csv(&rows)?;

        let path = ctx.artifact_path(ArtifactKind::Transformed, &self.name);
        write_atomic(&path, &csv).await?;

        let checksum = hash_bytes(&csv);
        info!(source = %self.name, rows = rows.len(), %checksum, "transformed");
        Ok(Payload::path(path))
    }
}

/// Makes sure the destination table exists, then passes the CSV on
pub struct StageStep {
    loader: Arc<dyn Loader>,
    schema: Arc<TabularSchema>,
}

#[async_trait]
impl Step for StageStep {
    async fn execute(&self, _ctx: &RunContext, inputs: &StepInputs) -> Result<Payload, StepError> {
        let input = upstream_file(inputs)?.clone();
        self.loader.ensure_table(&self.schema).await?;
        Ok(Payload::path(input))
    }
}

/// Replaces the date's rows in the destination table
pub struct LoadStep {
    loader: Arc<dyn Loader>,
    schema: Arc<TabularSchema>,
}

#[async_trait]
impl Step for LoadStep {
    async fn execute(&self, ctx: &RunContext, inputs: &StepInputs) -> Result<Payload, StepError> {
        let bytes = read_artifact(upstream_file(inputs)?).await?;
        let rows = read_csv(&bytes)?;

        let count = self
            .loader
            .upsert_rows(&self.schema, &rows, ctx.logical_date())
            .await?;

        info!(table = %self.schema.table, rows = count, "loaded");
        Ok(Payload::rows(count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectors::{Cursor, ExtractError, Page, SqlLoader};
    use crate::notify::LogNotifier;
    use crate::pipeline::{LogicalDate, Scheduler, SkipReason, StepResult};
    use serde_json::json;

    const CONFIG: &str = r#"
name: daily
database_url: "sqlite::memory:"
sources:
  - name: contacts
    kind: crm
    base_url: https://crm.example.com/api/v1
    endpoint: contacts
    table: contacts
    columns:
      - { name: id, pointer: /id }
      - { name: email, pointer: /emails/0/email }
  - name: users
    kind: docstore
    base_url: http://localhost:3000
    endpoint: api/user/allusers
    table: users
    columns:
      - { name: id, pointer: /_id }
"#;

    struct Fixed(Vec<Value>);

    #[async_trait]
    impl Extractor for Fixed {
        async fn fetch(&self, _: LogicalDate, _: Option<&Cursor>) -> Result<Page, ExtractError> {
            Ok(Page {
                records: self.0.clone(),
                next: None,
            })
        }
    }

    struct Rejected;

    #[async_trait]
    impl Extractor for Rejected {
        async fn fetch(&self, _: LogicalDate, _: Option<&Cursor>) -> Result<Page, ExtractError> {
            Err(ExtractError::Auth("401 Unauthorized".into()))
        }
    }

    fn bindings(config: &PipelineConfig, users: Arc<dyn Extractor>) -> Vec<SourceBinding> {
        let contacts: Arc<dyn Extractor> = Arc::new(Fixed(vec![
            json!({ "id": "c1", "emails": [{ "email": "a@example.com" }] }),
            json!({ "id": "c2", "emails": [] }),
        ]));

        vec![
            SourceBinding {
                source: config.sources[0].clone(),
                extractor: contacts,
                sensor: None,
            },
            SourceBinding {
                source: config.sources[1].clone(),
                extractor: users,
                sensor: None,
            },
        ]
    }

    fn date() -> LogicalDate {
        LogicalDate::from_ymd(2023, 4, 1).unwrap()
    }

    #[tokio::test]
    async fn test_graph_shape() {
        let config = PipelineConfig::from_yaml(CONFIG).unwrap();
        let bindings = http_bindings(&config).unwrap();
        assert!(bindings.iter().all(|b| b.sensor.is_some()));

        let loader = Arc::new(SqlLoader::lazy("sqlite::memory:").unwrap());
        let graph = daily_graph(&config, bindings, loader).unwrap();

        assert_eq!(graph.len(), 8);
        assert_eq!(graph.depth(), 4);
        assert!(graph.depends_on("load_users", "fetch_users"));
        assert!(!graph.depends_on("load_users", "fetch_contacts"));
        assert_eq!(
            graph.topological_layers().next().unwrap(),
            vec!["fetch_contacts", "fetch_users"]
        );
        assert!(graph.step("fetch_users").unwrap().sensor.is_some());
        assert_eq!(graph.step("transform_users").unwrap().retry.max_attempts, 1);
        assert_eq!(graph.step("load_users").unwrap().retry.max_attempts, 4);
    }

    #[tokio::test]
    async fn test_daily_run_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig::from_yaml(CONFIG).unwrap();
        let loader = Arc::new(SqlLoader::in_memory().await.unwrap());
        let users: Arc<dyn Extractor> = Arc::new(Fixed(vec![
            json!({ "_id": "u1" }),
            json!({ "_id": "u2" }),
            json!({ "_id": "u3" }),
        ]));

        let graph = daily_graph(&config, bindings(&config, users), loader.clone()).unwrap();
        let scheduler = Scheduler::new("daily", Arc::new(graph), Arc::new(LogNotifier));

        for _ in 0..2 {
            let report = scheduler
                .run(RunContext::new("daily", date(), dir.path()))
                .await;
            assert!(!report.has_failures());
            assert_eq!(report.entries.len(), 8);
            assert_eq!(
                report.result_of("load_users"),
                Some(&StepResult::success(Payload::rows(3)))
            );
        }

        assert_eq!(loader.count_rows("users", date()).await.unwrap(), 3);
        assert_eq!(loader.count_rows("contacts", date()).await.unwrap(), 2);
        assert!(dir
            .path()
            .join("extracted_data/contacts_2023-04-01.json")
            .exists());

        let csv = std::fs::read_to_string(dir.path().join("transformed_data/contacts_2023-04-01.csv"))
            .unwrap();
        assert_eq!(csv, "id,email\nc1,a@example.com\nc2,\n");
    }

    #[tokio::test]
    async fn test_failed_source_does_not_block_the_other() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig::from_yaml(CONFIG).unwrap();
        let loader = Arc::new(SqlLoader::in_memory().await.unwrap());

        let graph = daily_graph(&config, bindings(&config, Arc::new(Rejected)), loader).unwrap();
        let scheduler = Scheduler::new("daily", Arc::new(graph), Arc::new(LogNotifier));
        let report = scheduler
            .run(RunContext::new("daily", date(), dir.path()))
            .await;

        let fetch = report.entry("fetch_users").unwrap();
        assert!(matches!(
            fetch.result,
            StepResult::Failed {
                kind: ErrorKind::Auth,
                ..
            }
        ));
        assert_eq!(fetch.attempts, 1);

        for id in ["transform_users", "stage_users", "load_users"] {
            assert_eq!(
                report.result_of(id),
                Some(&StepResult::skipped(SkipReason::UpstreamFailed))
            );
        }
        assert!(report.result_of("load_contacts").unwrap().is_success());
    }

    #[tokio::test]
    async fn test_transform_requires_upstream_file() {
        let dir = tempfile::tempdir().unwrap();
        let step = TransformStep {
            name: "users".into(),
            schema: Arc::new(TabularSchema::new("users", [("id", "/_id")])),
        };
        let ctx = RunContext::new("daily", date(), dir.path());

        let err = step.execute(&ctx, &StepInputs::new()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Internal);
    }
}
