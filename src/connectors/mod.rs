// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 etlflow contributors

//! Source and destination connectors
//!
//! An [`Extractor`] pulls one logical date's records from an upstream API,
//! a [`Loader`] writes tabular rows into the destination store, and the
//! steps in [`steps`] wire them into a per-source
//! fetch → transform → stage → load chain.

mod http;
mod sql;
pub mod steps;
mod tabular;

pub use http::{CrmExtractor, DocStoreExtractor, HttpSensor};
pub use sql::SqlLoader;
pub use steps::{daily_graph, http_bindings, SourceBinding};
pub use tabular::{read_csv, to_tabular, write_csv, TabularRows, TabularSchema};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::pipeline::{ErrorKind, LogicalDate, StepError};

/// One raw upstream record
pub type Record = Value;

/// Opaque pagination cursor handed back to the extractor
pub type Cursor = String;

/// One page of records
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub records: Vec<Record>,
    /// Cursor of the following page, `None` on the last page
    pub next: Option<Cursor>,
}

/// Extraction failures, mapped onto step error kinds
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractError {
    #[error("source unreachable: {0}")]
    Connectivity(String),

    #[error("authentication rejected: {0}")]
    Auth(String),

    #[error("rate limited: {0}")]
    RateLimit(String),

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl From<ExtractError> for StepError {
    fn from(err: ExtractError) -> Self {
        let kind = match &err {
            ExtractError::Connectivity(_) => ErrorKind::Connectivity,
            ExtractError::Auth(_) => ErrorKind::Auth,
            ExtractError::RateLimit(_) => ErrorKind::RateLimit,
            ExtractError::Malformed(_) => ErrorKind::Validation,
        };
        StepError::new(kind, err.to_string())
    }
}

/// Pulls records for one logical date from an upstream source
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Fetch the page at `cursor` (`None` for the first page)
    async fn fetch(&self, date: LogicalDate, cursor: Option<&Cursor>) -> Result<Page, ExtractError>;
}

/// Follow cursors until the last page or `max_pages`, whichever comes first
pub async fn fetch_all(
    extractor: &dyn Extractor,
    date: LogicalDate,
    max_pages: u32,
) -> Result<Vec<Record>, ExtractError> {
    let mut records = Vec::new();
    let mut cursor: Option<Cursor> = None;

    for _ in 0..max_pages.max(1) {
        let page = extractor.fetch(date, cursor.as_ref()).await?;
        let empty = page.records.is_empty();
        records.extend(page.records);

        match page.next {
            Some(next) if !empty => cursor = Some(next),
            _ => return Ok(records),
        }
    }

    tracing::warn!(max_pages, "stopped paginating at page limit");
    Ok(records)
}

/// Destination write failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    #[error("destination unavailable: {0}")]
    Connection(String),

    #[error("constraint violated: {0}")]
    Constraint(String),
}

impl From<LoadError> for StepError {
    fn from(err: LoadError) -> Self {
        let kind = match &err {
            LoadError::Connection(_) => ErrorKind::Connectivity,
            LoadError::Constraint(_) => ErrorKind::Constraint,
        };
        StepError::new(kind, err.to_string())
    }
}

/// Writes tabular rows into the destination store
#[async_trait]
pub trait Loader: Send + Sync {
    /// Create the destination table if it does not exist yet
    async fn ensure_table(&self, schema: &TabularSchema) -> Result<(), LoadError>;

    /// Replace the rows of `date` in `schema.table` with `rows`
    ///
    /// Applying the same rows twice for the same date leaves the table as
    /// after one application. Returns the number of rows written.
    async fn upsert_rows(
        &self,
        schema: &TabularSchema,
        rows: &TabularRows,
        date: LogicalDate,
    ) -> Result<u64, LoadError>;
}
