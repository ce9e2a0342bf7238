// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 etlflow contributors

//! Staged artifact naming and writing
//!
//! Every staged file is named `<dir>/<name>_<logical date>.<ext>` under the
//! artifact root. Writes go through a temp file and a rename so a reader
//! either sees the previous complete file or the new complete file.

use std::path::{Path, PathBuf};

use crate::errors::EtlflowError;
use crate::pipeline::LogicalDate;

/// Pipeline stage an artifact belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    /// Raw records as returned by a source
    Extracted,
    /// Tabular rows ready for loading
    Transformed,
    /// Run reports produced after the join
    Report,
}

impl ArtifactKind {
    fn directory(&self) -> &'static str {
        match self {
            Self::Extracted => "extracted_data",
            Self::Transformed => "transformed_data",
            Self::Report => "reports",
        }
    }

    fn extension(&self) -> &'static str {
        match self {
            Self::Extracted => "json",
            Self::Transformed => "csv",
            Self::Report => "html",
        }
    }
}

/// Resolves artifact paths below a root directory
#[derive(Debug, Clone)]
pub struct Artifacts {
    root: PathBuf,
}

impl Artifacts {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of artifact `name` of `kind` for `date`
    pub fn path_for(&self, kind: ArtifactKind, name: &str, date: LogicalDate) -> PathBuf {
        self.root
            .join(kind.directory())
            .join(format!("{}_{}.{}", name, date, kind.extension()))
    }
}

/// Write `contents` to `path`, replacing any previous file atomically
pub async fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), EtlflowError> {
    let write_err = |e: std::io::Error| EtlflowError::FileWriteError {
        path: path.to_path_buf(),
        error: e.to_string(),
    };

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, contents).await.map_err(write_err)?;
    tokio::fs::rename(&tmp, path).await.map_err(write_err)?;

    Ok(())
}
