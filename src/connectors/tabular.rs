// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 etlflow contributors

//! Raw records to fixed-schema rows

use serde_json::Value;

use crate::errors::EtlflowError;
use crate::pipeline::{SourceConfig, StepError};

use super::Record;

/// Ordered output columns of one source and where each comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabularSchema {
    pub table: String,
    /// `(column, json pointer)` pairs in output order
    pub columns: Vec<(String, String)>,
}

impl TabularSchema {
    pub fn new<I, C, P>(table: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = (C, P)>,
        C: Into<String>,
        P: Into<String>,
    {
        Self {
            table: table.into(),
            columns: columns
                .into_iter()
                .map(|(c, p)| (c.into(), p.into()))
                .collect(),
        }
    }

    pub fn from_source(source: &SourceConfig) -> Self {
        Self::new(
            source.table.clone(),
            source
                .columns
                .iter()
                .map(|c| (c.name.clone(), c.pointer.clone())),
        )
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|(c, _)| c.as_str()).collect()
    }
}

/// Rows in schema column order; `None` is a missing or null value
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TabularRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl TabularRows {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Project every record onto the schema
///
/// Strings are taken as-is, numbers and booleans are printed, nested
/// arrays and objects are kept as compact JSON. Every record must be a
/// JSON object.
pub fn to_tabular(schema: &TabularSchema, records: &[Record]) -> Result<TabularRows, StepError> {
    let mut rows = Vec::with_capacity(records.len());

    for (index, record) in records.iter().enumerate() {
        if !record.is_object() {
            return Err(StepError::validation(format!(
                "record {} is not an object",
                index
            )));
        }

        let row = schema
            .columns
            .iter()
            .map(|(_, pointer)| cell(record.pointer(pointer)))
            .collect();
        rows.push(row);
    }

    Ok(TabularRows {
        columns: schema.columns.iter().map(|(c, _)| c.clone()).collect(),
        rows,
    })
}

fn cell(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        nested => Some(nested.to_string()),
    }
}

/// Serialize rows as CSV with a header line
pub fn write_csv(rows: &TabularRows) -> Result<Vec<u8>, EtlflowError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(&rows.columns)?;

    for row in &rows.rows {
        writer.write_record(row.iter().map(|v| v.as_deref().unwrap_or("")))?;
    }

    writer.into_inner().map_err(|e| EtlflowError::Csv {
        message: e.to_string(),
    })
}

/// Parse CSV written by [`write_csv`]; empty cells read back as `None`
pub fn read_csv(bytes: &[u8]) -> Result<TabularRows, EtlflowError> {
    let mut reader = csv::Reader::from_reader(bytes);
    let columns = reader.headers()?.iter().map(String::from).collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows.push(
            record
                .iter()
                .map(|v| (!v.is_empty()).then(|| v.to_string()))
                .collect(),
        );
    }

    Ok(TabularRows { columns, rows })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> TabularSchema {
        TabularSchema::new(
            "contacts",
            [
                ("id", "/id"),
                ("email", "/emails/0/email"),
                ("score", "/score"),
                ("tags", "/tags"),
            ],
        )
    }

    #[test]
    fn test_to_tabular_projects_columns() {
        let records = vec![
            json!({
                "id": "c1",
                "emails": [{ "email": "a@example.com" }],
                "score": 7,
                "tags": ["vip", "new"]
            }),
            json!({ "id": "c2", "score": null }),
        ];

        let rows = to_tabular(&schema(), &records).unwrap();

        assert_eq!(rows.columns, vec!["id", "email", "score", "tags"]);
        assert_eq!(
            rows.rows[0],
            vec![
                Some("c1".to_string()),
                Some("a@example.com".to_string()),
                Some("7".to_string()),
                Some(r#"["vip","new"]"#.to_string()),
            ]
        );
        assert_eq!(rows.rows[1], vec![Some("c2".to_string()), None, None, None]);
    }

    #[test]
    fn test_to_tabular_rejects_non_objects() {
        let err = to_tabular(&schema(), &[json!([1, 2])]).unwrap_err();
        assert!(err.message.contains("record 0"));
    }

    #[test]
    fn test_csv_preserves_rows() {
        let rows = to_tabular(
            &schema(),
            &[json!({ "id": "c1, \"quoted\"", "emails": [], "score": 1.5 })],
        )
        .unwrap();

        let bytes = write_csv(&rows).unwrap();
        let text = String::from_utf8(bytes.clone()).unwrap();
        assert!(text.starts_with("id,email,score,tags\n"));

        assert_eq!(read_csv(&bytes).unwrap(), rows);
    }

    #[test]
    fn test_empty_input_gives_header_only() {
        let rows = to_tabular(&schema(), &[]).unwrap();
        let parsed = read_csv(&write_csv(&rows).unwrap()).unwrap();

        assert!(parsed.is_empty());
        assert_eq!(parsed.columns.len(), 4);
    }
}
