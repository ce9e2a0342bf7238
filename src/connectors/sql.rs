// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 etlflow contributors

//! SQL destination

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::debug;

use crate::errors::{EtlflowError, EtlflowResult};
use crate::pipeline::{is_identifier, LogicalDate, LOGICAL_DATE_COLUMN};

use super::{LoadError, Loader, TabularRows, TabularSchema};

/// Loads rows into SQLite tables, one table per source
///
/// Every table gets a `logical_date` column; a load replaces exactly the
/// rows of its date inside one transaction.
#[derive(Debug, Clone)]
pub struct SqlLoader {
    pool: SqlitePool,
}

impl SqlLoader {
    /// Pool that connects on first use
    pub fn lazy(database_url: &str) -> EtlflowResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_lazy_with(options);
        Ok(Self { pool })
    }

    /// Private in-memory database
    pub async fn in_memory() -> EtlflowResult<Self> {
        // one connection, otherwise each connection sees its own database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Ok(Self { pool })
    }

    /// Rows currently stored for `date`
    pub async fn count_rows(&self, table: &str, date: LogicalDate) -> EtlflowResult<u64> {
        check_identifier(table)?;
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE {} = ?",
            quote(table),
            quote(LOGICAL_DATE_COLUMN)
        );
        let count: i64 = sqlx::query_scalar(&sql)
            .bind(date.to_string())
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }
}

fn check_identifier(name: &str) -> EtlflowResult<()> {
    if is_identifier(name) {
        Ok(())
    } else {
        Err(EtlflowError::invalid_config(
            format!("'{}' is not a valid SQL identifier", name),
            None,
        ))
    }
}

fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn schema_identifiers(schema: &TabularSchema) -> Result<(), LoadError> {
    std::iter::once(schema.table.as_str())
        .chain(schema.columns.iter().map(|(c, _)| c.as_str()))
        .try_for_each(|name| {
            check_identifier(name).map_err(|e| LoadError::Constraint(e.to_string()))
        })
}

const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

/// Busy and locked, including their extended codes
fn is_contention(code: &str) -> bool {
    code.parse::<i32>()
        .is_ok_and(|c| matches!(c & 0xff, SQLITE_BUSY | SQLITE_LOCKED))
}

fn load_error(e: sqlx::Error) -> LoadError {
    match &e {
        sqlx::Error::Io(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => LoadError::Connection(e.to_string()),
        sqlx::Error::Database(db) if db.code().is_some_and(|c| is_contention(&c)) => {
            LoadError::Connection(e.to_string())
        }
        _ => LoadError::Constraint(e.to_string()),
    }
}

fn create_table_sql(schema: &TabularSchema) -> String {
    let mut columns = vec![format!("{} TEXT NOT NULL", quote(LOGICAL_DATE_COLUMN))];
    columns.extend(schema.columns.iter().map(|(c, _)| format!("{} TEXT", quote(c))));

    format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        quote(&schema.table),
        columns.join(", ")
    )
}

fn insert_sql(schema: &TabularSchema) -> String {
    let names: Vec<String> = std::iter::once(LOGICAL_DATE_COLUMN)
        .chain(schema.columns.iter().map(|(c, _)| c.as_str()))
        .map(quote)
        .collect();
    let placeholders = vec!["?"; names.len()].join(", ");

    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote(&schema.table),
        names.join(", "),
        placeholders
    )
}

#[async_trait]
impl Loader for SqlLoader {
    async fn ensure_table(&self, schema: &TabularSchema) -> Result<(), LoadError> {
        schema_identifiers(schema)?;

        sqlx::query(&create_table_sql(schema))
            .execute(&self.pool)
            .await
            .map_err(load_error)?;

        let index = format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
            quote(&format!("{}_{}_idx", schema.table, LOGICAL_DATE_COLUMN)),
            quote(&schema.table),
            quote(LOGICAL_DATE_COLUMN)
        );
        sqlx::query(&index)
            .execute(&self.pool)
            .await
            .map_err(load_error)?;

        debug!(table = %schema.table, "table ready");
        Ok(())
    }

    async fn upsert_rows(
        &self,
        schema: &TabularSchema,
        rows: &TabularRows,
        date: LogicalDate,
    ) -> Result<u64, LoadError> {
        schema_identifiers(schema)?;

        let expected = schema.column_names();
        if rows.columns != expected {
            return Err(LoadError::Constraint(format!(
                "columns {:?} do not match table schema {:?}",
                rows.columns, expected
            )));
        }

        let day = date.to_string();
        let mut tx = self.pool.begin().await.map_err(load_error)?;

        let delete = format!(
            "DELETE FROM {} WHERE {} = ?",
            quote(&schema.table),
            quote(LOGICAL_DATE_COLUMN)
        );
        let removed = sqlx::query(&delete)
            .bind(day.as_str())
            .execute(&mut *tx)
            .await
            .map_err(load_error)?
            .rows_affected();

        let insert = insert_sql(schema);
        for row in &rows.rows {
            if row.len() != expected.len() {
                return Err(LoadError::Constraint(format!(
                    "row has {} values, table has {} columns",
                    row.len(),
                    expected.len()
                )));
            }

            let mut query = sqlx::query(&insert).bind(day.as_str());
            for value in row {
                query = query.bind(value.clone());
            }
            query.execute(&mut *tx).await.map_err(load_error)?;
        }

        tx.commit().await.map_err(load_error)?;

        debug!(table = %schema.table, %date, removed, inserted = rows.len(), "rows replaced");
        Ok(rows.len() as u64)
    }
}
