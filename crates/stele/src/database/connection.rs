// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2024 Jonathan Lee
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License version 3
// as published by the Free Software Foundation.
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU Affero General Public License for more details.
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see https://www.gnu.org/licenses/.

use crate::database::schema_analyser::SchemaAnalyser;
use crate::database::types::{DatabaseError, DatabaseResult};
use async_trait::async_trait;
use estel::{Cell, Column, ColumnType, ResultTable};
use futures::TryStreamExt;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column as _, Executor, Row, TypeInfo, ValueRef};
use std::str::FromStr;
use tracing::{debug, info};

/// Read-only relational dataset the pipeline queries.
#[async_trait]
pub trait Dataset: Send + Sync {
    /// Runs `query` and returns at most `max_rows` rows. Implementations must
    /// not permit writes.
    async fn fetch_table(&self, query: &str, max_rows: usize) -> DatabaseResult<ResultTable>;
    /// Textual schema snapshot consumed verbatim by prompts.
    async fn describe_schema(&self, sample_rows: usize) -> DatabaseResult<String>;
    fn name(&self) -> &str {
        "dataset"
    }
}

/// SQLite dataset opened through a read-only connection pool.
#[derive(Debug, Clone)]
pub struct SqliteDataset {
    pool: SqlitePool,
    url: String,
}
impl SqliteDataset {
    pub async fn connect(url: &str, max_connections: u32) -> DatabaseResult<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| DatabaseError::Configuration(format!("Invalid database url '{url}': {e}")))?
            .read_only(true)
            .create_if_missing(false);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await
            .map_err(|e| DatabaseError::ConnectionFailed(format!("{url}: {e}")))?;
        info!(url = %url, max_connections, "Opened read-only dataset");
        Ok(Self {
            pool,
            url: url.to_string(),
        })
    }
    pub fn from_pool(pool: SqlitePool, url: impl Into<String>) -> Self {
        Self {
            pool,
            url: url.into(),
        }
    }
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
#[async_trait]
impl Dataset for SqliteDataset {
    async fn fetch_table(&self, query: &str, max_rows: usize) -> DatabaseResult<ResultTable> {
        let mut stream = sqlx::query(query).fetch(&self.pool);
        let mut rows: Vec<SqliteRow> = Vec::new();
        while let Some(row) = stream.try_next().await? {
            if rows.len() >= max_rows {
                debug!(max_rows, "Row cap reached; truncating result");
                break;
            }
            rows.push(row);
        }
        drop(stream);

        let declared: Vec<(String, Option<ColumnType>)> = match rows.first() {
            Some(first) => first
                .columns()
                .iter()
                .map(|c| (c.name().to_string(), declared_type(c.type_info().name())))
                .collect(),
            None => {
                let described = (&self.pool).describe(query).await?;
                described
                    .columns()
                    .iter()
                    .map(|c| (c.name().to_string(), declared_type(c.type_info().name())))
                    .collect()
            }
        };

        let cells: Vec<Vec<Cell>> = rows
            .iter()
            .map(|row| {
                (0..declared.len())
                    .map(|i| decode_cell(row, i))
                    .collect::<DatabaseResult<Vec<Cell>>>()
            })
            .collect::<DatabaseResult<_>>()?;
        let columns = declared
            .into_iter()
            .enumerate()
            .map(|(index, (name, declared))| {
                let inferred = ColumnType::infer(cells.iter().map(|row| &row[index]));
                Column::new(name, resolve_type(declared, inferred))
            })
            .collect();
        ResultTable::new(columns, cells).map_err(|e| DatabaseError::QueryFailed(e.to_string()))
    }

    async fn describe_schema(&self, sample_rows: usize) -> DatabaseResult<String> {
        SchemaAnalyser::new(self.pool.clone())
            .describe(sample_rows)
            .await
    }

    fn name(&self) -> &str {
        &self.url
    }
}

fn declared_type(name: &str) -> Option<ColumnType> {
    ColumnType::from_declared(name)
}

/// Declared numeric affinity wins over observed text so the sanitizer can
/// coerce stray strings; otherwise observed values decide.
fn resolve_type(declared: Option<ColumnType>, inferred: ColumnType) -> ColumnType {
    match (declared, inferred) {
        (Some(declared), ColumnType::Null) => declared,
        (Some(ColumnType::Integer), ColumnType::Float) => ColumnType::Float,
        (Some(declared), ColumnType::Text) if declared.is_numeric() => declared,
        (_, inferred) => inferred,
    }
}

fn decode_cell(row: &SqliteRow, index: usize) -> DatabaseResult<Cell> {
    let raw = row.try_get_raw(index)?;
    if raw.is_null() {
        return Ok(Cell::Null);
    }
    let storage = raw.type_info().name().to_string();
    let cell = match storage.as_str() {
        "INTEGER" => Cell::Integer(row.try_get_unchecked::<i64, _>(index)?),
        "REAL" => Cell::Float(row.try_get_unchecked::<f64, _>(index)?),
        "BLOB" => {
            let bytes = row.try_get_unchecked::<Vec<u8>, _>(index)?;
            Cell::Text(String::from_utf8_lossy(&bytes).into_owned())
        }
        _ => Cell::Text(row.try_get_unchecked::<String, _>(index)?),
    };
    Ok(cell)
}
