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

use crate::database::types::DatabaseResult;
use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use std::fmt::Write;
use tracing::debug;

/// Builds the schema description handed to prompts: each user table's
/// `CREATE` statement followed by a few sample rows.
pub struct SchemaAnalyser {
    pool: SqlitePool,
}
impl SchemaAnalyser {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
    pub async fn table_definitions(&self) -> DatabaseResult<Vec<(String, String)>> {
        let rows = sqlx::query(
            "SELECT name, sql FROM sqlite_master \
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%' AND sql IS NOT NULL \
             ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| Ok((row.try_get::<String, _>(0)?, row.try_get::<String, _>(1)?)))
            .collect()
    }
    pub async fn describe(&self, sample_rows: usize) -> DatabaseResult<String> {
        let tables = self.table_definitions().await?;
        let mut description = String::new();
        for (name, create_sql) in &tables {
            let _ = writeln!(description, "\n{}", create_sql.trim());
            if sample_rows > 0 {
                let samples = self.sample_rows(name, sample_rows).await?;
                let _ = write!(
                    description,
                    "\n/*\n{sample_rows} rows from {name} table:\n{samples}*/\n"
                );
            }
        }
        debug!(tables = tables.len(), "Described dataset schema");
        Ok(description.trim().to_string())
    }
    async fn sample_rows(&self, table: &str, limit: usize) -> DatabaseResult<String> {
        let query = format!(
            "SELECT * FROM {} LIMIT {limit}",
            quote_identifier(table)
        );
        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        let mut out = String::new();
        if let Some(first) = rows.first() {
            use sqlx::Column as _;
            let header: Vec<&str> = first.columns().iter().map(|c| c.name()).collect();
            let _ = writeln!(out, "{}", header.join("\t"));
        }
        for row in &rows {
            let values: Vec<String> = (0..row.len())
                .map(|i| {
                    row.try_get::<Option<String>, _>(i)
                        .ok()
                        .flatten()
                        .or_else(|| row.try_get::<Option<i64>, _>(i).ok().flatten().map(|v| v.to_string()))
                        .or_else(|| row.try_get::<Option<f64>, _>(i).ok().flatten().map(|v| v.to_string()))
                        .unwrap_or_else(|| "None".to_string())
                })
                .collect();
            let _ = writeln!(out, "{}", values.join("\t"));
        }
        Ok(out)
    }
}

pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
