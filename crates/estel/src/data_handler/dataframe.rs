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

use crate::data_handler::column::{Cell, Column, ColumnType};
use crate::error::{DataError, DataResult};
use serde::{Deserialize, Serialize};
use std::fmt::Write;

/// Column-typed rows returned by a query, in the exact order the query
/// produced them. Serialises in split orientation:
/// `{"columns": [{"name", "type"}], "data": [[...], ...]}`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(try_from = "SplitTable")]
pub struct ResultTable {
    columns: Vec<Column>,
    #[serde(rename = "data")]
    rows: Vec<Vec<Cell>>,
}

/// Wire form of [`ResultTable`]; decoding goes through [`ResultTable::new`]
/// so every row matches the column count.
#[derive(Deserialize)]
struct SplitTable {
    columns: Vec<Column>,
    data: Vec<Vec<Cell>>,
}
impl TryFrom<SplitTable> for ResultTable {
    type Error = DataError;

    fn try_from(split: SplitTable) -> DataResult<Self> {
        Self::new(split.columns, split.data)
    }
}
impl ResultTable {
    pub fn new(columns: Vec<Column>, rows: Vec<Vec<Cell>>) -> DataResult<Self> {
        let expected = columns.len();
        if let Some((row, cells)) = rows.iter().enumerate().find(|(_, r)| r.len() != expected) {
            return Err(DataError::RaggedRow {
                row,
                expected,
                found: cells.len(),
            });
        }
        Ok(Self { columns, rows })
    }
    /// Builds a table whose column types are inferred from the cells.
    pub fn from_rows<S: Into<String>>(
        names: impl IntoIterator<Item = S>,
        rows: Vec<Vec<Cell>>,
    ) -> DataResult<Self> {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        let mut table = Self::new(
            names
                .into_iter()
                .map(|name| Column::new(name, ColumnType::Null))
                .collect(),
            rows,
        )?;
        for index in 0..table.columns.len() {
            let inferred = ColumnType::infer(table.column_values(index)?);
            table.columns[index].column_type = inferred;
        }
        Ok(table)
    }
    pub fn empty() -> Self {
        Self::default()
    }
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }
    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }
    pub fn into_parts(self) -> (Vec<Column>, Vec<Vec<Cell>>) {
        (self.columns, self.rows)
    }
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
    pub fn column_index(&self, name: &str) -> DataResult<usize> {
        self.columns
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| DataError::ColumnNotFound {
                column: name.to_string(),
            })
    }
    pub fn column_values(&self, index: usize) -> DataResult<impl Iterator<Item = &Cell>> {
        if index >= self.columns.len() {
            return Err(DataError::ColumnOutOfBounds {
                index,
                width: self.columns.len(),
            });
        }
        Ok(self.rows.iter().map(move |row| &row[index]))
    }
    pub fn head(&self, n: usize) -> Self {
        Self {
            columns: self.columns.clone(),
            rows: self.rows.iter().take(n).cloned().collect(),
        }
    }
    /// Plain-text rendering of the column names and first `n` rows, used to
    /// show results to a text generator.
    pub fn summary(&self, n: usize) -> String {
        let names = self.column_names();
        let mut out = format!("Columns: {}\n\n", names.join(", "));
        let shown: Vec<Vec<String>> = self
            .rows
            .iter()
            .take(n)
            .map(|row| row.iter().map(Cell::to_string).collect())
            .collect();
        let widths: Vec<usize> = names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                shown
                    .iter()
                    .map(|row| row[i].chars().count())
                    .chain(std::iter::once(name.chars().count()))
                    .max()
                    .unwrap_or(0)
            })
            .collect();
        render_line(names.iter().copied(), &widths, &mut out);
        for row in &shown {
            render_line(row.iter().map(String::as_str), &widths, &mut out);
        }
        if self.rows.len() > n {
            let _ = writeln!(out, "... {} more rows", self.rows.len() - n);
        }
        out.trim_end().to_string()
    }
}

fn render_line<'a>(cells: impl Iterator<Item = &'a str>, widths: &[usize], out: &mut String) {
    let line: Vec<String> = cells
        .zip(widths)
        .map(|(cell, &width)| format!("{cell:>width$}"))
        .collect();
    let _ = writeln!(out, "{}", line.join("  ").trim_end());
}
