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

use crate::data_handler::{ColumnType, ResultTable};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How a column can be used when laying out a chart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnRole {
    Categorical,
    Numeric,
    Other,
}
impl From<ColumnType> for ColumnRole {
    fn from(column_type: ColumnType) -> Self {
        if column_type.is_numeric() {
            ColumnRole::Numeric
        } else if column_type.is_categorical() {
            ColumnRole::Categorical
        } else {
            ColumnRole::Other
        }
    }
}
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DimensionProfile {
    pub index: usize,
    pub name: String,
    pub column_type: ColumnType,
    pub role: ColumnRole,
}
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableProfile {
    pub dimensions: Vec<DimensionProfile>,
    pub row_count: usize,
}
impl TableProfile {
    pub fn categorical(&self) -> Vec<usize> {
        self.indices_with(ColumnRole::Categorical)
    }
    pub fn numeric(&self) -> Vec<usize> {
        self.indices_with(ColumnRole::Numeric)
    }
    pub fn categorical_count(&self) -> usize {
        self.categorical().len()
    }
    pub fn numeric_count(&self) -> usize {
        self.numeric().len()
    }
    fn indices_with(&self, role: ColumnRole) -> Vec<usize> {
        self.dimensions
            .iter()
            .filter(|d| d.role == role)
            .map(|d| d.index)
            .collect()
    }
}
impl fmt::Display for TableProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} rows, {} categorical, {} numeric",
            self.row_count,
            self.categorical_count(),
            self.numeric_count()
        )
    }
}
#[derive(Debug, Clone, Default)]
pub struct DataProfiler;
impl DataProfiler {
    pub fn new() -> Self {
        Self
    }
    pub fn profile_table(&self, table: &ResultTable) -> TableProfile {
        let dimensions = table
            .columns()
            .iter()
            .enumerate()
            .map(|(index, column)| DimensionProfile {
                index,
                name: column.name.clone(),
                column_type: column.column_type,
                role: column.column_type.into(),
            })
            .collect();
        TableProfile {
            dimensions,
            row_count: table.row_count(),
        }
    }
}
