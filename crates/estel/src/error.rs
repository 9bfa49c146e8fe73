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

use crate::chart_matcher::ChartKind;
use thiserror::Error;
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DataError {
    #[error("Row {row} has {found} cells but the table has {expected} columns")]
    RaggedRow {
        row: usize,
        expected: usize,
        found: usize,
    },
    #[error("Column '{column}' not found in result table")]
    ColumnNotFound { column: String },
    #[error("Column index {index} out of bounds for {width} columns")]
    ColumnOutOfBounds { index: usize, width: usize },
}
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChartError {
    #[error("No data available to format")]
    EmptyTable,
    #[error("Chart kind '{kind}' does not produce a payload")]
    NotChartable { kind: ChartKind },
    #[error("{kind} chart requires {requirement}; found {categorical} categorical and {numeric} numeric columns")]
    ShapeMismatch {
        kind: ChartKind,
        requirement: &'static str,
        categorical: usize,
        numeric: usize,
    },
    #[error("Unknown chart kind '{name}'")]
    UnknownKind { name: String },
    #[error("Data error: {0}")]
    Data(#[from] DataError),
}
pub type DataResult<T> = std::result::Result<T, DataError>;
pub type Result<T> = std::result::Result<T, ChartError>;
