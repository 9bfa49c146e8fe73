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

//! Pure conversion of a result table into a chart payload.
//!
//! Formatting is split in two so callers can check the table shape before
//! spending anything on a title: [`ChartFormatter::plan`] validates, and
//! [`ChartPlan::render`] builds the payload.

use crate::chart_matcher::{match_chart, ChartKind, ChartMapping};
use crate::data_handler::{Cell, ResultTable};
use crate::data_profiler::DataProfiler;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartPayload {
    #[serde(rename = "type")]
    pub kind: ChartKind,
    pub data: ChartData,
    pub options: ChartOptions,
}
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartData {
    pub labels: Vec<String>,
    pub values: Vec<ChartSeries>,
}
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartSeries {
    pub label: String,
    pub data: Vec<Value>,
}
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartOptions {
    pub title: String,
}
#[derive(Debug, Clone, PartialEq)]
pub struct ChartPlan {
    pub kind: ChartKind,
    pub mapping: ChartMapping,
}
#[derive(Debug, Clone, Default)]
pub struct ChartFormatter {
    profiler: DataProfiler,
}
impl ChartFormatter {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn plan(&self, table: &ResultTable, kind: ChartKind) -> Result<ChartPlan> {
        let profile = self.profiler.profile_table(table);
        let mapping = match_chart(kind, &profile)?;
        Ok(ChartPlan { kind, mapping })
    }
    pub fn format(&self, table: &ResultTable, kind: ChartKind, title: &str) -> Result<ChartPayload> {
        Ok(self.plan(table, kind)?.render(table, title))
    }
}
impl ChartPlan {
    pub fn render(&self, table: &ResultTable, title: &str) -> ChartPayload {
        let columns = table.columns();
        let column = |index: usize| table.rows().iter().map(move |row| &row[index]);
        let (labels, values) = match &self.mapping {
            ChartMapping::Series { labels, series } => (
                column(*labels).map(Cell::label).collect(),
                series
                    .iter()
                    .map(|&index| ChartSeries {
                        label: columns[index].name.clone(),
                        data: column(index).map(Cell::to_json).collect(),
                    })
                    .collect(),
            ),
            ChartMapping::Points { x, y } => (
                column(*x).map(Cell::label).collect(),
                vec![ChartSeries {
                    label: format!("{} vs {}", columns[*x].name, columns[*y].name),
                    data: column(*x)
                        .zip(column(*y))
                        .map(|(xv, yv)| json!({"x": xv.to_json(), "y": yv.to_json()}))
                        .collect(),
                }],
            ),
        };
        ChartPayload {
            kind: self.kind,
            data: ChartData { labels, values },
            options: ChartOptions {
                title: title.to_string(),
            },
        }
    }
}
