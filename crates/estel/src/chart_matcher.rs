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

//! Chart kinds and the structural requirements each one places on a table.

use crate::data_profiler::TableProfile;
use crate::error::{ChartError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartKind {
    Bar,
    HorizontalBar,
    Line,
    Pie,
    Scatter,
    #[default]
    None,
}
impl ChartKind {
    pub const ALL: [ChartKind; 6] = [
        ChartKind::Bar,
        ChartKind::HorizontalBar,
        ChartKind::Line,
        ChartKind::Pie,
        ChartKind::Scatter,
        ChartKind::None,
    ];
    pub fn as_str(self) -> &'static str {
        match self {
            ChartKind::Bar => "bar",
            ChartKind::HorizontalBar => "horizontal_bar",
            ChartKind::Line => "line",
            ChartKind::Pie => "pie",
            ChartKind::Scatter => "scatter",
            ChartKind::None => "none",
        }
    }
    pub fn is_chart(self) -> bool {
        self != ChartKind::None
    }
}
impl fmt::Display for ChartKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
impl FromStr for ChartKind {
    type Err = ChartError;
    fn from_str(s: &str) -> Result<Self> {
        let normalised = s
            .trim()
            .trim_matches(|c: char| !c.is_alphanumeric() && c != '_')
            .to_lowercase()
            .replace([' ', '-'], "_");
        match normalised.as_str() {
            "bar" | "bar_chart" => Ok(ChartKind::Bar),
            "horizontal_bar" | "horizontal_bar_chart" => Ok(ChartKind::HorizontalBar),
            "line" | "line_chart" => Ok(ChartKind::Line),
            "pie" | "pie_chart" => Ok(ChartKind::Pie),
            "scatter" | "scatter_plot" => Ok(ChartKind::Scatter),
            "none" => Ok(ChartKind::None),
            _ => Err(ChartError::UnknownKind {
                name: s.trim().to_string(),
            }),
        }
    }
}

/// Reads a `Recommended Visualization: <kind>` line out of a recommender
/// response. Anything missing or unrecognised yields [`ChartKind::None`].
pub fn parse_recommendation(response: &str) -> ChartKind {
    let Some(value) = response.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        let key = key.trim().trim_matches('*').trim().to_lowercase();
        (key == "recommended visualization").then_some(value)
    }) else {
        debug!("Recommendation response has no visualization line");
        return ChartKind::None;
    };
    value.parse().unwrap_or_else(|e: ChartError| {
        debug!("Unrecognised chart recommendation: {e}");
        ChartKind::None
    })
}

/// Which table columns feed which part of a chart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChartMapping {
    /// One label column and one or more value series.
    Series { labels: usize, series: Vec<usize> },
    /// Paired numeric columns plotted as points.
    Points { x: usize, y: usize },
}

/// Checks the per-kind structural requirements and returns the column
/// mapping the formatter will use.
pub fn match_chart(kind: ChartKind, profile: &TableProfile) -> Result<ChartMapping> {
    if !kind.is_chart() {
        return Err(ChartError::NotChartable { kind });
    }
    if profile.row_count == 0 {
        return Err(ChartError::EmptyTable);
    }
    let categorical = profile.categorical();
    let numeric = profile.numeric();
    let mismatch = |requirement: &'static str| ChartError::ShapeMismatch {
        kind,
        requirement,
        categorical: categorical.len(),
        numeric: numeric.len(),
    };
    match kind {
        ChartKind::Bar | ChartKind::HorizontalBar => {
            if categorical.is_empty() || numeric.is_empty() {
                return Err(mismatch(
                    "at least one categorical column and one numeric column",
                ));
            }
            Ok(ChartMapping::Series {
                labels: categorical[0],
                series: numeric.clone(),
            })
        }
        ChartKind::Line => {
            let series: Vec<usize> = numeric.iter().copied().filter(|&i| i != 0).collect();
            if series.is_empty() {
                return Err(mismatch("a numeric column besides the first column"));
            }
            Ok(ChartMapping::Series { labels: 0, series })
        }
        ChartKind::Pie => {
            if categorical.len() != 1 || numeric.len() != 1 {
                return Err(mismatch(
                    "exactly one categorical column and exactly one numeric column",
                ));
            }
            Ok(ChartMapping::Series {
                labels: categorical[0],
                series: vec![numeric[0]],
            })
        }
        ChartKind::Scatter => {
            if numeric.len() < 2 {
                return Err(mismatch("at least two numeric columns"));
            }
            Ok(ChartMapping::Points {
                x: numeric[0],
                y: numeric[1],
            })
        }
        ChartKind::None => Err(ChartError::NotChartable { kind }),
    }
}
