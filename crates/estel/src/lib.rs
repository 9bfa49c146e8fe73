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

pub mod chart_formatter;
pub mod chart_matcher;
pub mod data_handler;
pub mod data_profiler;
pub mod error;

pub use chart_formatter::{ChartData, ChartFormatter, ChartOptions, ChartPayload, ChartPlan, ChartSeries};
pub use chart_matcher::{match_chart, parse_recommendation, ChartKind, ChartMapping};
pub use data_handler::{Cell, Column, ColumnType, ResultTable};
pub use data_profiler::{ColumnRole, DataProfiler, DimensionProfile, TableProfile};
pub use error::{ChartError, DataError, DataResult, Result};
