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

//! Result sanitisation: the last pass over query output before it is
//! serialised toward a browser.
//!
//! Text cells lose script/style blocks and markup; any angle bracket left
//! over is escaped. Numeric columns are coerced to one canonical
//! representation, with anything non-coercible becoming the missing marker
//! (`Cell::Null`). Column names, order and types never change, and
//! `sanitize_table(sanitize_table(t)) == sanitize_table(t)`.

use estel::{Cell, Column, ColumnType, ResultTable};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

static SCRIPT_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<script\b[^>]*>.*?</script\s*>").expect("valid regex"));
static STYLE_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<style\b[^>]*>.*?</style\s*>").expect("valid regex"));
static TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<[A-Za-z/!?][^<>]*>").expect("valid regex"));

pub fn clean_text(text: &str) -> String {
    let mut current = text.to_string();
    loop {
        let next = SCRIPT_BLOCK.replace_all(&current, "");
        let next = STYLE_BLOCK.replace_all(&next, "");
        let next = TAG.replace_all(&next, "").into_owned();
        if next == current {
            break;
        }
        current = next;
    }
    current.replace('<', "&lt;").replace('>', "&gt;")
}

fn integral(value: f64) -> Option<i64> {
    (value.is_finite() && value.fract() == 0.0 && value.abs() < 9.0e15).then_some(value as i64)
}

fn parse_number(text: &str) -> Option<f64> {
    text.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

fn coerce_integer(cell: Cell) -> Cell {
    match cell {
        Cell::Integer(v) => Cell::Integer(v),
        Cell::Float(v) => integral(v).map_or(Cell::Null, Cell::Integer),
        Cell::Bool(b) => Cell::Integer(i64::from(b)),
        Cell::Text(s) => s
            .trim()
            .parse::<i64>()
            .ok()
            .or_else(|| parse_number(&s).and_then(integral))
            .map_or(Cell::Null, Cell::Integer),
        Cell::Null => Cell::Null,
    }
}

fn coerce_float(cell: Cell) -> Cell {
    let value = match cell {
        Cell::Integer(v) => Some(v as f64),
        Cell::Float(v) => Some(v).filter(|v| v.is_finite()),
        Cell::Bool(b) => Some(if b { 1.0 } else { 0.0 }),
        Cell::Text(s) => parse_number(&s),
        Cell::Null => None,
    };
    value.map_or(Cell::Null, Cell::Float)
}

fn coerce_boolean(cell: Cell) -> Cell {
    match cell {
        Cell::Bool(b) => Cell::Bool(b),
        Cell::Integer(v) => Cell::Bool(v != 0),
        Cell::Float(v) if v.is_finite() => Cell::Bool(v != 0.0),
        Cell::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Cell::Bool(true),
            "false" | "0" => Cell::Bool(false),
            _ => Cell::Null,
        },
        _ => Cell::Null,
    }
}

fn clean_cell(cell: Cell) -> Cell {
    match cell {
        Cell::Text(s) => Cell::Text(clean_text(&s)),
        Cell::Float(v) if !v.is_finite() => Cell::Null,
        other => other,
    }
}

pub fn sanitize_cell(cell: Cell, column_type: ColumnType) -> Cell {
    match column_type {
        ColumnType::Integer => coerce_integer(cell),
        ColumnType::Float => coerce_float(cell),
        ColumnType::Boolean => coerce_boolean(cell),
        ColumnType::Null => Cell::Null,
        ColumnType::Text => clean_cell(cell),
    }
}

pub fn sanitize_table(table: ResultTable) -> ResultTable {
    let (columns, rows) = table.into_parts();
    let types: Vec<ColumnType> = columns.iter().map(|c| c.column_type).collect();
    let rows: Vec<Vec<Cell>> = rows
        .into_iter()
        .map(|row| {
            row.into_iter()
                .zip(&types)
                .map(|(cell, &column_type)| sanitize_cell(cell, column_type))
                .collect()
        })
        .collect();
    debug!(rows = rows.len(), columns = columns.len(), "Sanitised result table");
    rebuild(columns, rows)
}

fn rebuild(columns: Vec<Column>, rows: Vec<Vec<Cell>>) -> ResultTable {
    // Row widths are unchanged by sanitising.
    ResultTable::new(columns.clone(), rows).unwrap_or_else(|_| {
        ResultTable::new(columns, Vec::new()).unwrap_or_default()
    })
}
