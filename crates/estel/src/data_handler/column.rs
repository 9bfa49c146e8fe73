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

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Storage class of a result column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Text,
    Integer,
    Float,
    Boolean,
    Null,
}
impl ColumnType {
    pub fn is_numeric(self) -> bool {
        matches!(self, ColumnType::Integer | ColumnType::Float)
    }
    pub fn is_categorical(self) -> bool {
        self == ColumnType::Text
    }
    pub fn as_str(self) -> &'static str {
        match self {
            ColumnType::Text => "text",
            ColumnType::Integer => "integer",
            ColumnType::Float => "float",
            ColumnType::Boolean => "boolean",
            ColumnType::Null => "null",
        }
    }
    /// Maps a declared SQL column type onto a storage class using SQLite's
    /// affinity rules. Returns `None` for an empty or BLOB declaration.
    pub fn from_declared(declared: &str) -> Option<Self> {
        let upper = declared.trim().to_ascii_uppercase();
        if upper.is_empty() || upper.contains("BLOB") || upper == "NULL" {
            return None;
        }
        if upper.contains("BOOL") {
            return Some(ColumnType::Boolean);
        }
        if upper.contains("INT") {
            return Some(ColumnType::Integer);
        }
        if upper.contains("CHAR") || upper.contains("CLOB") || upper.contains("TEXT") {
            return Some(ColumnType::Text);
        }
        if upper.contains("REAL") || upper.contains("FLOA") || upper.contains("DOUB") {
            return Some(ColumnType::Float);
        }
        // NUMERIC affinity: DECIMAL, NUMERIC, DATE and friends.
        if upper.contains("NUMERIC") || upper.contains("DECIMAL") {
            return Some(ColumnType::Float);
        }
        None
    }
    /// Infers a storage class from observed cells. Integers mixed with floats
    /// widen to float; anything else mixed falls back to text.
    pub fn infer<'a, I>(cells: I) -> Self
    where
        I: IntoIterator<Item = &'a Cell>,
    {
        let mut inferred = ColumnType::Null;
        for cell in cells {
            let observed = match cell {
                Cell::Null => continue,
                Cell::Bool(_) => ColumnType::Boolean,
                Cell::Integer(_) => ColumnType::Integer,
                Cell::Float(_) => ColumnType::Float,
                Cell::Text(_) => ColumnType::Text,
            };
            inferred = match (inferred, observed) {
                (ColumnType::Null, t) => t,
                (a, b) if a == b => a,
                (ColumnType::Integer, ColumnType::Float) | (ColumnType::Float, ColumnType::Integer) => {
                    ColumnType::Float
                }
                _ => return ColumnType::Text,
            };
        }
        inferred
    }
}
impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
}
impl Column {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }
}
/// A single result value. Serialises to the bare JSON scalar, `null` being
/// the missing marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}
impl Cell {
    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Integer(v) => Some(*v as f64),
            Cell::Float(v) if v.is_finite() => Some(*v),
            _ => None,
        }
    }
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Cell::Text(s) => Some(s),
            _ => None,
        }
    }
    /// Display form used for chart labels; the missing marker renders empty.
    pub fn label(&self) -> String {
        match self {
            Cell::Null => String::new(),
            other => other.to_string(),
        }
    }
    pub fn to_json(&self) -> Value {
        match self {
            Cell::Null => Value::Null,
            Cell::Bool(b) => Value::Bool(*b),
            Cell::Integer(i) => Value::from(*i),
            Cell::Float(f) => serde_json::Number::from_f64(*f).map_or(Value::Null, Value::Number),
            Cell::Text(s) => Value::String(s.clone()),
        }
    }
}
impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Null => f.write_str("NULL"),
            Cell::Bool(b) => write!(f, "{b}"),
            Cell::Integer(i) => write!(f, "{i}"),
            Cell::Float(v) => write!(f, "{v}"),
            Cell::Text(s) => f.write_str(s),
        }
    }
}
impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Cell::Text(value.to_string())
    }
}
impl From<String> for Cell {
    fn from(value: String) -> Self {
        Cell::Text(value)
    }
}
impl From<i64> for Cell {
    fn from(value: i64) -> Self {
        Cell::Integer(value)
    }
}
impl From<f64> for Cell {
    fn from(value: f64) -> Self {
        Cell::Float(value)
    }
}
impl From<bool> for Cell {
    fn from(value: bool) -> Self {
        Cell::Bool(value)
    }
}
impl<T: Into<Cell>> From<Option<T>> for Cell {
    fn from(value: Option<T>) -> Self {
        value.map_or(Cell::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declared_types_follow_sqlite_affinity() {
        assert_eq!(ColumnType::from_declared("INTEGER"), Some(ColumnType::Integer));
        assert_eq!(ColumnType::from_declared("bigint"), Some(ColumnType::Integer));
        assert_eq!(ColumnType::from_declared("VARCHAR(40)"), Some(ColumnType::Text));
        assert_eq!(ColumnType::from_declared("DOUBLE PRECISION"), Some(ColumnType::Float));
        assert_eq!(ColumnType::from_declared("DECIMAL(10,2)"), Some(ColumnType::Float));
        assert_eq!(ColumnType::from_declared("BOOLEAN"), Some(ColumnType::Boolean));
        assert_eq!(ColumnType::from_declared(""), None);
        assert_eq!(ColumnType::from_declared("BLOB"), None);
    }

    #[test]
    fn inference_widens_integer_to_float() {
        let cells = [Cell::Integer(1), Cell::Null, Cell::Float(2.5)];
        assert_eq!(ColumnType::infer(&cells), ColumnType::Float);
        let mixed = [Cell::Integer(1), Cell::from("a")];
        assert_eq!(ColumnType::infer(&mixed), ColumnType::Text);
        assert_eq!(ColumnType::infer(&[Cell::Null]), ColumnType::Null);
    }

    #[test]
    fn cells_serialise_as_bare_scalars() {
        let row = vec![Cell::from("North"), Cell::Integer(3), Cell::Float(1.5), Cell::Null];
        assert_eq!(
            serde_json::to_string(&row).unwrap(),
            r#"["North",3,1.5,null]"#
        );
        assert_eq!(Cell::Float(f64::NAN).to_json(), Value::Null);
    }
}
