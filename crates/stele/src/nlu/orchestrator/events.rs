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

//! Progress events emitted once per stage, plus their wire encodings.

use super::state::{PipelinePhase, StageDelta};
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageName {
    ValidateQuestion,
    GenerateQuery,
    ValidateQuery,
    ExecuteQuery,
    SelectVisualization,
    FormatVisualization,
    GenerateInsight,
    ClassifyContent,
}
impl StageName {
    /// Execution order; every run visits all of them.
    pub const ALL: [StageName; 8] = [
        StageName::ValidateQuestion,
        StageName::GenerateQuery,
        StageName::ValidateQuery,
        StageName::ExecuteQuery,
        StageName::SelectVisualization,
        StageName::FormatVisualization,
        StageName::GenerateInsight,
        StageName::ClassifyContent,
    ];
    pub fn as_str(self) -> &'static str {
        match self {
            StageName::ValidateQuestion => "validate_question",
            StageName::GenerateQuery => "generate_query",
            StageName::ValidateQuery => "validate_query",
            StageName::ExecuteQuery => "execute_query",
            StageName::SelectVisualization => "select_visualization",
            StageName::FormatVisualization => "format_visualization",
            StageName::GenerateInsight => "generate_insight",
            StageName::ClassifyContent => "classify_content",
        }
    }
    pub fn phase(self) -> PipelinePhase {
        match self {
            StageName::ValidateQuestion => PipelinePhase::Validating,
            StageName::GenerateQuery => PipelinePhase::GeneratingQuery,
            StageName::ValidateQuery => PipelinePhase::ValidatingQuery,
            StageName::ExecuteQuery => PipelinePhase::Executing,
            StageName::SelectVisualization => PipelinePhase::SelectingVisualization,
            StageName::FormatVisualization => PipelinePhase::Formatting,
            StageName::GenerateInsight => PipelinePhase::GeneratingInsight,
            StageName::ClassifyContent => PipelinePhase::ClassifyingContent,
        }
    }
}
impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StageEvent {
    Stage { stage: StageName, delta: StageDelta },
    End,
    Error { message: String },
}
impl StageEvent {
    pub fn name(&self) -> &'static str {
        match self {
            StageEvent::Stage { stage, .. } => stage.as_str(),
            StageEvent::End => "end",
            StageEvent::Error { .. } => "error",
        }
    }
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StageEvent::Stage { .. })
    }
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
    /// One server-sent-events frame: `data: <json>` and a blank line.
    pub fn to_sse(&self) -> serde_json::Result<String> {
        Ok(format!("data: {}\n\n", self.to_json()?))
    }
}
impl Serialize for StageEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            StageEvent::Stage { stage, delta } => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("event", stage.as_str())?;
                map.serialize_entry("data", delta)?;
                map.end()
            }
            StageEvent::End => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("event", "end")?;
                map.end()
            }
            StageEvent::Error { message } => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("event", "error")?;
                map.serialize_entry("data", message)?;
                map.end()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use estel::{Cell, ResultTable};
    use serde_json::{json, Value};

    #[test]
    fn stage_event_wraps_delta() {
        let table = ResultTable::from_rows(
            ["region", "total"],
            vec![vec![Cell::from("North"), Cell::Float(f64::NAN)]],
        )
        .unwrap();
        let event = StageEvent::Stage {
            stage: StageName::ExecuteQuery,
            delta: StageDelta {
                validated_query: Some("SELECT region, total FROM t".to_string()),
                result_table: Some(table),
                ..StageDelta::default()
            },
        };
        let value: Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        assert_eq!(value["event"], "execute_query");
        assert_eq!(value["data"]["result_table"]["columns"][0], json!({"name": "region", "type": "text"}));
        assert_eq!(value["data"]["result_table"]["data"][0][1], Value::Null);
    }

    #[test]
    fn terminal_events_encode() {
        assert_eq!(StageEvent::End.to_json().unwrap(), r#"{"event":"end"}"#);
        let error = StageEvent::Error {
            message: "Text generator unavailable".to_string(),
        };
        assert_eq!(
            error.to_sse().unwrap(),
            "data: {\"event\":\"error\",\"data\":\"Text generator unavailable\"}\n\n"
        );
        assert!(error.is_terminal());
    }

    #[test]
    fn stage_order_matches_phases() {
        let phases: Vec<PipelinePhase> = StageName::ALL.iter().map(|s| s.phase()).collect();
        assert_eq!(phases.first(), Some(&PipelinePhase::Validating));
        assert_eq!(phases.last(), Some(&PipelinePhase::ClassifyingContent));
    }
}
