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

//! The per-question record threaded through the pipeline and the partial
//! updates stages return.

use estel::{ChartKind, ChartPayload, ResultTable};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    UnsupportedQuestion,
    QueryGenerationFailed,
    QueryRejected,
    ExecutionFailed,
    FormattingFailed,
    InappropriateContent,
}
impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::UnsupportedQuestion => "unsupported_question",
            ErrorKind::QueryGenerationFailed => "query_generation_failed",
            ErrorKind::QueryRejected => "query_rejected",
            ErrorKind::ExecutionFailed => "execution_failed",
            ErrorKind::FormattingFailed => "formatting_failed",
            ErrorKind::InappropriateContent => "inappropriate_content",
        }
    }
}
impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineError {
    pub kind: ErrorKind,
    pub detail: String,
}
impl PipelineError {
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelinePhase {
    Created,
    Validating,
    GeneratingQuery,
    ValidatingQuery,
    Executing,
    SelectingVisualization,
    Formatting,
    GeneratingInsight,
    ClassifyingContent,
    Terminal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineState {
    pub question: String,
    pub phase: PipelinePhase,
    pub schema_description: String,
    pub candidate_query: String,
    pub validated_query: String,
    pub result_table: ResultTable,
    pub chart_kind: ChartKind,
    pub chart_payload: Option<ChartPayload>,
    pub insight: String,
    pub error: Option<PipelineError>,
}
impl PipelineState {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            phase: PipelinePhase::Created,
            schema_description: String::new(),
            candidate_query: String::new(),
            validated_query: String::new(),
            result_table: ResultTable::empty(),
            chart_kind: ChartKind::None,
            chart_payload: None,
            insight: String::new(),
            error: None,
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }

    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    /// Merges a stage's delta. The first recorded error wins and the schema
    /// description is only ever set once.
    pub fn apply(&mut self, delta: &StageDelta) {
        if let Some(schema) = &delta.schema_description {
            if self.schema_description.is_empty() {
                self.schema_description = schema.clone();
            } else {
                warn!("Ignoring second schema description");
            }
        }
        if let Some(query) = &delta.candidate_query {
            self.candidate_query = query.clone();
        }
        if let Some(query) = &delta.validated_query {
            self.validated_query = query.clone();
        }
        if let Some(table) = &delta.result_table {
            self.result_table = table.clone();
        }
        if let Some(kind) = delta.chart_kind {
            self.chart_kind = kind;
        }
        if let Some(payload) = &delta.chart_payload {
            self.chart_payload = payload.clone();
        }
        if let Some(insight) = &delta.insight {
            self.insight = insight.clone();
        }
        if let Some(error) = &delta.error {
            match &self.error {
                None => self.error = Some(error.clone()),
                Some(existing) => warn!(
                    kept = %existing.kind,
                    dropped = %error.kind,
                    "Pipeline already failed; keeping the first error"
                ),
            }
        }
    }
}

/// The fields one stage produced. Only the fields a stage touched are
/// serialised into its event.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StageDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub candidate_query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validated_query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_table: Option<ResultTable>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chart_kind: Option<ChartKind>,
    /// `Some(None)` records that no chart could be produced.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chart_payload: Option<Option<ChartPayload>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insight: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<PipelineError>,
}
impl StageDelta {
    pub fn failed(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            error: Some(PipelineError::new(kind, detail)),
            ..Self::default()
        }
    }
    pub fn with_error(mut self, kind: ErrorKind, detail: impl Into<String>) -> Self {
        self.error = Some(PipelineError::new(kind, detail));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn first_error_is_never_overwritten() {
        let mut state = PipelineState::new("q");
        state.apply(&StageDelta::failed(ErrorKind::UnsupportedQuestion, "drop"));
        state.apply(&StageDelta::failed(ErrorKind::InappropriateContent, "unsafe"));
        assert_eq!(state.error_kind(), Some(ErrorKind::UnsupportedQuestion));
        assert_eq!(state.error.as_ref().map(|e| e.detail.as_str()), Some("drop"));
    }

    #[test]
    fn schema_is_set_once() {
        let mut state = PipelineState::new("q");
        for schema in ["first", "second"] {
            state.apply(&StageDelta {
                schema_description: Some(schema.to_string()),
                ..StageDelta::default()
            });
        }
        assert_eq!(state.schema_description, "first");
    }

    #[test]
    fn delta_serialises_only_touched_fields() {
        let delta = StageDelta {
            chart_kind: Some(ChartKind::None),
            chart_payload: Some(None),
            ..StageDelta::default()
        };
        assert_eq!(
            serde_json::to_value(&delta).unwrap(),
            json!({"chart_kind": "none", "chart_payload": null})
        );

        let delta = StageDelta::failed(ErrorKind::QueryRejected, "no SELECT statement");
        assert_eq!(
            serde_json::to_value(&delta).unwrap(),
            json!({"error": {"kind": "query_rejected", "detail": "no SELECT statement"}})
        );
    }

    #[test]
    fn explicit_absent_payload_clears_chart() {
        let mut state = PipelineState::new("q");
        state.apply(&StageDelta {
            chart_payload: Some(None),
            ..StageDelta::default()
        });
        assert!(state.chart_payload.is_none());
    }
}
